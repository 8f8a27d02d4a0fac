//! Crate-wide error taxonomy.
//!
//! Internal operations return [`Error`]; the Engine Facade (`engine::Engine::query`)
//! translates the terminal subset into [`EngineError`] before returning to the
//! caller. In-loop failures (sub-LLM errors, timeouts, protocol violations) are
//! recovered into `error` trace Steps and never reach this boundary as `Err`.

use thiserror::Error;

use crate::trace::TraceView;

/// Result type alias using this crate's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a query through the engine.
#[derive(Error, Debug)]
pub enum Error {
    /// `llm_query` content exceeded `max_subcall_chars`.
    #[error("content too large: limit {limit}, got {got}")]
    ContentTooLarge { limit: usize, got: usize },

    /// The main or sub LLM client returned an error.
    #[error("upstream error from {provider}: {message}")]
    UpstreamError { provider: String, message: String },

    /// A code execution exceeded `per_exec_timeout_ms` or `overall_read_deadline_ms`.
    #[error("execution timed out after {duration_ms}ms")]
    ExecutionTimeout { duration_ms: u64 },

    /// A framed message exceeded `max_line_bytes` or the buffer exceeded `max_buffer_bytes`.
    #[error("protocol limit exceeded: {limit_name} (max {limit}, got {got})")]
    ProtocolLimitExceeded {
        limit_name: &'static str,
        limit: usize,
        got: usize,
    },

    /// A worker sent an unexpected frame kind, or violated ordering guarantees.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// I/O failure talking to a worker's pipes.
    #[error("subprocess communication error: {0}")]
    SubprocessComm(String),

    /// Frame (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `EngineConfig` failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// The pool could not produce a worker at all (warmup failed).
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// The caller cancelled the query.
    #[error("query cancelled")]
    Cancelled,

    /// A condition the implementation guarantees cannot happen.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    pub fn content_too_large(limit: usize, got: usize) -> Self {
        Self::ContentTooLarge { limit, got }
    }

    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn execution_timeout(duration_ms: u64) -> Self {
        Self::ExecutionTimeout { duration_ms }
    }

    pub fn protocol_limit_exceeded(limit_name: &'static str, limit: usize, got: usize) -> Self {
        Self::ProtocolLimitExceeded {
            limit_name,
            limit,
            got,
        }
    }

    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    pub fn subprocess_comm(message: impl Into<String>) -> Self {
        Self::SubprocessComm(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn sandbox_unavailable(message: impl Into<String>) -> Self {
        Self::SandboxUnavailable(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The `EngineErrorKind` this error maps to when it escapes the Engine Facade,
    /// if any. In-loop-recoverable variants return `None`: callers of `Error` deep
    /// in the loop should have already turned those into Steps before an `Error`
    /// value would reach this far.
    pub fn engine_kind(&self) -> Option<EngineErrorKind> {
        match self {
            Error::Config(_) => Some(EngineErrorKind::ConfigInvalid),
            Error::SandboxUnavailable(_) => Some(EngineErrorKind::SandboxUnavailable),
            Error::UpstreamError { .. } => Some(EngineErrorKind::UpstreamUnreachable),
            Error::Internal(_) => Some(EngineErrorKind::InternalInvariantViolated),
            _ => None,
        }
    }
}

/// The four kinds of error permitted to escape the Engine Facade (spec §7/§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    ConfigInvalid,
    SandboxUnavailable,
    UpstreamUnreachable,
    InternalInvariantViolated,
}

/// Error returned from `Engine::query`, carrying whatever trace had accumulated
/// before the fatal condition was hit.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
    pub trace: TraceView,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>, trace: TraceView) -> Self {
        Self {
            kind,
            message: message.into(),
            trace,
        }
    }

    /// Build from an internal `Error` plus the partial trace, using the error's
    /// own classification. Falls back to `InternalInvariantViolated` if `err`
    /// carries no mapping — such an error should never reach the facade boundary
    /// unclassified, but the fallback keeps `from_error` infallible.
    pub fn from_error(err: Error, trace: TraceView) -> Self {
        let kind = err
            .engine_kind()
            .unwrap_or(EngineErrorKind::InternalInvariantViolated);
        Self::new(kind, err.to_string(), trace)
    }
}

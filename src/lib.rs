//! # shesha-rlm-core
//!
//! The Recursive Language Model (RLM) execution engine at the core of Shesha:
//! a closed-loop coordinator that alternates between a language-model call
//! and a hardened code-execution sandbox, recording a full trace and
//! enforcing strict resource and adversarial-content boundaries.
//!
//! Five components, leaves first:
//! - [`trace`] — C1 Trace Recorder: append-only typed step log, token
//!   accounting, redaction on read.
//! - [`llm::SubModelGateway`] — C2 Sub-Model Gateway: one-shot, non-recursive
//!   model calls issued by sandboxed code.
//! - [`sandbox`] — C3 Sandbox Supervisor: warm-pool lifecycle, framed I/O
//!   pump, limit enforcement.
//! - [`orchestrator::LoopController`] — C4 RLM Loop Controller: the
//!   turn-by-turn state machine.
//! - [`engine::Engine`] — C5 Engine Facade: the public `query()` entrypoint.
//!
//! ```rust,ignore
//! use shesha_rlm_core::{Engine, EngineConfig, Document, DocumentSet};
//!
//! let engine = Engine::new(EngineConfig::default(), llm_client, "worker-runner", vec![])?;
//! let outcome = engine.query("What is in these documents?", documents).await?;
//! println!("{}", outcome.answer);
//! ```

pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod sandbox;
pub mod trace;

pub use config::{EngineConfig, EngineConfigBuilder, EngineConfigOverrides, RedactionPattern};
pub use document::{Document, DocumentSet};
pub use engine::{Engine, QueryOutcome};
pub use error::{EngineError, EngineErrorKind, Error, Result};
pub use llm::{ChatMessage, ChatRole, LlmClient, LlmCompletion, SubModelGateway};
pub use orchestrator::LoopController;
pub use sandbox::{
    ExecOutcome, ProcessWorkerFactory, Supervisor, Worker, WorkerFactory, WorkerState, WorkerTransport,
};
pub use trace::{Redactor, Step, StepKind, TokenBucket, TokenCounters, Trace, TraceTokens, TraceView};

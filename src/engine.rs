//! C5 Engine Facade — the single externally-callable operation
//! `query(question, documents) -> {answer, trace}` (spec §4.5).

use std::sync::Arc;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::document::DocumentSet;
use crate::error::{EngineError, EngineErrorKind};
use crate::llm::{LlmClient, SubModelGateway};
use crate::orchestrator::LoopController;
use crate::sandbox::{ProcessWorkerFactory, Supervisor, WorkerFactory};
use crate::trace::{Trace, TraceView};

/// Successful termination of a query: either `final` was reached or the
/// iteration budget was exhausted (spec §4.4.3) — both are non-error
/// outcomes distinguished only by `answer`'s content and the trace.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub answer: String,
    pub trace: TraceView,
}

/// Binds a concrete `LlmClient` and a worker factory against one
/// `EngineConfig`. One `Engine` drives one logical query at a time; callers
/// wanting concurrent queries instantiate multiple `Engine`s (spec §5).
pub struct Engine {
    cfg: Arc<EngineConfig>,
    llm: Arc<dyn LlmClient>,
    supervisor: Arc<Supervisor>,
}

impl Engine {
    /// Construct an engine that spawns real subprocess workers via
    /// `worker_command`/`worker_args` (expected to invoke a container
    /// runtime enforcing the isolation contract, §4.3.1).
    pub fn new(
        cfg: EngineConfig,
        llm: Arc<dyn LlmClient>,
        worker_command: impl Into<String>,
        worker_args: Vec<String>,
    ) -> Result<Self, EngineError> {
        cfg.validate()
            .map_err(|e| EngineError::from_error(e, TraceView::default()))?;
        let factory: Arc<dyn WorkerFactory> = Arc::new(ProcessWorkerFactory {
            command: worker_command.into(),
            args: worker_args,
        });
        Ok(Self::with_factory(cfg, llm, factory))
    }

    /// Construct an engine against an arbitrary `WorkerFactory` — the seam
    /// tests use to substitute an in-memory worker.
    pub fn with_factory(cfg: EngineConfig, llm: Arc<dyn LlmClient>, factory: Arc<dyn WorkerFactory>) -> Self {
        let cfg = Arc::new(cfg);
        let supervisor = Supervisor::new(Arc::clone(&cfg), factory);
        Self { cfg, llm, supervisor }
    }

    /// Validate config, eagerly warm the pool, run the loop, and return the
    /// redacted trace view alongside the answer (or an `EngineError` with
    /// whatever trace had accumulated).
    pub async fn query(&self, question: &str, documents: DocumentSet) -> Result<QueryOutcome, EngineError> {
        let start = Instant::now();

        self.cfg
            .validate()
            .map_err(|e| EngineError::from_error(e, TraceView::default()))?;

        let trace = Trace::new(&self.cfg.redaction_patterns)
            .map_err(|e| EngineError::from_error(e, TraceView::default()))?;

        self.supervisor.warm_up().await.map_err(|e| {
            EngineError::new(EngineErrorKind::SandboxUnavailable, e.to_string(), snapshot_or_default(&trace))
        })?;

        let gateway = SubModelGateway::new(Arc::clone(&self.llm), self.cfg.model_name.clone(), self.cfg.max_subcall_chars);
        let controller = LoopController::new(
            Arc::clone(&self.llm),
            self.cfg.model_name.clone(),
            Arc::clone(&self.cfg),
            gateway,
            Arc::clone(&self.supervisor),
        );

        match controller.run(question, &documents, &trace, start).await {
            Ok(answer) => Ok(QueryOutcome {
                answer,
                trace: snapshot_or_default(&trace),
            }),
            Err(e) => Err(EngineError::from_error(e, snapshot_or_default(&trace))),
        }
    }

    /// Politely shut down every idle worker. Not part of the per-query
    /// contract; callers use this to release resources when done with an
    /// `Engine` instance.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown_all().await;
    }
}

/// A poisoned trace mutex means a prior panic happened mid-mutation; the
/// trace itself is unrecoverable at that point, so surface an empty view
/// rather than propagate the panic into the caller (spec §7: the caller
/// always receives either `{answer, trace}` or `{EngineError{..., trace}}`).
fn snapshot_or_default(trace: &Trace) -> TraceView {
    trace.snapshot().unwrap_or_default()
}

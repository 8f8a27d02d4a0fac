//! C3 Sandbox Supervisor: the pool, the per-worker frame pump, and the wire
//! protocol between host and worker (spec §4.3, §6.1).

pub mod pool;
pub mod protocol;
pub mod worker;

pub use pool::Supervisor;
pub use protocol::{HostMessage, WorkerMessage};
pub use worker::{ExecOutcome, ProcessWorkerFactory, Worker, WorkerFactory, WorkerState, WorkerTransport};

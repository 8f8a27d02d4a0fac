//! C3 Sandbox Supervisor — warm-pool lifecycle, acquire/release protocol,
//! asynchronous replacement on death (spec §4.3.2).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};

use super::worker::{Worker, WorkerFactory};

/// Deadline for the `warming -> idle` ping handshake. Not a recognized
/// `EngineConfig` field (spec §3 is silent on it); fixed rather than
/// configurable since warmup is an internal pool-maintenance concern, not a
/// per-query one.
const WARMUP_DEADLINE: Duration = Duration::from_secs(10);

/// Deadline for the polite `shutdown` handshake before a worker is force-killed.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Maintains exactly `pool_size` workers in `idle|warming` whenever the
/// engine is idle (spec §4.3.2). Acquire policy is LRU among idle; on
/// exhaustion a new worker is spun up synchronously.
pub struct Supervisor {
    cfg: Arc<EngineConfig>,
    factory: Arc<dyn WorkerFactory>,
    idle: Mutex<VecDeque<Worker>>,
}

impl Supervisor {
    pub fn new(cfg: Arc<EngineConfig>, factory: Arc<dyn WorkerFactory>) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            factory,
            idle: Mutex::new(VecDeque::new()),
        })
    }

    async fn spawn_one(&self) -> Result<Worker> {
        let (transport, child) = self.factory.spawn().await?;
        let mut worker = Worker::new(transport, child, &self.cfg);
        worker.complete_warmup(WARMUP_DEADLINE).await?;
        Ok(worker)
    }

    /// Bring `pool_size` workers from `warming` to `idle` before the first
    /// turn (spec §4.5). A failure here is `SandboxUnavailable` and is
    /// detected before any turn starts.
    pub async fn warm_up(&self) -> Result<()> {
        let mut idle = self.idle.lock().await;
        for _ in idle.len()..self.cfg.pool_size {
            let worker = self
                .spawn_one()
                .await
                .map_err(|e| Error::sandbox_unavailable(e.to_string()))?;
            idle.push_back(worker);
        }
        Ok(())
    }

    /// LRU among idle: pop the worker released longest ago. On exhaustion,
    /// synchronously spin up a new one (a latency penalty, not an error).
    #[instrument(skip(self))]
    pub async fn acquire(self: &Arc<Self>) -> Result<Worker> {
        {
            let mut idle = self.idle.lock().await;
            if let Some(worker) = idle.pop_back() {
                debug!(worker_id = %worker.id, "acquired idle worker");
                return Ok(worker);
            }
        }
        debug!("pool exhausted, spawning worker synchronously");
        self.spawn_one().await
    }

    /// Return a worker to the pool if it came back healthy; otherwise drop
    /// it and asynchronously replace it so the idle pool stays at
    /// `pool_size`.
    #[instrument(skip(self, worker), fields(worker_id = %worker.id))]
    pub fn release(self: &Arc<Self>, worker: Worker) {
        if worker.is_alive() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.idle.lock().await.push_front(worker);
            });
        } else {
            warn!("released worker was already dead, replacing");
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Ok(replacement) = this.spawn_one().await {
                    this.idle.lock().await.push_front(replacement);
                }
            });
        }
    }

    /// Discard a worker without attempting to reuse it (protocol violation,
    /// timeout) but still trigger asynchronous replenishment.
    #[instrument(skip(self, worker), fields(worker_id = %worker.id))]
    pub fn discard(self: &Arc<Self>, mut worker: Worker) {
        warn!("discarding worker");
        worker.force_kill();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(replacement) = this.spawn_one().await {
                this.idle.lock().await.push_front(replacement);
            }
        });
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Politely shut down every idle worker; used when an `Engine` is
    /// dropped explicitly via `Engine::shutdown`.
    pub async fn shutdown_all(&self) {
        let mut idle = self.idle.lock().await;
        while let Some(mut worker) = idle.pop_back() {
            worker.shutdown(SHUTDOWN_DEADLINE).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::worker::WorkerTransport;
    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;
    use tokio::process::Child;

    struct DuplexFactory;

    #[async_trait]
    impl WorkerFactory for DuplexFactory {
        async fn spawn(&self) -> Result<(Box<dyn WorkerTransport>, Option<Child>)> {
            let (mut host, mut sim) = tokio::io::duplex(4096);
            tokio::spawn(async move {
                // Answer one ping, then echo a final for whatever exec arrives.
                let mut reader = crate::sandbox::worker::FramedReader::new(4096, 4096);
                loop {
                    match reader.read_line(&mut sim).await {
                        Ok(Some(line)) => {
                            if line.contains("\"ping\"") {
                                let _ = sim.write_all(b"{\"status\":\"ok\",\"message\":\"pong\"}\n").await;
                            } else if line.contains("\"exec\"") {
                                let _ = sim.write_all(b"{\"event\":\"final\",\"value\":\"ok\"}\n").await;
                            } else if line.contains("\"shutdown\"") {
                                let _ = sim.write_all(b"{\"status\":\"ok\"}\n").await;
                                break;
                            }
                        }
                        _ => break,
                    }
                }
            });
            let _ = &mut host;
            Ok((Box::new(host), None))
        }
    }

    #[tokio::test]
    async fn warm_up_fills_pool_to_size() {
        let cfg = Arc::new(EngineConfig {
            pool_size: 2,
            ..EngineConfig::default()
        });
        let sup = Supervisor::new(cfg, Arc::new(DuplexFactory));
        sup.warm_up().await.unwrap();
        assert_eq!(sup.idle_count().await, 2);
    }

    #[tokio::test]
    async fn acquire_drains_and_release_restores_idle_count() {
        let cfg = Arc::new(EngineConfig {
            pool_size: 1,
            ..EngineConfig::default()
        });
        let sup = Supervisor::new(cfg, Arc::new(DuplexFactory));
        sup.warm_up().await.unwrap();
        assert_eq!(sup.idle_count().await, 1);

        let worker = sup.acquire().await.unwrap();
        assert_eq!(sup.idle_count().await, 0);

        sup.release(worker);
        // release() spawns a task; give it a chance to run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sup.idle_count().await, 1);
    }

    #[tokio::test]
    async fn acquire_on_exhaustion_spawns_synchronously() {
        let cfg = Arc::new(EngineConfig {
            pool_size: 0,
            ..EngineConfig::default()
        });
        let sup = Supervisor::new(cfg, Arc::new(DuplexFactory));
        let worker = sup.acquire().await.unwrap();
        assert!(worker.is_alive());
    }
}

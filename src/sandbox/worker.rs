//! One isolated execution worker: its transport, framed I/O, and the
//! per-exec pump (spec §4.3).

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::document::DocumentSet;
use crate::error::{Error, Result};
use crate::llm::SubModelGateway;
use crate::trace::Trace;

use super::protocol::{HostMessage, WorkerMessage};

/// A worker's bidirectional pipe, abstracted so tests can substitute an
/// in-memory `tokio::io::duplex()` half for a real child process's stdio.
pub trait WorkerTransport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> WorkerTransport for T {}

/// Glues a child process's separate stdin/stdout handles into one
/// `AsyncRead + AsyncWrite` type.
pub struct ProcessPipes {
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl AsyncRead for ProcessPipes {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProcessPipes {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}

/// Spawns a real subprocess worker with the isolation contract (§4.3.1)
/// applied to the extent the host OS/process supervisor exposes it. This
/// crate does not itself implement a container runtime; `command` is
/// expected to invoke one (a wrapper script, `runc`, `firecracker`, etc.)
/// that enforces the no-network/dropped-capabilities/read-only-rootfs/
/// resource-cap requirements before exec'ing the interpreter.
pub struct ProcessWorkerFactory {
    pub command: String,
    pub args: Vec<String>,
}

#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn spawn(&self) -> Result<(Box<dyn WorkerTransport>, Option<Child>)>;
}

#[async_trait]
impl WorkerFactory for ProcessWorkerFactory {
    async fn spawn(&self) -> Result<(Box<dyn WorkerTransport>, Option<Child>)> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::sandbox_unavailable(format!("failed to spawn worker: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::sandbox_unavailable("worker stdin not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::sandbox_unavailable("worker stdout not piped"))?;

        Ok((Box::new(ProcessPipes { stdin, stdout }), Some(child)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Warming,
    Idle,
    Busy,
    Draining,
    Dead,
}

/// Manually accumulates bytes off a transport into lines, enforcing both
/// caps in §4.3.3 simultaneously: total unread bytes vs. a single line's
/// bytes. Cannot use `AsyncBufReadExt::read_line` because it has no built-in
/// ceiling.
pub struct FramedReader {
    buf: Vec<u8>,
    max_line_bytes: usize,
    max_buffer_bytes: usize,
}

impl FramedReader {
    pub fn new(max_line_bytes: usize, max_buffer_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_bytes,
            max_buffer_bytes,
        }
    }

    /// Read until one `\n`-terminated line is available, or `None` on EOF
    /// with no partial data. Errors with `ProtocolLimitExceeded` if either
    /// cap is exceeded.
    pub async fn read_line<T: AsyncRead + Unpin>(&mut self, transport: &mut T) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = &line_bytes[..line_bytes.len() - 1];
                if line.len() > self.max_line_bytes {
                    return Err(Error::protocol_limit_exceeded(
                        "max_line_bytes",
                        self.max_line_bytes,
                        line.len(),
                    ));
                }
                let text = String::from_utf8_lossy(line).into_owned();
                return Ok(Some(text));
            }

            if self.buf.len() > self.max_buffer_bytes {
                return Err(Error::protocol_limit_exceeded(
                    "max_buffer_bytes",
                    self.max_buffer_bytes,
                    self.buf.len(),
                ));
            }

            let mut chunk = [0u8; 8192];
            let n = transport
                .read(&mut chunk)
                .await
                .map_err(|e| Error::subprocess_comm(e.to_string()))?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::protocol_violation("worker closed stream mid-line"));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// The outcome of one `exec` turn, already truncated per §4.3.7 where
/// applicable. `final` truncation is never applied — §4.3.7 guarantees
/// truncation never hides a `final` or `error` terminal message.
pub enum ExecOutcome {
    Final(String),
    Output { text: String },
    ExecError { stdout: String, error: String },
}

/// A handle to one isolated execution context (spec §3).
pub struct Worker {
    pub id: Uuid,
    pub state: WorkerState,
    transport: Box<dyn WorkerTransport>,
    child: Option<Child>,
    reader: FramedReader,
    pub started_at: Instant,
    pub last_used_at: Instant,
}

impl Worker {
    pub fn new(transport: Box<dyn WorkerTransport>, child: Option<Child>, cfg: &EngineConfig) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            state: WorkerState::Warming,
            transport,
            child,
            reader: FramedReader::new(cfg.max_line_bytes, cfg.max_buffer_bytes),
            started_at: now,
            last_used_at: now,
        }
    }

    async fn send(&mut self, msg: &HostMessage) -> Result<()> {
        debug!(worker_id = %self.id, ?msg, "sending frame to worker");
        let line = msg.encode_line()?;
        self.transport
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::subprocess_comm(e.to_string()))?;
        self.transport
            .flush()
            .await
            .map_err(|e| Error::subprocess_comm(e.to_string()))
    }

    async fn recv(&mut self) -> Result<WorkerMessage> {
        match self.reader.read_line(&mut self.transport).await? {
            Some(line) => WorkerMessage::parse_line(&line),
            None => Err(Error::protocol_violation("worker closed stream")),
        }
    }

    /// `warming -> idle` handshake: send `ping`, expect `pong` within
    /// `warmup_deadline`.
    pub async fn complete_warmup(&mut self, warmup_deadline: Duration) -> Result<()> {
        self.send(&HostMessage::Ping).await?;
        let outcome = tokio::time::timeout(warmup_deadline, self.recv()).await;
        match outcome {
            Ok(Ok(WorkerMessage::Pong)) => {
                self.state = WorkerState::Idle;
                Ok(())
            }
            Ok(Ok(_)) => {
                self.state = WorkerState::Dead;
                Err(Error::protocol_violation("expected pong during warmup"))
            }
            Ok(Err(e)) => {
                self.state = WorkerState::Dead;
                Err(e)
            }
            Err(_) => {
                self.state = WorkerState::Dead;
                Err(Error::sandbox_unavailable("worker did not answer ping before warmup deadline"))
            }
        }
    }

    /// Dispatch one `exec` and pump frames until a terminal message arrives,
    /// calling back into the Sub-Model Gateway on every `subcall` (spec
    /// §4.3.4–§4.3.6). Truncates `exec_result`/error `stdout` per §4.3.7.
    pub async fn run_exec(
        &mut self,
        code: &str,
        documents: &DocumentSet,
        cfg: &EngineConfig,
        gateway: &SubModelGateway,
        trace: &Trace,
    ) -> Result<ExecOutcome> {
        self.state = WorkerState::Busy;
        self.last_used_at = Instant::now();

        self.send(&HostMessage::Exec {
            code: code.to_string(),
            documents: documents.texts(),
        })
        .await?;

        let overall_deadline = Instant::now() + Duration::from_millis(cfg.overall_read_deadline_ms);
        let per_exec_budget = Duration::from_millis(cfg.per_exec_timeout_ms);
        let mut subcall_outstanding = false;

        loop {
            let remaining_overall = overall_deadline.saturating_duration_since(Instant::now());
            if remaining_overall.is_zero() {
                self.state = WorkerState::Dead;
                return Err(Error::execution_timeout(cfg.overall_read_deadline_ms));
            }
            let read_budget = per_exec_budget.min(remaining_overall);

            let msg = match tokio::time::timeout(read_budget, self.recv()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(e)) => {
                    self.state = WorkerState::Dead;
                    return Err(e);
                }
                Err(_) => {
                    warn!(worker_id = %self.id, "worker exec timed out, killing");
                    self.state = WorkerState::Dead;
                    return Err(Error::execution_timeout(cfg.per_exec_timeout_ms));
                }
            };

            match msg {
                WorkerMessage::Subcall { instruction, content } => {
                    if subcall_outstanding {
                        self.state = WorkerState::Dead;
                        return Err(Error::protocol_violation(
                            "worker sent a second subcall before the first was answered",
                        ));
                    }
                    subcall_outstanding = true;
                    let t_wall_ms = elapsed_ms(self.started_at);
                    let reply = match gateway.llm_query(trace, t_wall_ms, &instruction, &content).await {
                        Ok(text) => HostMessage::SubcallResultOk { text },
                        Err(Error::ContentTooLarge { .. }) => HostMessage::SubcallResultErr {
                            error_kind: "ContentTooLarge".to_string(),
                            message: "content too large".to_string(),
                        },
                        Err(e) => HostMessage::SubcallResultErr {
                            error_kind: "UpstreamError".to_string(),
                            message: e.to_string(),
                        },
                    };
                    self.send(&reply).await?;
                    subcall_outstanding = false;
                }
                WorkerMessage::Final { value } => {
                    self.state = WorkerState::Idle;
                    return Ok(ExecOutcome::Final(value));
                }
                WorkerMessage::ExecResultOk { stdout } => {
                    self.state = WorkerState::Idle;
                    return Ok(ExecOutcome::Output {
                        text: truncate_output(&stdout, cfg.max_output_chars),
                    });
                }
                WorkerMessage::ExecResultErr { stdout, error } => {
                    self.state = WorkerState::Idle;
                    return Ok(ExecOutcome::ExecError {
                        stdout: truncate_output(&stdout, cfg.max_output_chars),
                        error,
                    });
                }
                WorkerMessage::Pong | WorkerMessage::ShutdownAck => {
                    self.state = WorkerState::Dead;
                    return Err(Error::protocol_violation(
                        "worker sent an out-of-band frame mid-exec",
                    ));
                }
            }
        }
    }

    /// `shutdown` politely; best-effort — the caller force-kills on timeout.
    pub async fn shutdown(&mut self, deadline: Duration) {
        self.state = WorkerState::Draining;
        if self.send(&HostMessage::Shutdown).await.is_ok() {
            let _ = tokio::time::timeout(deadline, self.recv()).await;
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill().await;
        }
        self.state = WorkerState::Dead;
    }

    pub fn force_kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        self.state = WorkerState::Dead;
    }

    pub fn is_alive(&self) -> bool {
        self.state != WorkerState::Dead
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    Instant::now().saturating_duration_since(since).as_millis() as u64
}

/// Truncate `text` to `max_chars`, inserting the `«…truncated N chars…»`
/// marker at the split point (spec §4.3.7). Never called on a `final`
/// payload.
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    let omitted = total - max_chars;
    format!("{kept}«…truncated {omitted} chars…»")
}

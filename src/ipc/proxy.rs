//! Parent-side proxy: the handle an API/orchestrator thread holds
//! instead of touching the child process directly. Read methods serve
//! a TTL-cached snapshot and never block on the child; write methods
//! round-trip a command through stdin/stdout with a per-method timeout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use crate::error::{EngineError, EngineResult};
use crate::ipc::message::{Command as IpcCommand, CommandResult, Snapshot};

const STATUS_CACHE_TTL: Duration = Duration::from_secs(1);
const READY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const ADD_NZB_TIMEOUT: Duration = Duration::from_secs(120);
const TEST_SERVERS_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the outbound command queue. A full queue is treated as
/// a 503-equivalent: callers get an error after waiting `SUBMIT_TIMEOUT`
/// rather than piling up indefinitely behind a saturated child.
const COMMAND_QUEUE_CAPACITY: usize = 500;
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

fn timeout_for(method: &str) -> Duration {
    match method {
        "add_nzb" => ADD_NZB_TIMEOUT,
        "test_servers" => TEST_SERVERS_TIMEOUT,
        _ => DEFAULT_TIMEOUT,
    }
}

type PendingMap = Arc<AsyncMutex<HashMap<u64, oneshot::Sender<CommandResult>>>>;

struct ChildHandle {
    child: Child,
    queue_tx: mpsc::Sender<Vec<u8>>,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

/// Spawns and supervises one engine child process, exposing the
/// request/reply and status-read surface the rest of the process talks
/// to instead of the process itself.
pub struct EngineProxy {
    program: PathBuf,
    args: Vec<String>,
    snapshot_path: PathBuf,
    next_id: AtomicU64,
    pending: PendingMap,
    handle: AsyncMutex<Option<ChildHandle>>,
    status_cache: AsyncMutex<(tokio::time::Instant, Snapshot)>,
}

impl EngineProxy {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            snapshot_path: snapshot_path.into(),
            next_id: AtomicU64::new(1),
            pending: Arc::new(AsyncMutex::new(HashMap::new())),
            handle: AsyncMutex::new(None),
            status_cache: AsyncMutex::new((tokio::time::Instant::now() - STATUS_CACHE_TTL, Snapshot::empty())),
        }
    }

    /// Spawn the child and wait for it to report readiness (its first
    /// snapshot write) within [`READY_TIMEOUT`].
    pub async fn spawn(&self) -> EngineResult<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null()).kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| EngineError::Ipc(format!("failed to spawn engine process: {e}")))?;
        let stdin = child.stdin.take().ok_or_else(|| EngineError::Ipc("child stdin not piped".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| EngineError::Ipc("child stdout not piped".into()))?;

        let pending = self.pending.clone();
        let reader_task = tokio::spawn(dispatch_results(stdout, pending));

        let (queue_tx, queue_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let writer_task = tokio::spawn(write_commands(stdin, queue_rx));

        {
            let mut guard = self.handle.lock().await;
            *guard = Some(ChildHandle { child, queue_tx, reader_task, writer_task });
        }

        tokio::time::timeout(READY_TIMEOUT, self.wait_for_first_snapshot())
            .await
            .map_err(|_| EngineError::Ipc("engine process did not become ready in time".into()))?
    }

    async fn wait_for_first_snapshot(&self) -> EngineResult<()> {
        loop {
            if tokio::fs::metadata(&self.snapshot_path).await.is_ok() {
                return Ok(());
            }
            if !self.is_alive().await {
                return Err(EngineError::Ipc("engine process exited before becoming ready".into()));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn is_alive(&self) -> bool {
        let mut guard = self.handle.lock().await;
        match guard.as_mut() {
            Some(h) => matches!(h.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Restart the child if it has died. A no-op if it's still alive.
    pub async fn ensure_alive(&self) -> EngineResult<()> {
        if self.is_alive().await {
            return Ok(());
        }
        {
            let mut guard = self.handle.lock().await;
            if let Some(mut h) = guard.take() {
                h.reader_task.abort();
                h.writer_task.abort();
                let _ = h.child.start_kill();
            }
        }
        self.spawn().await
    }

    /// Enqueue `method(args)` with a monotonically increasing command
    /// id and wait up to its method-specific timeout for the matching
    /// reply. Safe to call from multiple callers concurrently — each
    /// gets exactly the result tagged with its own id.
    ///
    /// Submission itself is bounded: if the outbound queue is full
    /// (the child is saturated), this blocks for up to
    /// [`SUBMIT_TIMEOUT`] before failing with an IPC error the caller
    /// should treat as a 503-equivalent.
    pub async fn send_command(&self, method: &str, args: serde_json::Value) -> EngineResult<CommandResult> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let command = IpcCommand { id, method: method.to_string(), args };
        let mut line = serde_json::to_vec(&command)?;
        line.push(b'\n');

        let queue_tx = {
            let guard = self.handle.lock().await;
            guard.as_ref().map(|h| h.queue_tx.clone()).ok_or_else(|| EngineError::Ipc("engine process not running".into()))?
        };

        match tokio::time::timeout(SUBMIT_TIMEOUT, queue_tx.send(line)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                return Err(EngineError::Ipc("command writer task is no longer running".into()));
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(EngineError::Ipc("command queue full, engine process may be saturated".into()));
            }
        }

        match tokio::time::timeout(timeout_for(method), rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(EngineError::Ipc("result channel closed before reply arrived".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(EngineError::Ipc(format!("command '{method}' timed out")))
            }
        }
    }

    /// Read the status snapshot, serving the cached value if it's less
    /// than [`STATUS_CACHE_TTL`] old or the file can't currently be
    /// read. Never blocks on the child process itself.
    pub async fn read_snapshot(&self) -> Snapshot {
        let mut cache = self.status_cache.lock().await;
        if cache.0.elapsed() < STATUS_CACHE_TTL {
            return cache.1.clone();
        }

        match tokio::fs::read(&self.snapshot_path).await {
            Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) => {
                    *cache = (tokio::time::Instant::now(), snapshot.clone());
                    snapshot
                }
                Err(_) => cache.1.clone(),
            },
            Err(_) => cache.1.clone(),
        }
    }
}

/// Drains the bounded command queue and writes each line to the
/// child's stdin in order. Runs as its own task so a slow child never
/// blocks callers pushing onto `queue_tx` below `COMMAND_QUEUE_CAPACITY`.
async fn write_commands(mut stdin: ChildStdin, mut queue_rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(line) = queue_rx.recv().await {
        if stdin.write_all(&line).await.is_err() {
            return;
        }
        if stdin.flush().await.is_err() {
            return;
        }
    }
}

async fn dispatch_results(stdout: tokio::process::ChildStdout, pending: PendingMap) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let result: CommandResult = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed ipc result from child, ignoring");
                        continue;
                    }
                };
                if let Some(tx) = pending.lock().await.remove(&result.id) {
                    let _ = tx.send(result);
                }
            }
            Ok(None) => return, // child closed stdout
            Err(e) => {
                tracing::warn!(error = %e, "error reading ipc results from child");
                return;
            }
        }
    }
}

//! Child-process side of the engine supervisor: drains commands from
//! stdin, executes them against an [`IpcEngine`], writes replies to
//! stdout, and periodically persists a status snapshot plus (for
//! engines that have one) resume data.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::store::atomic_write;
use crate::error::EngineResult;
use crate::ipc::message::{Command, CommandResult, Snapshot};

const COMMANDS_PER_TICK: usize = 50;
const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(1500);
const RESUME_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// The engine-specific behavior the generic child loop drives. The NZB
/// and torrent engines each implement this over their own command set;
/// the loop itself (draining, snapshotting, stop handling) is shared.
#[async_trait]
pub trait IpcEngine: Send + Sync {
    async fn handle_command(&self, method: &str, args: serde_json::Value) -> EngineResult<serde_json::Value>;
    async fn snapshot(&self) -> Snapshot;
    async fn flush_resume_data(&self) -> EngineResult<()>;
}

/// Runs the command-drain/snapshot/resume-flush loop until a `stop`
/// command is received. `stdin`/`stdout` are taken as generic async
/// readers/writers so tests can drive the loop over in-memory pipes.
pub async fn run_child_loop<E, R, W>(engine: Arc<E>, stdin: R, mut stdout: W, snapshot_path: std::path::PathBuf) -> EngineResult<()>
where
    E: IpcEngine + 'static,
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    let mut lines = BufReader::new(stdin).lines();

    let mut last_snapshot = tokio::time::Instant::now() - SNAPSHOT_INTERVAL;
    let mut last_resume_flush = tokio::time::Instant::now() - RESUME_FLUSH_INTERVAL;

    loop {
        let mut drained = 0;
        let mut stop_requested = false;

        while drained < COMMANDS_PER_TICK {
            let line = match tokio::time::timeout(Duration::from_millis(50), lines.next_line()).await {
                Ok(Ok(Some(l))) => l,
                Ok(Ok(None)) => return Ok(()), // stdin closed: parent gone
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break, // no command ready within this tick's poll window
            };
            drained += 1;

            let command: Command = match serde_json::from_str(&line) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed ipc command, ignoring");
                    continue;
                }
            };

            let is_stop = command.method == "stop";
            let result = if is_stop {
                CommandResult::ok(command.id, serde_json::json!(true))
            } else {
                match engine.handle_command(&command.method, command.args).await {
                    Ok(value) => CommandResult::ok(command.id, value),
                    Err(e) => CommandResult::error(command.id, e.to_string()),
                }
            };

            write_result(&mut stdout, &result).await?;
            if is_stop {
                stop_requested = true;
                break;
            }
        }

        if stop_requested {
            return Ok(());
        }

        if last_snapshot.elapsed() >= SNAPSHOT_INTERVAL {
            write_snapshot(&engine, &snapshot_path).await?;
            last_snapshot = tokio::time::Instant::now();
        }

        if last_resume_flush.elapsed() >= RESUME_FLUSH_INTERVAL {
            engine.flush_resume_data().await?;
            last_resume_flush = tokio::time::Instant::now();
        }
    }
}

async fn write_result<W: tokio::io::AsyncWrite + Unpin>(stdout: &mut W, result: &CommandResult) -> EngineResult<()> {
    let mut line = serde_json::to_vec(result)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}

async fn write_snapshot<E: IpcEngine>(engine: &Arc<E>, path: &std::path::Path) -> EngineResult<()> {
    let snapshot = engine.snapshot().await;
    let bytes = serde_json::to_vec(&snapshot)?;
    atomic_write(path, &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::duplex;

    struct CountingEngine {
        calls: AtomicU32,
    }

    #[async_trait]
    impl IpcEngine for CountingEngine {
        async fn handle_command(&self, method: &str, _args: serde_json::Value) -> EngineResult<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "echo": method }))
        }

        async fn snapshot(&self) -> Snapshot {
            Snapshot::empty()
        }

        async fn flush_resume_data(&self) -> EngineResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn stop_command_ends_the_loop_and_replies_once() {
        let engine = Arc::new(CountingEngine { calls: AtomicU32::new(0) });
        let (mut client, server) = duplex(4096);
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("status.json");

        let (read_half, write_half) = tokio::io::split(server);
        let handle = tokio::spawn(run_child_loop(engine.clone(), read_half, write_half, snapshot_path));

        client.write_all(br#"{"id":1,"method":"get_status","args":null}"#).await.unwrap();
        client.write_all(b"\n").await.unwrap();
        client.write_all(br#"{"id":2,"method":"stop","args":null}"#).await.unwrap();
        client.write_all(b"\n").await.unwrap();

        let mut buf = Vec::new();
        let mut reader = BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        buf.push(line.clone());
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        buf.push(line);

        handle.await.unwrap().unwrap();

        assert!(buf[0].contains("\"echo\":\"get_status\""));
        assert!(buf[1].contains("\"success\":true"));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }
}

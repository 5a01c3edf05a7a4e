//! `torrent-engine`: the supervised child process wrapping [`TorrentEngine`].
//!
//! Reads static config from `<state-dir>/config.json`, persists its item
//! map and resume files under the same directory, and drives the
//! command/snapshot loop over its own stdin/stdout per spec.md §4.7.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use huntarr_engines::config::TorrentEngineConfig;
use huntarr_engines::error::{EngineError, EngineResult, Outcome};
use huntarr_engines::ipc::{run_child_loop, IpcEngine, Snapshot};
use huntarr_engines::torrent::{TorrentEngine, TorrentSource, TorrentState};
use serde_json::json;

#[derive(Parser)]
struct Args {
    /// Directory holding this instance's config.json, state.json, and
    /// resume/ files.
    #[arg(long)]
    state_dir: PathBuf,
}

struct TorrentIpcEngine {
    engine: Arc<TorrentEngine>,
    resume_dir: PathBuf,
}

/// Folds an [`Outcome<T>`] into the IPC command-result shape: `Ok`
/// serializes the payload, `Rejected`/`Retry`/`Failed` all surface as an
/// error result since the IPC wire format has no room for a third state.
fn outcome_to_result<T: serde::Serialize>(outcome: Outcome<T>) -> EngineResult<serde_json::Value> {
    match outcome {
        Outcome::Ok(v) => Ok(json!(v)),
        Outcome::Rejected(m) | Outcome::Retry(m) | Outcome::Failed(m) => Err(EngineError::StateConflict(m)),
    }
}

impl TorrentIpcEngine {
    async fn add_torrent(&self, args: serde_json::Value) -> EngineResult<serde_json::Value> {
        let category = args.get("category").and_then(|v| v.as_str()).unwrap_or("default").to_string();
        let save_path = args.get("save_path").and_then(|v| v.as_str()).map(String::from);
        let name_hint = args.get("name").and_then(|v| v.as_str()).map(String::from);

        let source = if let Some(magnet) = args.get("magnet").and_then(|v| v.as_str()) {
            TorrentSource::Magnet(magnet.to_string())
        } else if let Some(b64) = args.get("torrent_file_b64").and_then(|v| v.as_str()) {
            use base64::Engine;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| EngineError::Config(format!("invalid base64 torrent file: {e}")))?;
            TorrentSource::TorrentFile(bytes)
        } else {
            return Err(EngineError::Config("add_torrent requires magnet or torrent_file_b64".into()));
        };

        outcome_to_result(self.engine.add_torrent(source, category, save_path, name_hint).await)
    }

    fn pause_item(&self, args: &serde_json::Value) -> EngineResult<serde_json::Value> {
        let id = args.get("id").and_then(|v| v.as_str()).ok_or_else(|| EngineError::Config("pause_item requires id".into()))?;
        outcome_to_result(self.engine.pause_item(id))
    }

    fn resume_item(&self, args: &serde_json::Value) -> EngineResult<serde_json::Value> {
        let id = args.get("id").and_then(|v| v.as_str()).ok_or_else(|| EngineError::Config("resume_item requires id".into()))?;
        outcome_to_result(self.engine.resume_item(id))
    }

    async fn remove_item(&self, args: &serde_json::Value) -> EngineResult<serde_json::Value> {
        let id = args.get("id").and_then(|v| v.as_str()).ok_or_else(|| EngineError::Config("remove_item requires id".into()))?;
        let delete_files = args.get("delete_files").and_then(|v| v.as_bool()).unwrap_or(false);
        outcome_to_result(self.engine.remove_item(id, delete_files).await)
    }
}

#[async_trait]
impl IpcEngine for TorrentIpcEngine {
    async fn handle_command(&self, method: &str, args: serde_json::Value) -> EngineResult<serde_json::Value> {
        match method {
            "add_torrent" => self.add_torrent(args).await,
            "pause_item" => self.pause_item(&args),
            "resume_item" => self.resume_item(&args),
            "remove_item" => self.remove_item(&args).await,
            "pause_all" => {
                self.engine.pause_all();
                Ok(json!(true))
            }
            "resume_all" => {
                self.engine.resume_all();
                Ok(json!(true))
            }
            other => Err(EngineError::Ipc(format!("unknown command: {other}"))),
        }
    }

    async fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: json!({ "state": "running" }),
            queue: json!(self.engine.state().snapshot_items()),
            history: json!(self.engine.state().snapshot_history()),
            ts: now_iso8601(),
        }
    }

    async fn flush_resume_data(&self) -> EngineResult<()> {
        self.engine.flush_resume_data(&self.resume_dir).await
    }
}

fn now_iso8601() -> String {
    let secs = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    format!("unix:{secs}")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args = Args::parse();
    tokio::fs::create_dir_all(&args.state_dir).await?;

    let config_bytes = tokio::fs::read(args.state_dir.join("config.json")).await?;
    let config: TorrentEngineConfig = serde_json::from_slice(&config_bytes)?;

    let state = Arc::new(TorrentState::load(args.state_dir.join("state.json")).await?);
    let engine = Arc::new(TorrentEngine::new(config, state).await?);

    let resume_dir = args.state_dir.join("resume");
    let rehydrated = engine.rehydrate(&resume_dir).await?;
    if rehydrated > 0 {
        tracing::info!(count = rehydrated, "rehydrated torrents from resume data");
    }

    tokio::spawn(engine.clone().run_sync_loop());
    tokio::spawn(engine.clone().run_resume_flush_loop(resume_dir.clone()));

    let ipc_engine = Arc::new(TorrentIpcEngine { engine, resume_dir });
    let snapshot_path = args.state_dir.join("status.json");

    run_child_loop(ipc_engine, tokio::io::stdin(), tokio::io::stdout(), snapshot_path).await?;
    Ok(())
}

//! `nzb-engine`: the supervised child process wrapping [`DownloadEngine`].
//!
//! Reads static config from `<state-dir>/config.json`, persists its queue
//! and bandwidth history under the same directory, and drives the
//! command/snapshot loop over its own stdin/stdout per spec.md §4.7.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use huntarr_engines::config::NzbEngineConfig;
use huntarr_engines::download::{BandwidthHistory, DownloadEngine, DownloadItem, DownloadQueue};
use huntarr_engines::error::{EngineError, EngineResult};
use huntarr_engines::ipc::{run_child_loop, IpcEngine, Snapshot};
use huntarr_engines::nntp::{Dispatcher, ServerPool};
use serde_json::json;

#[derive(Parser)]
struct Args {
    /// Directory holding this instance's config.json, queue.json,
    /// bandwidth.json, and status.json.
    #[arg(long)]
    state_dir: PathBuf,
}

struct NzbIpcEngine {
    queue: Arc<DownloadQueue>,
    bandwidth: Arc<BandwidthHistory>,
    dispatcher: Arc<Dispatcher>,
}

impl NzbIpcEngine {
    fn add_nzb(&self, args: serde_json::Value) -> EngineResult<serde_json::Value> {
        let name = args.get("name").and_then(|v| v.as_str()).ok_or_else(|| EngineError::Config("add_nzb requires name".into()))?;
        let category = args.get("category").and_then(|v| v.as_str()).unwrap_or("default");
        let nzb_content = args.get("nzb_content").and_then(|v| v.as_str()).ok_or_else(|| EngineError::Config("add_nzb requires nzb_content".into()))?;
        let priority = args.get("priority").and_then(|v| v.as_str()).unwrap_or("normal");

        let item = DownloadItem::new(name, category, nzb_content, priority, now_iso8601());
        let id = item.id.clone();
        self.queue.push(item);
        Ok(json!({ "id": id }))
    }

    fn get_queue(&self) -> serde_json::Value {
        json!(self.queue.snapshot_queue())
    }

    fn get_history(&self) -> serde_json::Value {
        json!(self.queue.snapshot_history())
    }

    fn get_item(&self, args: serde_json::Value) -> EngineResult<serde_json::Value> {
        let id = args.get("id").and_then(|v| v.as_str()).ok_or_else(|| EngineError::Config("get_item requires id".into()))?;
        match self.queue.get(id) {
            Some(item) => Ok(json!(item)),
            None => Err(EngineError::StateConflict(format!("unknown item {id}"))),
        }
    }

    fn set_paused(&self, args: serde_json::Value, paused: bool) -> EngineResult<serde_json::Value> {
        let id = args.get("id").and_then(|v| v.as_str()).ok_or_else(|| EngineError::Config("requires id".into()))?;
        let target = if paused { huntarr_engines::download::DownloadState::Paused } else { huntarr_engines::download::DownloadState::Downloading };
        let ok = self.queue.update(id, |item| {
            let _ = item.try_transition(target);
        });
        if ok {
            Ok(json!(true))
        } else {
            Err(EngineError::StateConflict(format!("unknown item {id}")))
        }
    }

    fn remove(&self, args: serde_json::Value) -> EngineResult<serde_json::Value> {
        let id = args.get("id").and_then(|v| v.as_str()).ok_or_else(|| EngineError::Config("remove requires id".into()))?;
        match self.queue.remove(id) {
            Some(_) => Ok(json!(true)),
            None => Err(EngineError::StateConflict(format!("unknown item {id}"))),
        }
    }

    fn get_bandwidth(&self) -> serde_json::Value {
        json!(self.bandwidth.get_all_stats(&self.dispatcher.bandwidth_by_server()))
    }

    async fn test_servers(&self) -> serde_json::Value {
        let results = self.dispatcher.test_all().await;
        json!(results
            .into_iter()
            .map(|(name, result)| json!({ "server": name, "ok": result.unwrap_or(false) }))
            .collect::<Vec<_>>())
    }
}

#[async_trait]
impl IpcEngine for NzbIpcEngine {
    async fn handle_command(&self, method: &str, args: serde_json::Value) -> EngineResult<serde_json::Value> {
        match method {
            "add_nzb" => self.add_nzb(args),
            "get_queue" => Ok(self.get_queue()),
            "get_history" => Ok(self.get_history()),
            "get_item" => self.get_item(args),
            "pause" => self.set_paused(args, true),
            "resume" => self.set_paused(args, false),
            "remove" => self.remove(args),
            "test_servers" => Ok(self.test_servers().await),
            "get_bandwidth" => Ok(self.get_bandwidth()),
            other => Err(EngineError::Ipc(format!("unknown command: {other}"))),
        }
    }

    async fn snapshot(&self) -> Snapshot {
        let statuses: Vec<_> = self.dispatcher.pool_statuses();
        Snapshot {
            status: json!({ "state": "running", "pools": statuses }),
            queue: self.get_queue(),
            history: self.get_history(),
            ts: now_iso8601(),
        }
    }

    async fn flush_resume_data(&self) -> EngineResult<()> {
        self.queue.save().await
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
    let config: NzbEngineConfig = serde_json::from_slice(&config_bytes)?;

    let mut pools = Vec::with_capacity(config.servers.len());
    for server in &config.servers {
        if server.enabled {
            pools.push(Arc::new(ServerPool::new(server.clone(), None)?));
        }
    }
    let dispatcher = Arc::new(Dispatcher::new(pools));

    let queue = Arc::new(DownloadQueue::load(args.state_dir.join("queue.json")).await?);
    let bandwidth = Arc::new(BandwidthHistory::load(args.state_dir.join("bandwidth.json")).await?);

    let download_engine = Arc::new(DownloadEngine::new(config, dispatcher.clone(), queue.clone(), bandwidth.clone()));
    tokio::spawn(download_engine.run());

    let engine = Arc::new(NzbIpcEngine { queue, bandwidth, dispatcher });
    let snapshot_path = args.state_dir.join("status.json");

    run_child_loop(engine, tokio::io::stdin(), tokio::io::stdout(), snapshot_path).await?;
    Ok(())
}

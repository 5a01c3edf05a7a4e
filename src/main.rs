//! `huntctl`: a local-development stand-in for the parent/API process
//! this crate is built to be embedded in (spec.md explicitly puts an
//! HTTP surface out of scope). It reads one `huntctl.toml`, spawns the
//! `nzb-engine` and `torrent-engine` child processes under
//! [`spawn_supervisor`], wires an [`AcquisitionOrchestrator`] on top of
//! them plus whatever external download clients are configured, and
//! either runs the whole stack in the foreground or drives one
//! acquisition attempt and exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use huntarr_engines::config::{NzbEngineConfig, TorrentEngineConfig};
use huntarr_engines::error::Outcome;
use huntarr_engines::indexer::{IndexerClient, IndexerConfig};
use huntarr_engines::ipc::{spawn_supervisor, EngineProxy};
use huntarr_engines::orchestrator::{AcquisitionOrchestrator, DownloadClient, GrabResult, LoggingImporter, NzbEngineClient, NzbgetClient, QbitClient, SabnzbdClient};
use huntarr_engines::scoring::{CustomFormat, QualityProfile};

#[derive(Parser)]
#[command(name = "huntctl", about = "Supervises the NZB and torrent acquisition engines and drives release acquisition")]
struct Cli {
    /// Directory holding huntctl.toml plus each engine's own state subdirectory.
    #[arg(long, default_value = "./huntarr-state")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Spawn both engines and the orchestrator's completion poller, printing
    /// status until interrupted. This is the default when no subcommand is given.
    Run,
    /// Run one acquisition attempt for a title/year against the configured
    /// quality profile and indexers, print the outcome, then exit.
    Grab {
        title: String,
        #[arg(long)]
        year: Option<u32>,
        #[arg(long, default_value = "default")]
        category: String,
    },
}

/// One externally-hosted download client huntctl should submit releases
/// to in addition to its own in-process `nzb-engine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExternalClientConfig {
    name: String,
    /// `"sabnzbd"`, `"nzbget"`, or `"qbittorrent"`.
    kind: String,
    base_url: String,
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

/// `<state-dir>/huntctl.toml`: the one static document this binary reads
/// for itself; everything the engines need is nested inside it and
/// re-serialized as each child's own `config.json` on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HuntctlConfig {
    nzb_engine: NzbEngineConfig,
    torrent_engine: TorrentEngineConfig,
    #[serde(default)]
    indexers: Vec<IndexerConfig>,
    #[serde(default)]
    custom_formats: Vec<CustomFormat>,
    quality_profile: QualityProfile,
    #[serde(default)]
    external_clients: Vec<ExternalClientConfig>,
    #[serde(default)]
    nzb_engine_binary: Option<PathBuf>,
    #[serde(default)]
    torrent_engine_binary: Option<PathBuf>,
}

/// Resolve an engine binary path: explicit config wins, otherwise look
/// next to this executable (the layout `cargo build` produces).
fn resolve_binary(configured: &Option<PathBuf>, name: &str) -> anyhow::Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.clone());
    }
    let exe = std::env::current_exe().context("resolving huntctl's own executable path")?;
    let dir = exe.parent().context("huntctl executable has no parent directory")?;
    Ok(dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX)))
}

struct SupervisedEngine {
    proxy: Arc<EngineProxy>,
    supervisor: tokio::task::JoinHandle<()>,
}

impl SupervisedEngine {
    /// Write `config` as the child's `config.json`, spawn it under
    /// `binary --state-dir <dir>`, wait for its first snapshot, then
    /// start the background task that restarts it if it dies.
    async fn start(binary: PathBuf, state_dir: &Path, config: &impl Serialize) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(state_dir).await?;
        let bytes = serde_json::to_vec_pretty(config)?;
        tokio::fs::write(state_dir.join("config.json"), bytes).await?;

        let args = vec!["--state-dir".to_string(), state_dir.display().to_string()];
        let proxy = Arc::new(EngineProxy::new(binary, args, state_dir.join("status.json")));
        proxy.spawn().await.with_context(|| format!("spawning engine child under {}", state_dir.display()))?;

        let supervisor = spawn_supervisor(proxy.clone());
        Ok(Self { proxy, supervisor })
    }

    async fn shutdown(self) {
        let _ = self.proxy.send_command("stop", serde_json::Value::Null).await;
        self.supervisor.abort();
    }
}

async fn build_orchestrator(config: &HuntctlConfig, nzb_proxy: Arc<EngineProxy>) -> Arc<AcquisitionOrchestrator> {
    let mut clients: Vec<Arc<dyn DownloadClient>> = vec![Arc::new(NzbEngineClient::new("nzb-engine", nzb_proxy))];

    for ext in config.external_clients.iter().filter(|c| c.enabled) {
        let client: Arc<dyn DownloadClient> = match ext.kind.as_str() {
            "sabnzbd" => Arc::new(SabnzbdClient::new(ext.name.clone(), ext.base_url.clone(), ext.api_key.clone())),
            "nzbget" => Arc::new(NzbgetClient::new(ext.name.clone(), ext.base_url.clone(), &ext.username, &ext.password)),
            "qbittorrent" => Arc::new(QbitClient::new(ext.name.clone(), ext.base_url.clone(), ext.username.clone(), ext.password.clone())),
            other => {
                tracing::warn!(kind = other, name = %ext.name, "unknown external client kind, skipping");
                continue;
            }
        };
        clients.push(client);
    }

    let indexer_client = Arc::new(IndexerClient::new());
    Arc::new(AcquisitionOrchestrator::new(indexer_client, config.indexers.clone(), config.custom_formats.clone(), clients, Arc::new(LoggingImporter)))
}

fn print_grab_outcome(title: &str, outcome: Outcome<GrabResult>) {
    match outcome {
        Outcome::Ok(result) => println!("grabbed \"{title}\" -> client={} queue_id={} score={}", result.client_name, result.entry.queue_id, result.entry.score),
        Outcome::Rejected(msg) => println!("rejected \"{title}\": {msg}"),
        Outcome::Retry(msg) => println!("transient failure grabbing \"{title}\", retry later: {msg}"),
        Outcome::Failed(msg) => println!("failed grabbing \"{title}\": {msg}"),
    }
}

async fn run_forever(nzb: &SupervisedEngine, torrent: &SupervisedEngine, orchestrator: Arc<AcquisitionOrchestrator>) -> anyhow::Result<()> {
    let poll_handle = huntarr_engines::orchestrator::spawn_poll_loop(orchestrator);

    tracing::info!("huntctl running; both engines supervised, completion poller active");
    let mut status_tick = tokio::time::interval(Duration::from_secs(10));

    loop {
        tokio::select! {
            _ = status_tick.tick() => {
                let nzb_snapshot = nzb.proxy.read_snapshot().await;
                let torrent_snapshot = torrent.proxy.read_snapshot().await;
                tracing::info!(nzb_status = %nzb_snapshot.status, torrent_status = %torrent_snapshot.status, "engine status");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down engines");
                poll_handle.abort();
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    tokio::fs::create_dir_all(&cli.state_dir).await?;

    let config_path = cli.state_dir.join("huntctl.toml");
    let config_text = tokio::fs::read_to_string(&config_path)
        .await
        .with_context(|| format!("reading {} (see README.md for the expected layout)", config_path.display()))?;
    let config: HuntctlConfig = toml::from_str(&config_text).context("parsing huntctl.toml")?;

    let nzb_binary = resolve_binary(&config.nzb_engine_binary, "nzb-engine")?;
    let torrent_binary = resolve_binary(&config.torrent_engine_binary, "torrent-engine")?;

    let nzb_engine = SupervisedEngine::start(nzb_binary, &cli.state_dir.join("nzb"), &config.nzb_engine).await?;
    let torrent_engine = SupervisedEngine::start(torrent_binary, &cli.state_dir.join("torrent"), &config.torrent_engine).await?;

    let orchestrator = build_orchestrator(&config, nzb_engine.proxy.clone()).await;

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_forever(&nzb_engine, &torrent_engine, orchestrator).await,
        Command::Grab { title, year, category } => {
            let outcome = orchestrator.grab_for_item(&title, year, &config.quality_profile, &category).await;
            print_grab_outcome(&title, outcome);
            Ok(())
        }
    };

    nzb_engine.shutdown().await;
    torrent_engine.shutdown().await;
    result
}

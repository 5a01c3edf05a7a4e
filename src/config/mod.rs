//! Static engine configuration and the pluggable per-instance document
//! store.
//!
//! `store` implements the `ConfigStore` abstraction from the
//! specification: the engines only ever see a trait, never a filesystem
//! path, so the host application can swap in a database-backed store
//! without touching engine code.

pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub use store::{ConfigStore, FileConfigStore};

/// One configured NNTP server (spec.md §3 "NNTP Server Config").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub verify_ssl_certs: bool,
    pub max_connections: u16,
    /// Lower is preferred.
    pub priority: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Tuning knobs for the NZB download engine's worker loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NzbEngineConfig {
    pub servers: Vec<ServerConfig>,
    pub temp_dir: PathBuf,
    pub download_dir: PathBuf,
    /// category -> final directory override
    #[serde(default)]
    pub category_dirs: HashMap<String, PathBuf>,
    #[serde(default = "default_pipeline_size")]
    pub pipeline_size: usize,
    #[serde(default = "default_connection_wait_timeout")]
    pub connection_wait_timeout_secs: u64,
    pub post_processing: PostProcessingConfig,
}

fn default_pipeline_size() -> usize {
    16
}

fn default_connection_wait_timeout() -> u64 {
    60
}

/// Controls for the post-processing pipeline (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessingConfig {
    #[serde(default = "default_true")]
    pub auto_par2_repair: bool,
    #[serde(default = "default_true")]
    pub delete_par2_after_repair: bool,
    #[serde(default = "default_true")]
    pub auto_extract_rar: bool,
    #[serde(default = "default_true")]
    pub delete_rar_after_extract: bool,
    #[serde(default = "default_true")]
    pub deobfuscate_file_names: bool,
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold: u64,
}

fn default_large_file_threshold() -> u64 {
    100 * 1024 * 1024
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            auto_par2_repair: true,
            delete_par2_after_repair: true,
            auto_extract_rar: true,
            delete_rar_after_extract: true,
            deobfuscate_file_names: true,
            large_file_threshold: default_large_file_threshold(),
        }
    }
}

/// Config for the BitTorrent session wrapper (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentEngineConfig {
    pub listen_port: u16,
    pub download_dir: PathBuf,
    pub temp_dir: PathBuf,
    #[serde(default = "default_active_limit")]
    pub active_downloads: u32,
    #[serde(default = "default_active_limit")]
    pub active_seeds: u32,
    #[serde(default = "default_active_limit")]
    pub active_limit: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_true")]
    pub enable_dht: bool,
    #[serde(default = "default_true")]
    pub enable_lsd: bool,
    #[serde(default)]
    pub enable_upnp: bool,
    #[serde(default)]
    pub enable_natpmp: bool,
    pub seed_ratio_limit: Option<f64>,
    pub seed_time_limit_secs: Option<u64>,
}

fn default_active_limit() -> u32 {
    5
}

fn default_max_connections() -> u32 {
    200
}

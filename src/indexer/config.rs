//! Per-indexer configuration (spec.md §3 "Indexer Config").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub name: String,
    pub preset: String,
    pub base_url: String,
    #[serde(default = "default_api_path")]
    pub api_path: String,
    pub api_key: String,
    #[serde(default)]
    pub categories: Vec<String>,
    /// 1-99, ascending = more preferred (spec.md §4.10.5).
    pub priority: u8,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_api_path() -> String {
    "/api".to_string()
}

fn default_true() -> bool {
    true
}

impl IndexerConfig {
    pub fn search_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.api_path)
    }
}

//! `TorrentItem` and the session-state mapping table from spec.md §4.6.

use serde::{Deserialize, Serialize};

/// Mirrors the "Session state -> TorrentItem.status" table in spec.md
/// §4.6: every status the state-sync loop can assign to a torrent it is
/// tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentStatus {
    Metadata,
    Checking,
    Downloading,
    Paused,
    Seeding,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentItem {
    pub id: String,
    /// Lowercase hex, 40 chars for v1 info-hashes.
    pub info_hash: String,
    pub name: String,
    pub category: String,
    pub save_path: String,
    pub status: TorrentStatus,
    /// `[0, 1]`.
    pub progress: f64,
    pub dl_speed: u64,
    pub up_speed: u64,
    pub num_seeds: u32,
    pub num_peers: u32,
    pub eta_seconds: f64,
    pub ratio: f64,
    pub content_path: Option<String>,
    pub added_at: String,
    pub completed_at: Option<String>,
    #[serde(default)]
    pub error_message: String,
}

impl TorrentItem {
    pub fn new(id: impl Into<String>, info_hash: impl Into<String>, name: impl Into<String>, category: impl Into<String>, save_path: impl Into<String>, added_at: String) -> Self {
        Self {
            id: id.into(),
            info_hash: info_hash.into(),
            name: name.into(),
            category: category.into(),
            save_path: save_path.into(),
            status: TorrentStatus::Metadata,
            progress: 0.0,
            dl_speed: 0,
            up_speed: 0,
            num_seeds: 0,
            num_peers: 0,
            eta_seconds: 0.0,
            ratio: 0.0,
            content_path: None,
            added_at,
            completed_at: None,
            error_message: String::new(),
        }
    }
}

/// A completed/errored torrent, pushed to the size-capped history ring
/// (spec.md §3 "History Entry", ≤500 for torrents).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentHistoryEntry {
    pub id: String,
    pub hash: Option<String>,
    pub name: String,
    pub category: String,
    pub completed_at: String,
    pub state: TorrentStatus,
    pub content_path: Option<String>,
    pub save_path: String,
    pub size: u64,
}

impl From<&TorrentItem> for TorrentHistoryEntry {
    fn from(item: &TorrentItem) -> Self {
        Self {
            id: item.id.clone(),
            hash: Some(item.info_hash.clone()),
            name: item.name.clone(),
            category: item.category.clone(),
            completed_at: item.completed_at.clone().unwrap_or_default(),
            state: item.status,
            content_path: item.content_path.clone(),
            save_path: item.save_path.clone(),
            size: 0,
        }
    }
}

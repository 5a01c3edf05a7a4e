//! Mutex-protected torrent item map plus the size-capped history ring,
//! persisted as one atomically-written JSON document.
//!
//! Shape matches spec.md §6: `{items: {id: Item}, hash_to_id: {...}}`.
//! `hash_to_id` is rebuilt on load rather than persisted redundantly.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::store::atomic_write;
use crate::error::EngineResult;
use crate::torrent::item::{TorrentHistoryEntry, TorrentItem};

const HISTORY_CAPACITY: usize = 500;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TorrentDocument {
    items: HashMap<String, TorrentItem>,
    history: Vec<TorrentHistoryEntry>,
}

pub struct TorrentState {
    path: PathBuf,
    items: Mutex<HashMap<String, TorrentItem>>,
    hash_to_id: Mutex<HashMap<String, String>>,
    history: Mutex<VecDeque<TorrentHistoryEntry>>,
}

impl TorrentState {
    pub async fn load(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<TorrentDocument>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TorrentDocument::default(),
            Err(e) => return Err(e.into()),
        };

        let hash_to_id = doc.items.iter().map(|(id, item)| (item.info_hash.clone(), id.clone())).collect();

        Ok(Self {
            path,
            items: Mutex::new(doc.items),
            hash_to_id: Mutex::new(hash_to_id),
            history: Mutex::new(doc.history.into_iter().collect()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `StateConflict` on duplicate `info_hash` per spec.md §4.6.
    pub fn insert_if_new(&self, item: TorrentItem) -> Result<(), String> {
        let mut hash_to_id = self.hash_to_id.lock().unwrap();
        if hash_to_id.contains_key(&item.info_hash) {
            return Err(format!("torrent with info_hash {} already queued", item.info_hash));
        }
        hash_to_id.insert(item.info_hash.clone(), item.id.clone());
        self.items.lock().unwrap().insert(item.id.clone(), item);
        Ok(())
    }

    pub fn by_hash(&self, info_hash: &str) -> Option<String> {
        self.hash_to_id.lock().unwrap().get(info_hash).cloned()
    }

    pub fn get(&self, id: &str) -> Option<TorrentItem> {
        self.items.lock().unwrap().get(id).cloned()
    }

    pub fn update(&self, id: &str, f: impl FnOnce(&mut TorrentItem)) -> bool {
        let mut items = self.items.lock().unwrap();
        match items.get_mut(id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<TorrentItem> {
        let item = self.items.lock().unwrap().remove(id)?;
        self.hash_to_id.lock().unwrap().remove(&item.info_hash);
        Some(item)
    }

    pub fn snapshot_items(&self) -> Vec<TorrentItem> {
        self.items.lock().unwrap().values().cloned().collect()
    }

    pub fn snapshot_history(&self) -> Vec<TorrentHistoryEntry> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    /// Push a completed/errored item into the size-capped history ring.
    /// Unlike the NZB queue, torrents stay in `items` after completion
    /// (still visible in the UI as seeding) — history is purely additive.
    pub fn push_history(&self, entry: TorrentHistoryEntry) {
        let mut history = self.history.lock().unwrap();
        history.push_back(entry);
        while history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }
    }

    pub async fn save(&self) -> EngineResult<()> {
        let doc = TorrentDocument { items: self.items.lock().unwrap().clone(), history: self.snapshot_history() };
        let bytes = serde_json::to_vec_pretty(&doc)?;
        atomic_write(&self.path, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::item::TorrentStatus;

    fn item(hash: &str) -> TorrentItem {
        TorrentItem::new(format!("id-{hash}"), hash, "Foo", "movies", "/downloads", "now".into())
    }

    #[tokio::test]
    async fn duplicate_info_hash_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = TorrentState::load(dir.path().join("state.json")).await.unwrap();
        state.insert_if_new(item("abc123")).unwrap();
        let err = state.insert_if_new(item("abc123")).unwrap_err();
        assert!(err.contains("abc123"));
    }

    #[tokio::test]
    async fn history_caps_at_500() {
        let dir = tempfile::tempdir().unwrap();
        let state = TorrentState::load(dir.path().join("state.json")).await.unwrap();
        for i in 0..520 {
            let it = item(&format!("hash-{i}"));
            state.push_history(TorrentHistoryEntry::from(&it));
        }
        assert_eq!(state.snapshot_history().len(), 500);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_hash_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = TorrentState::load(&path).await.unwrap();
        state.insert_if_new(item("deadbeef")).unwrap();
        state.save().await.unwrap();

        let reloaded = TorrentState::load(&path).await.unwrap();
        assert_eq!(reloaded.by_hash("deadbeef"), Some("id-deadbeef".to_string()));
        assert_eq!(reloaded.get("id-deadbeef").unwrap().status, TorrentStatus::Metadata);
    }
}

//! Mutex-protected download queue and completion history, persisted as
//! one atomically-written JSON document.
//!
//! Shape matches spec.md §6's "Persisted state files" note:
//! `{queue: [Item], history: [Item ≤ 100], servers: {...}}`.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::store::atomic_write;
use crate::download::item::DownloadItem;
use crate::error::EngineResult;

const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    queue: Vec<DownloadItem>,
    history: Vec<DownloadItem>,
}

pub struct DownloadQueue {
    path: PathBuf,
    queue: Mutex<Vec<DownloadItem>>,
    history: Mutex<VecDeque<DownloadItem>>,
}

impl DownloadQueue {
    /// Load an existing queue document from `path`, or start empty if it
    /// doesn't exist yet.
    pub async fn load(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<QueueDocument>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => QueueDocument::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            queue: Mutex::new(doc.queue),
            history: Mutex::new(doc.history.into_iter().collect()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push(&self, item: DownloadItem) {
        self.queue.lock().unwrap().push(item);
    }

    pub fn remove(&self, id: &str) -> Option<DownloadItem> {
        let mut queue = self.queue.lock().unwrap();
        let idx = queue.iter().position(|i| i.id == id)?;
        Some(queue.remove(idx))
    }

    pub fn get(&self, id: &str) -> Option<DownloadItem> {
        self.queue.lock().unwrap().iter().find(|i| i.id == id).cloned()
    }

    pub fn update(&self, id: &str, f: impl FnOnce(&mut DownloadItem)) -> bool {
        let mut queue = self.queue.lock().unwrap();
        match queue.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    pub fn snapshot_queue(&self) -> Vec<DownloadItem> {
        self.queue.lock().unwrap().clone()
    }

    pub fn snapshot_history(&self) -> Vec<DownloadItem> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    /// Move an item from the queue into the (size-capped) history ring,
    /// dropping the oldest entry once it's full.
    pub fn retire(&self, id: &str) -> Option<DownloadItem> {
        let item = self.remove(id)?;
        let mut history = self.history.lock().unwrap();
        history.push_back(item.clone());
        while history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }
        Some(item)
    }

    /// Next queued item not currently paused, in insertion order.
    pub fn next_queued(&self) -> Option<DownloadItem> {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.state == crate::download::item::DownloadState::Queued)
            .cloned()
    }

    pub async fn save(&self) -> EngineResult<()> {
        let doc = QueueDocument { queue: self.snapshot_queue(), history: self.snapshot_history() };
        let bytes = serde_json::to_vec_pretty(&doc)?;
        atomic_write(&self.path, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> DownloadItem {
        DownloadItem::new(name, "movies", "", "normal", "now".into())
    }

    #[tokio::test]
    async fn retiring_caps_history_at_100() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DownloadQueue::load(dir.path().join("queue.json")).await.unwrap();
        for i in 0..110 {
            let it = item(&format!("item-{i}"));
            let id = it.id.clone();
            queue.push(it);
            queue.retire(&id);
        }
        assert_eq!(queue.snapshot_history().len(), 100);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let queue = DownloadQueue::load(&path).await.unwrap();
        queue.push(item("one"));
        queue.save().await.unwrap();

        let reloaded = DownloadQueue::load(&path).await.unwrap();
        assert_eq!(reloaded.snapshot_queue().len(), 1);
        assert_eq!(reloaded.snapshot_queue()[0].name, "one");
    }
}

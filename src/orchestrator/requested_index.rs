//! Per-client index of queue ids the orchestrator itself submitted, so
//! the completion poller can tell "ours" apart from anything a user
//! added to the same client directly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedEntry {
    pub queue_id: String,
    pub title: String,
    pub year: Option<u32>,
    pub score: i64,
    pub score_breakdown: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestedIndex {
    entries: Vec<RequestedEntry>,
}

impl RequestedIndex {
    pub fn insert(&mut self, entry: RequestedEntry) {
        self.entries.retain(|e| e.queue_id != entry.queue_id);
        self.entries.push(entry);
    }

    pub fn remove(&mut self, queue_id: &str) -> Option<RequestedEntry> {
        let pos = self.entries.iter().position(|e| e.queue_id == queue_id)?;
        Some(self.entries.remove(pos))
    }

    pub fn get(&self, queue_id: &str) -> Option<&RequestedEntry> {
        self.entries.iter().find(|e| e.queue_id == queue_id)
    }

    pub fn queue_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.queue_id.as_str())
    }

    /// Ids present in this index but absent from `live_queue_ids` — the
    /// poller treats each as "dropped off the client queue", meaning it
    /// either completed or failed.
    pub fn ids_missing_from<'a>(&'a self, live_queue_ids: &'a [String]) -> Vec<&'a str> {
        self.entries.iter().map(|e| e.queue_id.as_str()).filter(|id| !live_queue_ids.iter().any(|live| live == id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> RequestedEntry {
        RequestedEntry { queue_id: id.to_string(), title: "t".into(), year: None, score: 0, score_breakdown: "-".into() }
    }

    #[test]
    fn insert_replaces_existing_entry_with_same_id() {
        let mut idx = RequestedIndex::default();
        idx.insert(entry("a"));
        idx.insert(RequestedEntry { score: 10, ..entry("a") });
        assert_eq!(idx.get("a").unwrap().score, 10);
        assert_eq!(idx.queue_ids().count(), 1);
    }

    #[test]
    fn ids_missing_from_detects_dropped_entries() {
        let mut idx = RequestedIndex::default();
        idx.insert(entry("a"));
        idx.insert(entry("b"));
        let live = vec!["b".to_string()];
        assert_eq!(idx.ids_missing_from(&live), vec!["a"]);
    }
}

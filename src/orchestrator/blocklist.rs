//! Release blocklist: titles the orchestrator should never re-grab,
//! either because a client reported a permanent failure for them or
//! because an operator blocked them by hand.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocklistEntry {
    pub source_title: String,
    pub reason: String,
    pub added_at: String,
}

/// Uniqueness is by lowercased, trimmed `source_title` — re-blocking an
/// already-blocked release (possibly with a different-case title) just
/// replaces the reason rather than growing the list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Blocklist {
    entries: Vec<BlocklistEntry>,
}

fn normalize(title: &str) -> String {
    title.trim().to_lowercase()
}

impl Blocklist {
    pub fn add(&mut self, source_title: &str, reason: impl Into<String>, added_at: impl Into<String>) {
        let key = normalize(source_title);
        if let Some(existing) = self.entries.iter_mut().find(|e| normalize(&e.source_title) == key) {
            existing.reason = reason.into();
            existing.added_at = added_at.into();
        } else {
            self.entries.push(BlocklistEntry { source_title: source_title.to_string(), reason: reason.into(), added_at: added_at.into() });
        }
    }

    pub fn contains(&self, title: &str) -> bool {
        let key = normalize(title);
        self.entries.iter().any(|e| normalize(&e.source_title) == key)
    }

    pub fn entries(&self) -> &[BlocklistEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_contains_is_case_and_whitespace_insensitive() {
        let mut list = Blocklist::default();
        list.add("  Some.Movie.2020 ", "failed import", "2026-01-01T00:00:00Z");
        assert!(list.contains("some.movie.2020"));
        assert!(list.contains("SOME.MOVIE.2020"));
        assert!(!list.contains("other.movie.2020"));
    }

    #[test]
    fn re_blocking_replaces_reason_without_duplicating() {
        let mut list = Blocklist::default();
        list.add("Title", "reason A", "t1");
        list.add("title", "reason B", "t2");
        assert_eq!(list.entries().len(), 1);
        assert_eq!(list.entries()[0].reason, "reason B");
    }
}

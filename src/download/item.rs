//! `DownloadItem` and its state machine.
//!
//! Field set and state names are grounded on
//! `original_source/.../download_manager.py::DownloadItem`; the state
//! machine transitions are the one drawn in spec.md §4.4.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// ```text
/// queued ──start──▶ downloading ──complete──▶ completed (→ history)
///    ▲                 │   │
///    │                 │   └─error──▶ failed (→ history)
///    └──resume── paused ◀─pause─── downloading
/// ```
/// `extracting` sits between the last segment landing and `completed`,
/// while post-processing runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Queued,
    Downloading,
    Paused,
    Extracting,
    Completed,
    Failed,
}

impl DownloadState {
    /// Whether `next` is a legal transition from `self`, per the state
    /// diagram in spec.md §4.4.
    pub fn can_transition_to(self, next: DownloadState) -> bool {
        use DownloadState::*;
        matches!(
            (self, next),
            (Queued, Downloading)
                | (Downloading, Paused)
                | (Downloading, Extracting)
                | (Downloading, Failed)
                | (Paused, Downloading)
                | (Paused, Failed)
                | (Extracting, Completed)
                | (Extracting, Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub nzb_content: String,
    pub priority: String,
    pub state: DownloadState,
    pub added_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    #[serde(default)]
    pub error_message: String,

    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub total_segments: u64,
    pub completed_segments: u64,
    pub total_files: u32,
    pub completed_files: u32,
    pub speed_bps: f64,
    pub eta_seconds: f64,

    /// Final directory this item's files were (or will be) moved to.
    pub final_dir: Option<String>,
}

impl DownloadItem {
    pub fn new(name: impl Into<String>, category: impl Into<String>, nzb_content: impl Into<String>, priority: impl Into<String>, added_at: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            category: category.into(),
            nzb_content: nzb_content.into(),
            priority: priority.into(),
            state: DownloadState::Queued,
            added_at,
            started_at: None,
            completed_at: None,
            error_message: String::new(),
            total_bytes: 0,
            downloaded_bytes: 0,
            total_segments: 0,
            completed_segments: 0,
            total_files: 0,
            completed_files: 0,
            speed_bps: 0.0,
            eta_seconds: 0.0,
            final_dir: None,
        }
    }

    pub fn progress_pct(&self) -> f64 {
        if self.total_segments == 0 {
            0.0
        } else {
            (self.completed_segments as f64 / self.total_segments as f64 * 100.0).min(100.0)
        }
    }

    /// Attempt a state transition, rejecting and leaving state unchanged
    /// if it isn't valid per the state machine.
    pub fn try_transition(&mut self, next: DownloadState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_rejects_illegal_transitions() {
        assert!(DownloadState::Queued.can_transition_to(DownloadState::Downloading));
        assert!(!DownloadState::Queued.can_transition_to(DownloadState::Completed));
        assert!(!DownloadState::Completed.can_transition_to(DownloadState::Downloading));
    }

    #[test]
    fn full_happy_path_sequence_is_valid() {
        let mut item = DownloadItem::new("Foo", "movies", "", "normal", "now".into());
        assert!(item.try_transition(DownloadState::Downloading));
        assert!(item.try_transition(DownloadState::Extracting));
        assert!(item.try_transition(DownloadState::Completed));
        assert_eq!(item.state, DownloadState::Completed);
    }

    #[test]
    fn pause_resume_round_trip() {
        let mut item = DownloadItem::new("Foo", "movies", "", "normal", "now".into());
        item.try_transition(DownloadState::Downloading);
        assert!(item.try_transition(DownloadState::Paused));
        assert!(item.try_transition(DownloadState::Downloading));
    }

    #[test]
    fn rejected_transition_leaves_state_unchanged() {
        let mut item = DownloadItem::new("Foo", "movies", "", "normal", "now".into());
        assert!(!item.try_transition(DownloadState::Completed));
        assert_eq!(item.state, DownloadState::Queued);
    }
}

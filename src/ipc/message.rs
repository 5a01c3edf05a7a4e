//! Wire types for the parent/child command channel: newline-delimited
//! JSON written to the child's stdin (commands) and read from its
//! stdout (results), plus the atomic-rename status snapshot.

use serde::{Deserialize, Serialize};

/// One request enqueued by a parent-side caller. `id` is assigned by
/// the proxy from a per-process monotonic counter so results can be
/// routed back to the right waiter regardless of delivery order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// A child's reply to exactly one `Command`, matched by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: u64,
    pub success: bool,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub message: Option<String>,
}

impl CommandResult {
    pub fn ok(id: u64, value: serde_json::Value) -> Self {
        Self { id, success: true, value, message: None }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self { id, success: false, value: serde_json::Value::Null, message: Some(message.into()) }
    }
}

/// The read-only status document the child writes roughly every 1.5s
/// via atomic rename, and the parent serves from an in-memory cache so
/// status reads never block on the child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: serde_json::Value,
    pub queue: serde_json::Value,
    pub history: serde_json::Value,
    pub ts: String,
}

impl Snapshot {
    /// The well-typed empty sentinel served when no snapshot has ever
    /// been written (or the file can't be read) and nothing is cached
    /// yet — distinct from "stale but real" data.
    pub fn empty() -> Self {
        Self { status: serde_json::json!({"state": "starting"}), queue: serde_json::json!([]), history: serde_json::json!([]), ts: String::new() }
    }
}

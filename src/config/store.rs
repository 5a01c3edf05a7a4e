//! Pluggable per-instance document store.
//!
//! Engines and the orchestrator never touch a filesystem path directly —
//! they go through `ConfigStore` so a host application can back this with
//! a database instead of flat files without touching engine code. The
//! default implementation, `FileConfigStore`, writes one JSON document per
//! `(instance_id, key)` under a root directory using the atomic
//! write-then-rename pattern used throughout this crate for the queue,
//! history, bandwidth, and IPC snapshot files.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};

/// Host-owned document store for engine/orchestrator state.
///
/// `instance_id` scopes documents to a particular engine instance (so
/// multiple NZB engines, e.g. per-indexer, don't collide); `key` names the
/// document within that instance (`"queue"`, `"history"`, `"servers"`,
/// `"custom_formats"`, `"profiles"`, `"blocklist"`, `"collection"`).
///
/// The trait itself trades in `serde_json::Value` so it stays
/// object-safe (`Arc<dyn ConfigStore>` is how engines hold it); the
/// typed `get`/`save` helpers below are the ergonomic entry point most
/// callers want.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_raw(&self, instance_id: &str, key: &str) -> EngineResult<Option<serde_json::Value>>;

    async fn save_raw(&self, instance_id: &str, key: &str, value: serde_json::Value) -> EngineResult<()>;
}

impl dyn ConfigStore {
    pub async fn get<T: DeserializeOwned>(&self, instance_id: &str, key: &str) -> EngineResult<Option<T>> {
        match self.get_raw(instance_id, key).await? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    pub async fn save<T: Serialize + Sync>(&self, instance_id: &str, key: &str, value: &T) -> EngineResult<()> {
        self.save_raw(instance_id, key, serde_json::to_value(value)?).await
    }
}

/// Default `ConfigStore`: one atomically-written JSON file per document
/// under `root/<instance_id>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    root: PathBuf,
}

impl FileConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn doc_path(&self, instance_id: &str, key: &str) -> PathBuf {
        self.root.join(instance_id).join(format!("{key}.json"))
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get_raw(&self, instance_id: &str, key: &str) -> EngineResult<Option<serde_json::Value>> {
        let path = self.doc_path(instance_id, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Io(e)),
        }
    }

    async fn save_raw(&self, instance_id: &str, key: &str, value: serde_json::Value) -> EngineResult<()> {
        let path = self.doc_path(instance_id, key);
        let bytes = serde_json::to_vec_pretty(&value)?;
        atomic_write(&path, &bytes).await
    }
}

/// Write `bytes` to `path` via a sibling `.tmp` file and rename, so a crash
/// mid-write never leaves `path` truncated. Used by every persistence path
/// in this crate (queue, history, bandwidth, snapshot, resume-data).
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn round_trips_a_document() {
        let dir = tempfile::tempdir().unwrap();
        let store: Box<dyn ConfigStore> = Box::new(FileConfigStore::new(dir.path()));
        let w = Widget { name: "bolt".into(), count: 7 };

        store.save("nzb-1", "widget", &w).await.unwrap();
        let loaded: Option<Widget> = store.get("nzb-1", "widget").await.unwrap();

        assert_eq!(loaded, Some(w));
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store: Box<dyn ConfigStore> = Box::new(FileConfigStore::new(dir.path()));
        let loaded: Option<Widget> = store.get("nzb-1", "nope").await.unwrap();
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        atomic_write(&path, b"{}").await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}

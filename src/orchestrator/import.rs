//! Library import is a host responsibility (moving/symlinking files into
//! a managed library layout is outside this crate's scope) — the
//! orchestrator only needs something to hand a completed download to.

use async_trait::async_trait;

use crate::error::EngineResult;

#[async_trait]
pub trait Importer: Send + Sync {
    /// `content_path` is whatever the download client reported as the
    /// finished item's location on disk.
    async fn import(&self, title: &str, content_path: &str) -> EngineResult<()>;
}

/// Default no-op importer: logs and succeeds. Useful for hosts that
/// only want acquisition, or during development before a real import
/// collaborator is wired in.
pub struct LoggingImporter;

#[async_trait]
impl Importer for LoggingImporter {
    async fn import(&self, title: &str, content_path: &str) -> EngineResult<()> {
        tracing::info!(title, content_path, "import requested, no importer configured");
        Ok(())
    }
}

//! Background task that keeps an [`EngineProxy`]'s child process alive,
//! restarting it (with its persisted state re-read from disk by the
//! child itself) whenever `is_alive()` goes false.

use std::sync::Arc;
use std::time::Duration;

use crate::ipc::proxy::EngineProxy;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Spawns the supervising loop as a background task and returns its
/// handle. Dropping the handle does not stop supervision; call
/// [`tokio::task::JoinHandle::abort`] explicitly on shutdown.
pub fn spawn_supervisor(proxy: Arc<EngineProxy>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            if let Err(e) = proxy.ensure_alive().await {
                tracing::error!(error = %e, "failed to restart engine child process");
            }
        }
    })
}

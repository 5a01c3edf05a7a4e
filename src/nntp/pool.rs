//! Per-server authenticated connection pool.
//!
//! Generalizes the teacher's bespoke `NntpPool`/`NntpPoolBuilder` onto
//! `deadpool`, which the teacher already depends on for exactly this
//! role. One `ServerPool` wraps one `deadpool::managed::Pool` bounded by
//! `ServerConfig::max_connections`; the crate holds one `ServerPool` per
//! configured server and the dispatcher fans out across all of them in
//! priority order.

use async_trait::async_trait;
use deadpool::managed::{self, Metrics, Object, RecycleError, RecycleResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_native_tls::TlsConnector;

use crate::config::ServerConfig;
use crate::error::{EngineError, EngineResult};
use crate::nntp::connection::AsyncNntpConnection;

pub struct ConnectionManager {
    server: ServerConfig,
    tls_connector: Option<Arc<TlsConnector>>,
}

#[async_trait]
impl managed::Manager for ConnectionManager {
    type Type = AsyncNntpConnection;
    type Error = EngineError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        AsyncNntpConnection::connect(&self.server, self.tls_connector.clone()).await
    }

    async fn recycle(&self, conn: &mut Self::Type, _metrics: &Metrics) -> RecycleResult<Self::Error> {
        if conn.is_healthy().await {
            Ok(())
        } else {
            Err(RecycleError::StaticMessage("connection failed health check"))
        }
    }
}

/// A bounded pool of authenticated connections to one configured server,
/// plus the byte counters the dispatcher and bandwidth history read from.
pub struct ServerPool {
    pub name: String,
    pub priority: u32,
    pool: managed::Pool<ConnectionManager>,
    bytes_downloaded: AtomicU64,
}

impl ServerPool {
    pub fn new(server: ServerConfig, tls_connector: Option<Arc<TlsConnector>>) -> EngineResult<Self> {
        let name = server.name.clone();
        let priority = server.priority;
        let max_size = server.max_connections as usize;
        let manager = ConnectionManager { server, tls_connector };
        let pool = managed::Pool::builder(manager)
            .max_size(max_size.max(1))
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build connection pool: {e}")))?;

        Ok(Self { name, priority, pool, bytes_downloaded: AtomicU64::new(0) })
    }

    /// Acquire a connection, waiting up to `wait` for one to free up.
    /// Dispatcher callers use a short (~500ms) wait so a busy pool falls
    /// through to the next-priority server quickly.
    pub async fn get_connection(&self, wait: Duration) -> EngineResult<Object<ConnectionManager>> {
        tokio::time::timeout(wait, self.pool.get())
            .await
            .map_err(|_| EngineError::TransientNetwork(format!("no free connection to {} within {:?}", self.name, wait)))?
            .map_err(|e| EngineError::TransientNetwork(format!("{} pool error: {e}", self.name)))
    }

    pub fn add_bandwidth(&self, bytes: u64) {
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> PoolStatus {
        let pool_status = self.pool.status();
        PoolStatus {
            name: self.name.clone(),
            priority: self.priority,
            max_size: pool_status.max_size,
            available: pool_status.available.max(0) as usize,
            in_use: pool_status.size.saturating_sub(pool_status.available.max(0) as usize),
        }
    }

    /// `test_connection()`: acquire once and run a health check, without
    /// holding the connection open afterward.
    pub async fn test_connection(&self) -> EngineResult<bool> {
        let mut conn = self.get_connection(Duration::from_secs(10)).await?;
        Ok(conn.is_healthy().await)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub priority: u32,
    pub max_size: usize,
    pub available: usize,
    pub in_use: usize,
}

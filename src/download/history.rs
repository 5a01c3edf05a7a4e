//! Per-server bandwidth history: hourly buckets kept for 30 days, used
//! to answer "how much did this server download in the last 1h/24h/30d".
//!
//! Field-for-field port of
//! `original_source/.../bandwidth_history.py::BandwidthHistory`: flush is
//! gated to at most once every 60s, hourly buckets are pruned to the
//! trailing 30 days and capped at 720 samples, and `get_stats` folds in
//! whatever bytes have accumulated since the last flush so callers never
//! see a stale "0" right after a burst of traffic.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::store::atomic_write;
use crate::error::EngineResult;

const MAX_HOURLY_SAMPLES: usize = 720;
const FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const SECONDS_PER_HOUR: i64 = 3600;
const THIRTY_DAYS_SECONDS: i64 = 30 * 24 * 3600;

fn hour_ts(unix_secs: i64) -> i64 {
    (unix_secs.div_euclid(SECONDS_PER_HOUR)) * SECONDS_PER_HOUR
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServerEntry {
    total: u64,
    hourly: Vec<(i64, u64)>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BandwidthDocument {
    servers: HashMap<String, ServerEntry>,
}

pub struct BandwidthHistory {
    path: PathBuf,
    last_flush_unix: Mutex<i64>,
    last_snapshot: Mutex<HashMap<String, u64>>,
    data: Mutex<HashMap<String, ServerEntry>>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ServerBandwidthStats {
    pub bandwidth_1h: u64,
    pub bandwidth_24h: u64,
    pub bandwidth_30d: u64,
    pub bandwidth_total: u64,
}

impl BandwidthHistory {
    pub async fn load(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<BandwidthDocument>(&bytes).unwrap_or_default(),
            Err(_) => BandwidthDocument::default(),
        };

        Ok(Self {
            path,
            last_flush_unix: Mutex::new(0),
            last_snapshot: Mutex::new(HashMap::new()),
            data: Mutex::new(doc.servers),
        })
    }

    /// Record a bandwidth snapshot (cumulative bytes-downloaded per
    /// server key). No-ops if called again within 60s of the last flush.
    /// Intended to be called periodically from the engine's main loop.
    pub async fn flush(&self, bandwidth_by_server: &HashMap<String, u64>) -> EngineResult<()> {
        let now = now_unix();
        {
            let mut last_flush = self.last_flush_unix.lock().unwrap();
            if now - *last_flush < FLUSH_INTERVAL.as_secs() as i64 {
                return Ok(());
            }
            *last_flush = now;
        }

        {
            let mut last_snapshot = self.last_snapshot.lock().unwrap();
            let mut data = self.data.lock().unwrap();

            for (key, &current_bytes) in bandwidth_by_server {
                let last = *last_snapshot.get(key).unwrap_or(&0);
                let delta = current_bytes.saturating_sub(last);
                last_snapshot.insert(key.clone(), current_bytes);

                let entry = data.entry(key.clone()).or_default();
                entry.total += delta;

                let hour = hour_ts(now);
                match entry.hourly.last_mut() {
                    Some((h, b)) if *h == hour => *b += delta,
                    _ => entry.hourly.push((hour, delta)),
                }

                let cutoff = hour_ts(now - THIRTY_DAYS_SECONDS);
                entry.hourly.retain(|(h, _)| *h >= cutoff);
                if entry.hourly.len() > MAX_HOURLY_SAMPLES {
                    let drop = entry.hourly.len() - MAX_HOURLY_SAMPLES;
                    entry.hourly.drain(0..drop);
                }
            }
        }

        self.save().await
    }

    /// `get_stats`: 1h/24h/30d/total for one server key, folding in bytes
    /// downloaded since the last flush so stats stay current between
    /// flush intervals.
    pub fn get_stats(&self, server_key: &str, session_bytes: u64) -> ServerBandwidthStats {
        let data = self.data.lock().unwrap();
        let last_snapshot = self.last_snapshot.lock().unwrap();

        let entry = data.get(server_key).cloned().unwrap_or_default();
        let last = *last_snapshot.get(server_key).unwrap_or(&0);
        let unflushed = session_bytes.saturating_sub(last);
        let total = entry.total + unflushed;

        let now = now_unix();
        let cutoff_1h = hour_ts(now - SECONDS_PER_HOUR);
        let cutoff_24h = hour_ts(now - 24 * SECONDS_PER_HOUR);
        let cutoff_30d = hour_ts(now - THIRTY_DAYS_SECONDS);

        let (mut b1, mut b24, mut b30) = (0u64, 0u64, 0u64);
        for &(h, b) in &entry.hourly {
            if h >= cutoff_1h {
                b1 += b;
            }
            if h >= cutoff_24h {
                b24 += b;
            }
            if h >= cutoff_30d {
                b30 += b;
            }
        }

        ServerBandwidthStats { bandwidth_1h: b1, bandwidth_24h: b24, bandwidth_30d: b30, bandwidth_total: total }
    }

    pub fn get_all_stats(&self, bandwidth_by_server: &HashMap<String, u64>) -> HashMap<String, ServerBandwidthStats> {
        bandwidth_by_server.iter().map(|(key, &bytes)| (key.clone(), self.get_stats(key, bytes))).collect()
    }

    async fn save(&self) -> EngineResult<()> {
        let doc = BandwidthDocument { servers: self.data.lock().unwrap().clone() };
        let bytes = serde_json::to_vec_pretty(&doc)?;
        atomic_write(&self.path, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flush_accumulates_total_and_is_gated_to_60s() {
        let dir = tempfile::tempdir().unwrap();
        let history = BandwidthHistory::load(dir.path().join("bandwidth.json")).await.unwrap();

        let mut by_server = HashMap::new();
        by_server.insert("news.example (1.2.3.4)".to_string(), 1000u64);
        history.flush(&by_server).await.unwrap();

        // Second flush within the same second is gated; total shouldn't move.
        by_server.insert("news.example (1.2.3.4)".to_string(), 5000u64);
        history.flush(&by_server).await.unwrap();

        let stats = history.get_stats("news.example (1.2.3.4)", 5000);
        // Gated flush means the persisted total reflects only the first
        // snapshot, but get_stats folds in the unflushed delta live.
        assert_eq!(stats.bandwidth_total, 5000);
    }

    #[test]
    fn hour_ts_truncates_to_the_hour() {
        assert_eq!(hour_ts(3661), 3600);
        assert_eq!(hour_ts(7199), 3600);
        assert_eq!(hour_ts(7200), 7200);
    }

    #[tokio::test]
    async fn unknown_server_key_reports_zeroed_stats() {
        let dir = tempfile::tempdir().unwrap();
        let history = BandwidthHistory::load(dir.path().join("bandwidth.json")).await.unwrap();
        let stats = history.get_stats("never-seen", 0);
        assert_eq!(stats.bandwidth_total, 0);
        assert_eq!(stats.bandwidth_1h, 0);
    }
}

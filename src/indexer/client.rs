//! Newznab HTTP client: search and API-key validation, rate-limited per
//! indexer so a slow/misbehaving site can't starve the others the
//! orchestrator queries in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::indexer::candidate::Candidate;
use crate::indexer::config::IndexerConfig;
use crate::indexer::parse::{self, parse_response};

const DEFAULT_LIMIT: u32 = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One slot of "no more than one request per `min_interval`" per
/// indexer, keyed by base URL so multiple `IndexerClient` instances
/// sharing a process still respect the same pacing.
#[derive(Default)]
struct RateLimiter {
    min_interval: Duration,
    last_request: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_request: AsyncMutex::new(None) }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct IndexerClient {
    http: reqwest::Client,
    limiters: AsyncMutex<HashMap<String, Arc<RateLimiter>>>,
    min_interval: Duration,
}

impl IndexerClient {
    pub fn new() -> Self {
        Self::with_min_interval(Duration::from_millis(500))
    }

    pub fn with_min_interval(min_interval: Duration) -> Self {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap_or_else(|_| reqwest::Client::new());
        Self { http, limiters: AsyncMutex::new(HashMap::new()), min_interval }
    }

    async fn limiter_for(&self, base_url: &str) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().await;
        limiters.entry(base_url.to_string()).or_insert_with(|| Arc::new(RateLimiter::new(self.min_interval))).clone()
    }

    /// `search`: `GET base?t=search&apikey=K&q=Q&cat=CSV&limit=N`. Any
    /// non-200 status, empty body, or parse failure yields an empty
    /// list — this is never fatal to the caller, which is expected to
    /// try other indexers (spec.md §4.8).
    pub async fn search(&self, indexer: &IndexerConfig, query: &str, categories: &[String]) -> Vec<Candidate> {
        let limiter = self.limiter_for(&indexer.base_url).await;
        limiter.wait().await;

        let cat_csv = categories.join(",");
        let url = indexer.search_url();
        let response = self
            .http
            .get(&url)
            .query(&[("t", "search"), ("apikey", indexer.api_key.as_str()), ("q", query), ("cat", cat_csv.as_str()), ("limit", &DEFAULT_LIMIT.to_string())])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                debug!(indexer = %indexer.name, error = %e, "indexer search request failed");
                return Vec::new();
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            debug!(indexer = %indexer.name, status = %response.status(), "indexer search returned non-200");
            return Vec::new();
        }

        let body = match response.text().await {
            Ok(b) if !b.trim().is_empty() => b,
            _ => {
                debug!(indexer = %indexer.name, "indexer search returned empty body");
                return Vec::new();
            }
        };

        parse_response(&body)
    }

    /// `validate_api_key`: a minimal `q=test&limit=1` search. Success iff
    /// the response yields at least one item or contains channel
    /// content; failure on an explicit auth-rejection phrase or a
    /// Newznab `<error code="100|101|102">`.
    pub async fn validate_api_key(&self, indexer: &IndexerConfig) -> bool {
        let limiter = self.limiter_for(&indexer.base_url).await;
        limiter.wait().await;

        let url = indexer.search_url();
        let response = match self.http.get(&url).query(&[("t", "search"), ("apikey", indexer.api_key.as_str()), ("q", "test"), ("limit", "1")]).send().await {
            Ok(r) => r,
            Err(_) => return false,
        };

        if response.status() != reqwest::StatusCode::OK {
            return false;
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(_) => return false,
        };

        if parse::has_auth_error(&body) {
            return false;
        }

        !parse_response(&body).is_empty() || body.contains("<channel") || body.contains("\"channel\"")
    }
}

impl Default for IndexerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_serializes_back_to_back_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }
}

//! The acquisition orchestrator: per-item search → score → submit →
//! track pipeline (spec.md §4.10), plus the background completion
//! poller that turns client-side state changes into imports and
//! blocklist entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::error::{EngineResult, Outcome};
use crate::indexer::{Candidate, IndexerClient, IndexerConfig};
use crate::orchestrator::blocklist::Blocklist;
use crate::orchestrator::client::{ClientHistoryEntry, DownloadClient, Submission};
use crate::orchestrator::import::Importer;
use crate::orchestrator::requested_index::{RequestedEntry, RequestedIndex};
use crate::scoring::{best_result_matching_profile, CustomFormat, QualityProfile};

const POLL_INTERVAL: Duration = Duration::from_secs(90);

/// What `grab_for_item` submitted, carried back to the caller so it can
/// update its own library record without re-reading shared state.
#[derive(Debug, Clone)]
pub struct GrabResult {
    pub client_name: String,
    pub entry: RequestedEntry,
}

pub struct AcquisitionOrchestrator {
    indexer_client: Arc<IndexerClient>,
    indexers: Vec<IndexerConfig>,
    custom_formats: Vec<CustomFormat>,
    blocklist: AsyncMutex<Blocklist>,
    requested: AsyncMutex<HashMap<String, RequestedIndex>>,
    clients: Vec<Arc<dyn DownloadClient>>,
    importer: Arc<dyn Importer>,
}

impl AcquisitionOrchestrator {
    pub fn new(indexer_client: Arc<IndexerClient>, indexers: Vec<IndexerConfig>, custom_formats: Vec<CustomFormat>, clients: Vec<Arc<dyn DownloadClient>>, importer: Arc<dyn Importer>) -> Self {
        Self { indexer_client, indexers, custom_formats, blocklist: AsyncMutex::new(Blocklist::default()), requested: AsyncMutex::new(HashMap::new()), clients, importer }
    }

    pub async fn block(&self, source_title: &str, reason: impl Into<String>, added_at: impl Into<String>) {
        self.blocklist.lock().await.add(source_title, reason, added_at);
    }

    /// Runs one full acquisition attempt for a library item: search
    /// every enabled indexer, pick the best candidate under its
    /// profile, and submit it to the first enabled client. `year` may
    /// be `None` for items without a known release year.
    pub async fn grab_for_item(&self, title: &str, year: Option<u32>, profile: &QualityProfile, category: &str) -> Outcome<GrabResult> {
        let query = match year {
            Some(y) => format!("{title} {y}"),
            None => title.to_string(),
        };

        let Some((best, score, breakdown)) = self.pick_best(&query, profile).await else {
            return Outcome::Rejected("no candidate cleared the blocklist, tier match, and minimum score gate".to_string());
        };

        tracing::info!(title, score, breakdown = %breakdown, "grab event: submitting best candidate");

        let Some(client) = self.clients.first() else {
            return Outcome::Failed("no enabled download client configured".to_string());
        };

        let submission = Submission::NzbUrl { url: best.nzb_url.clone(), title: best.title.clone() };
        let queue_id = match client.submit(submission, category).await {
            Ok(id) => id,
            Err(e) => return Outcome::Retry(format!("submit to {} failed: {e}", client.name())),
        };

        let entry = RequestedEntry { queue_id: queue_id.clone(), title: best.title.clone(), year, score, score_breakdown: breakdown };
        self.requested.lock().await.entry(client.name().to_string()).or_default().insert(entry.clone());

        Outcome::Ok(GrabResult { client_name: client.name().to_string(), entry })
    }

    /// Like `grab_for_item`, but only submits if the best candidate's
    /// score strictly exceeds `current_score` — the on-disk file's
    /// recorded score.
    pub async fn force_upgrade(&self, title: &str, year: Option<u32>, profile: &QualityProfile, category: &str, current_score: i64) -> Outcome<GrabResult> {
        let query = match year {
            Some(y) => format!("{title} {y}"),
            None => title.to_string(),
        };
        let Some((_, score, _)) = self.pick_best(&query, profile).await else {
            return Outcome::Rejected("no upgrade candidate cleared the blocklist, tier match, and minimum score gate".to_string());
        };

        if score <= current_score {
            return Outcome::Rejected(format!("best available score {score} does not exceed current {current_score}"));
        }

        self.grab_for_item(title, year, profile, category).await
    }

    async fn search_all_indexers(&self, query: &str) -> Vec<(u8, Candidate)> {
        let enabled: Vec<&IndexerConfig> = self.indexers.iter().filter(|i| i.enabled).collect();
        let searches = enabled.into_iter().map(|indexer| {
            let indexer_client = self.indexer_client.clone();
            let indexer = indexer.clone();
            let query = query.to_string();
            async move {
                let started = tokio::time::Instant::now();
                let results = indexer_client.search(&indexer, &query, &indexer.categories).await;
                tracing::info!(indexer = %indexer.name, query, latency_ms = started.elapsed().as_millis() as u64, result_count = results.len(), "search event");
                results.into_iter().map(move |c| (indexer.priority, c)).collect::<Vec<_>>()
            }
        });
        futures::future::join_all(searches).await.into_iter().flatten().collect()
    }

    /// Per indexer, keep the best candidate scoring at or above the
    /// profile's minimum; across indexers, prefer lower (more
    /// preferred) indexer priority, then higher score.
    async fn pick_best(&self, query: &str, profile: &QualityProfile) -> Option<(Candidate, i64, String)> {
        let found = self.search_all_indexers(query).await;

        let blocklist = self.blocklist.lock().await;
        let mut by_indexer: HashMap<u8, Vec<Candidate>> = HashMap::new();
        for (priority, candidate) in found {
            if !blocklist.contains(&candidate.title) {
                by_indexer.entry(priority).or_default().push(candidate);
            }
        }
        drop(blocklist);

        let mut picks: Vec<(u8, Candidate, i64, String)> = Vec::new();
        for (priority, group) in by_indexer {
            if let Some((candidate, score, breakdown)) = best_result_matching_profile(&group, profile, &self.custom_formats) {
                if score >= profile.min_custom_format_score {
                    picks.push((priority, candidate.clone(), score, breakdown));
                }
            }
        }

        picks.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.2.cmp(&a.2)));
        picks.into_iter().next().map(|(_, candidate, score, breakdown)| (candidate, score, breakdown))
    }

    /// One iteration of the completion poller: for every client,
    /// diff its live queue against our requested index and resolve
    /// whatever dropped off.
    pub async fn poll_once(&self) {
        for client in &self.clients {
            let live_ids = match client.live_queue_ids().await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!(client = client.name(), error = %e, "poller failed to fetch live queue");
                    continue;
                }
            };

            let missing: Vec<String> = {
                let requested = self.requested.lock().await;
                match requested.get(client.name()) {
                    Some(index) => index.ids_missing_from(&live_ids).into_iter().map(String::from).collect(),
                    None => continue,
                }
            };

            for queue_id in missing {
                self.resolve_dropped_item(client.as_ref(), &queue_id).await;
            }
        }
    }

    async fn resolve_dropped_item(&self, client: &dyn DownloadClient, queue_id: &str) {
        let entry = {
            let mut requested = self.requested.lock().await;
            match requested.get_mut(client.name()).and_then(|idx| idx.remove(queue_id)) {
                Some(e) => e,
                None => return,
            }
        };

        let history: Option<ClientHistoryEntry> = match client.history_entry(queue_id).await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(client = client.name(), queue_id, error = %e, "poller failed to fetch history entry");
                None
            }
        };

        match history {
            Some(h) if h.completed => {
                let content_path = h.content_path.unwrap_or_default();
                if let Err(e) = self.importer.import(&entry.title, &content_path).await {
                    tracing::warn!(title = %entry.title, error = %e, "import failed");
                }
            }
            Some(h) if h.failed => {
                let reason = h.failure_reason.unwrap_or_else(|| "download failed".to_string());
                self.block(&entry.title, reason, now_iso8601()).await;
            }
            _ => {
                tracing::warn!(client = client.name(), queue_id, "item dropped from queue with no resolvable history entry");
            }
        }
    }
}

fn now_iso8601() -> String {
    let secs = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    format!("unix:{secs}")
}

/// Spawns the ~90s completion-poller loop as a background task.
pub fn spawn_poll_loop(orchestrator: Arc<AcquisitionOrchestrator>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            orchestrator.poll_once().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::import::LoggingImporter;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeClient {
        name: String,
        submissions: StdMutex<Vec<Submission>>,
        next_id: AtomicU32,
        queue: StdMutex<Vec<String>>,
        histories: StdMutex<HashMap<String, ClientHistoryEntry>>,
    }

    #[async_trait::async_trait]
    impl DownloadClient for FakeClient {
        fn name(&self) -> &str {
            &self.name
        }

        async fn submit(&self, submission: Submission, _category: &str) -> EngineResult<String> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            self.submissions.lock().unwrap().push(submission);
            self.queue.lock().unwrap().push(id.clone());
            Ok(id)
        }

        async fn live_queue_ids(&self) -> EngineResult<Vec<String>> {
            Ok(self.queue.lock().unwrap().clone())
        }

        async fn history_entry(&self, queue_id: &str) -> EngineResult<Option<ClientHistoryEntry>> {
            Ok(self.histories.lock().unwrap().get(queue_id).cloned())
        }
    }

    fn profile() -> QualityProfile {
        QualityProfile {
            id: "p1".into(),
            name: "WEB".into(),
            tiers: vec![crate::scoring::QualityTier { id: "t1".into(), name: "Unknown".into(), enabled: true, order: 0 }],
            upgrades_allowed: true,
            upgrade_until_quality: None,
            min_custom_format_score: 0,
            upgrade_until_custom_format_score: None,
            upgrade_score_increment: 1,
            language: "en".into(),
            is_default: true,
        }
    }

    #[tokio::test]
    async fn poll_once_blocklists_a_failed_item() {
        let client = Arc::new(FakeClient { name: "fake".into(), submissions: StdMutex::new(vec![]), next_id: AtomicU32::new(1), queue: StdMutex::new(vec!["1".into()]), histories: StdMutex::new(HashMap::new()) });
        client.histories.lock().unwrap().insert("1".into(), ClientHistoryEntry { queue_id: "1".into(), completed: false, failed: true, failure_reason: Some("par2 could not repair".into()), content_path: None });

        let orchestrator = AcquisitionOrchestrator::new(Arc::new(IndexerClient::new()), vec![], vec![], vec![client.clone()], Arc::new(LoggingImporter));
        orchestrator.requested.lock().await.entry("fake".into()).or_default().insert(RequestedEntry { queue_id: "1".into(), title: "Some.Movie.2026".into(), year: Some(2026), score: 0, score_breakdown: "-".into() });

        client.queue.lock().unwrap().clear(); // now "missing" from the live queue
        orchestrator.poll_once().await;

        assert!(orchestrator.blocklist.lock().await.contains("Some.Movie.2026"));
    }

    #[tokio::test]
    async fn grab_for_item_rejects_when_no_candidates_match_tier() {
        let client = Arc::new(FakeClient { name: "fake".into(), submissions: StdMutex::new(vec![]), next_id: AtomicU32::new(1), queue: StdMutex::new(vec![]), histories: StdMutex::new(HashMap::new()) });
        let orchestrator = AcquisitionOrchestrator::new(Arc::new(IndexerClient::new()), vec![], vec![], vec![client], Arc::new(LoggingImporter));
        let result = orchestrator.grab_for_item("Some Movie", Some(2026), &profile(), "movies").await;
        assert!(matches!(result, Outcome::Rejected(_)));
    }
}

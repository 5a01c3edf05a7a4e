//! `DownloadClient`: the uniform surface the orchestrator submits
//! releases through, regardless of which backend actually fetches
//! them. NZB Hunt clients forward to the in-process NZB engine over
//! IPC; SABnzbd/NZBGet/qBittorrent clients forward over each product's
//! HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::ipc::EngineProxy;

/// What's being submitted: an NZB fetched by URL, or a torrent
/// identified by magnet link or raw `.torrent` bytes.
#[derive(Debug, Clone)]
pub enum Submission {
    NzbUrl { url: String, title: String },
    Magnet { uri: String, title: String },
    TorrentFile { bytes: Vec<u8>, title: String },
}

#[derive(Debug, Clone)]
pub struct ClientHistoryEntry {
    pub queue_id: String,
    pub completed: bool,
    pub failed: bool,
    pub failure_reason: Option<String>,
    pub content_path: Option<String>,
}

#[async_trait]
pub trait DownloadClient: Send + Sync {
    fn name(&self) -> &str;

    /// Submit to the backend with the resolved category, returning its
    /// queue id on success.
    async fn submit(&self, submission: Submission, category: &str) -> EngineResult<String>;

    /// Ids currently live (not yet completed/failed/removed) in the
    /// backend's queue, used by the completion poller to diff against
    /// the requested index.
    async fn live_queue_ids(&self) -> EngineResult<Vec<String>>;

    /// The backend's history record for `queue_id`, if it has one yet.
    async fn history_entry(&self, queue_id: &str) -> EngineResult<Option<ClientHistoryEntry>>;
}

/// Forwards to the in-process NZB engine child over its IPC proxy.
///
/// The engine's `add_nzb` command takes the NZB document itself, not a
/// URL (its `DownloadItem` persists the raw XML so a restart never
/// needs to re-fetch anything from the indexer) — so this client
/// fetches the `.nzb` body over HTTP before forwarding it.
pub struct NzbEngineClient {
    name: String,
    proxy: Arc<EngineProxy>,
    http: reqwest::Client,
}

impl NzbEngineClient {
    pub fn new(name: impl Into<String>, proxy: Arc<EngineProxy>) -> Self {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(60)).build().unwrap_or_else(|_| reqwest::Client::new());
        Self { name: name.into(), proxy, http }
    }
}

#[async_trait]
impl DownloadClient for NzbEngineClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, submission: Submission, category: &str) -> EngineResult<String> {
        let (url, title) = match submission {
            Submission::NzbUrl { url, title } => (url, title),
            _ => return Err(EngineError::Config("NZB engine client only accepts NZB URLs".into())),
        };
        let response = self.http.get(&url).send().await.map_err(EngineError::Http)?;
        let nzb_content = response.text().await.map_err(EngineError::Http)?;

        let result = self.proxy.send_command("add_nzb", serde_json::json!({ "nzb_content": nzb_content, "name": title, "category": category })).await?;
        if !result.success {
            return Err(EngineError::Ipc(result.message.unwrap_or_else(|| "add_nzb rejected".into())));
        }
        result
            .value
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| EngineError::Ipc("add_nzb reply missing id".into()))
    }

    async fn live_queue_ids(&self) -> EngineResult<Vec<String>> {
        let result = self.proxy.send_command("get_queue", serde_json::Value::Null).await?;
        let ids = result.value.as_array().map(|items| items.iter().filter_map(|item| item.get("id").and_then(|v| v.as_str()).map(String::from)).collect()).unwrap_or_default();
        Ok(ids)
    }

    async fn history_entry(&self, queue_id: &str) -> EngineResult<Option<ClientHistoryEntry>> {
        let result = self.proxy.send_command("get_history", serde_json::Value::Null).await?;
        let Some(items) = result.value.as_array() else { return Ok(None) };
        for item in items {
            if item.get("id").and_then(|v| v.as_str()) == Some(queue_id) {
                let state = item.get("state").and_then(|v| v.as_str()).unwrap_or("");
                return Ok(Some(ClientHistoryEntry {
                    queue_id: queue_id.to_string(),
                    completed: state == "completed",
                    failed: state == "failed",
                    failure_reason: item.get("error_message").and_then(|v| v.as_str()).filter(|s| !s.is_empty()).map(String::from),
                    content_path: item.get("final_dir").and_then(|v| v.as_str()).map(String::from),
                }));
            }
        }
        Ok(None)
    }
}

/// Talks to a SABnzbd instance over its `mode=`-based query API
/// (`addurl`, `queue`, `history`).
pub struct SabnzbdClient {
    name: String,
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl SabnzbdClient {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { name: name.into(), base_url: base_url.into(), api_key: api_key.into(), http: reqwest::Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_else(|_| reqwest::Client::new()) }
    }

    fn url(&self) -> String {
        format!("{}/api", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl DownloadClient for SabnzbdClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, submission: Submission, category: &str) -> EngineResult<String> {
        let Submission::NzbUrl { url, title } = submission else {
            return Err(EngineError::Config("SABnzbd client only accepts NZB URLs".into()));
        };
        let response = self
            .http
            .get(self.url())
            .query(&[("mode", "addurl"), ("name", url.as_str()), ("nzbname", title.as_str()), ("cat", category), ("apikey", self.api_key.as_str()), ("output", "json")])
            .send()
            .await
            .map_err(EngineError::Http)?;
        let body: serde_json::Value = response.json().await.map_err(EngineError::Http)?;
        if body.get("status").and_then(|v| v.as_bool()) != Some(true) {
            let reason = body.get("error").and_then(|v| v.as_str()).unwrap_or("unknown SABnzbd error").to_string();
            return Err(EngineError::Ipc(reason));
        }
        body.get("nzo_ids").and_then(|v| v.as_array()).and_then(|a| a.first()).and_then(|v| v.as_str()).map(String::from).ok_or_else(|| EngineError::Ipc("SABnzbd reply missing nzo_ids".into()))
    }

    async fn live_queue_ids(&self) -> EngineResult<Vec<String>> {
        let response = self.http.get(self.url()).query(&[("mode", "queue"), ("apikey", self.api_key.as_str()), ("output", "json")]).send().await.map_err(EngineError::Http)?;
        let body: serde_json::Value = response.json().await.map_err(EngineError::Http)?;
        let ids = body.pointer("/queue/slots").and_then(|v| v.as_array()).map(|slots| slots.iter().filter_map(|s| s.get("nzo_id").and_then(|v| v.as_str()).map(String::from)).collect()).unwrap_or_default();
        Ok(ids)
    }

    async fn history_entry(&self, queue_id: &str) -> EngineResult<Option<ClientHistoryEntry>> {
        let response = self.http.get(self.url()).query(&[("mode", "history"), ("apikey", self.api_key.as_str()), ("output", "json")]).send().await.map_err(EngineError::Http)?;
        let body: serde_json::Value = response.json().await.map_err(EngineError::Http)?;
        let Some(slots) = body.pointer("/history/slots").and_then(|v| v.as_array()) else { return Ok(None) };
        for slot in slots {
            if slot.get("nzo_id").and_then(|v| v.as_str()) == Some(queue_id) {
                let status = slot.get("status").and_then(|v| v.as_str()).unwrap_or("");
                return Ok(Some(ClientHistoryEntry {
                    queue_id: queue_id.to_string(),
                    completed: status == "Completed",
                    failed: status == "Failed",
                    failure_reason: slot.get("fail_message").and_then(|v| v.as_str()).filter(|s| !s.is_empty()).map(String::from),
                    content_path: slot.get("storage").and_then(|v| v.as_str()).map(String::from),
                }));
            }
        }
        Ok(None)
    }
}

/// Talks to NZBGet's JSON-RPC endpoint (`append`, `listgroups`,
/// `history`).
pub struct NzbgetClient {
    name: String,
    rpc_url: String,
    http: reqwest::Client,
}

impl NzbgetClient {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, username: &str, password: &str) -> Self {
        let base_url = base_url.into();
        let rpc_url = if username.is_empty() {
            format!("{}/jsonrpc", base_url.trim_end_matches('/'))
        } else {
            let without_scheme = base_url.trim_start_matches("http://").trim_start_matches("https://");
            let scheme = if base_url.starts_with("https://") { "https" } else { "http" };
            format!("{scheme}://{username}:{password}@{without_scheme}/jsonrpc")
        };
        Self { name: name.into(), rpc_url, http: reqwest::Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_else(|_| reqwest::Client::new()) }
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> EngineResult<serde_json::Value> {
        let request = serde_json::json!({ "method": method, "params": params, "id": 1 });
        let response = self.http.post(&self.rpc_url).json(&request).send().await.map_err(EngineError::Http)?;
        let body: serde_json::Value = response.json().await.map_err(EngineError::Http)?;
        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(EngineError::Ipc(format!("nzbget rpc error: {error}")));
        }
        Ok(body.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl DownloadClient for NzbgetClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, submission: Submission, category: &str) -> EngineResult<String> {
        let Submission::NzbUrl { url, title } = submission else {
            return Err(EngineError::Config("NZBGet client only accepts NZB URLs".into()));
        };
        let result = self.call("append", serde_json::json!([title, category, 0, false, url, false, "", 0, "SCORE", []])).await?;
        match result.as_i64() {
            Some(id) if id > 0 => Ok(id.to_string()),
            _ => Err(EngineError::Ipc("nzbget append returned a non-positive id".into())),
        }
    }

    async fn live_queue_ids(&self) -> EngineResult<Vec<String>> {
        let result = self.call("listgroups", serde_json::json!([])).await?;
        let ids = result.as_array().map(|items| items.iter().filter_map(|g| g.get("NZBID").and_then(|v| v.as_i64()).map(|id| id.to_string())).collect()).unwrap_or_default();
        Ok(ids)
    }

    async fn history_entry(&self, queue_id: &str) -> EngineResult<Option<ClientHistoryEntry>> {
        let result = self.call("history", serde_json::json!([false])).await?;
        let Some(items) = result.as_array() else { return Ok(None) };
        for item in items {
            if item.get("NZBID").and_then(|v| v.as_i64()).map(|id| id.to_string()).as_deref() == Some(queue_id) {
                let status = item.get("Status").and_then(|v| v.as_str()).unwrap_or("");
                return Ok(Some(ClientHistoryEntry {
                    queue_id: queue_id.to_string(),
                    completed: status.starts_with("SUCCESS"),
                    failed: status.starts_with("FAILURE"),
                    failure_reason: if status.starts_with("FAILURE") { Some(status.to_string()) } else { None },
                    content_path: item.get("DestDir").and_then(|v| v.as_str()).map(String::from),
                }));
            }
        }
        Ok(None)
    }
}

/// Talks to qBittorrent's WebUI v2 REST API directly over HTTP: the
/// surface is small enough (login, add, info, properties) and stable
/// enough across qBittorrent releases that going through the WebUI
/// with a plain `reqwest` client is more robust than depending on a
/// third-party wrapper crate pinned to one WebUI version.
pub struct QbitClient {
    name: String,
    base_url: String,
    username: String,
    password: String,
    http: reqwest::Client,
}

impl QbitClient {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        let http = reqwest::Client::builder().cookie_store(true).timeout(Duration::from_secs(30)).build().unwrap_or_else(|_| reqwest::Client::new());
        Self { name: name.into(), base_url: base_url.into(), username: username.into(), password: password.into(), http }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn login(&self) -> EngineResult<()> {
        let response = self.http.post(self.api("auth/login")).form(&[("username", self.username.as_str()), ("password", self.password.as_str())]).send().await.map_err(EngineError::Http)?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(EngineError::Auth("qBittorrent WebUI login failed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DownloadClient for QbitClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, submission: Submission, category: &str) -> EngineResult<String> {
        self.login().await?;

        let hash = match &submission {
            Submission::Magnet { uri, .. } => crate::torrent::engine::magnet_info_hash(uri).ok_or_else(|| EngineError::Parse("magnet link has no info hash".into()))?,
            Submission::TorrentFile { .. } => return Err(EngineError::Config("submitting raw .torrent bytes to qBittorrent is not yet supported; add by magnet".into())),
            Submission::NzbUrl { .. } => return Err(EngineError::Config("qBittorrent client only accepts magnet links".into())),
        };

        let Submission::Magnet { uri, .. } = submission else { unreachable!() };
        let form = reqwest::multipart::Form::new().text("urls", uri).text("category", category.to_string());
        let response = self.http.post(self.api("torrents/add")).multipart(form).send().await.map_err(EngineError::Http)?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(EngineError::Ipc("qBittorrent rejected torrents/add".into()));
        }
        Ok(hash)
    }

    async fn live_queue_ids(&self) -> EngineResult<Vec<String>> {
        self.login().await?;
        let response = self.http.get(self.api("torrents/info")).send().await.map_err(EngineError::Http)?;
        let body: Vec<serde_json::Value> = response.json().await.map_err(EngineError::Http)?;
        Ok(body.into_iter().filter_map(|t| t.get("hash").and_then(|v| v.as_str()).map(String::from)).collect())
    }

    async fn history_entry(&self, queue_id: &str) -> EngineResult<Option<ClientHistoryEntry>> {
        self.login().await?;
        let response = self.http.get(self.api("torrents/info")).query(&[("hashes", queue_id)]).send().await.map_err(EngineError::Http)?;
        let body: Vec<serde_json::Value> = response.json().await.map_err(EngineError::Http)?;
        let Some(torrent) = body.into_iter().next() else { return Ok(None) };
        let state = torrent.get("state").and_then(|v| v.as_str()).unwrap_or("");
        let failed = matches!(state, "error" | "missingFiles");
        let completed = matches!(state, "uploading" | "stalledUP" | "pausedUP" | "queuedUP" | "forcedUP");
        Ok(Some(ClientHistoryEntry {
            queue_id: queue_id.to_string(),
            completed,
            failed,
            failure_reason: if failed { Some(format!("qBittorrent state: {state}")) } else { None },
            content_path: torrent.get("content_path").and_then(|v| v.as_str()).map(String::from),
        }))
    }
}

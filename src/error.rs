//! Error kinds shared across the acquisition engines.
//!
//! Mirrors the teacher's split between focused per-domain error enums and
//! one top-level aggregate (`EngineError`) that the public API surfaces.
//! Kinds map 1:1 onto the error taxonomy in the specification: `Config`,
//! `TransientNetwork`, `Auth`, `ArticleMissing`, `Parse`, `PostProcess`,
//! `Ipc`, and `StateConflict`.

use std::path::PathBuf;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("article missing: {message_id}")]
    ArticleMissing { message_id: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("post-processing failed: {0}")]
    PostProcess(String),

    #[error("ipc error: {0}")]
    Ipc(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Nntp(#[from] NntpError),

    #[error(transparent)]
    PostProcessing(#[from] PostProcessingError),
}

/// Errors raised while establishing or using a single NNTP connection.
#[derive(Debug, thiserror::Error)]
pub enum NntpError {
    #[error("connection to {server}:{port} failed: {source}")]
    ConnectionFailed {
        server: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("TLS error: {0}")]
    TlsError(String),
    #[error("protocol error: {0}")]
    ProtocolError(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("group not found: {group}")]
    GroupNotFound { group: String },
    #[error("article not found: {message_id}")]
    ArticleNotFound { message_id: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised during par2/archive post-processing.
#[derive(Debug, thiserror::Error)]
pub enum PostProcessingError {
    #[error("failed to rename {from} to {to}: {source}")]
    FileRenameError {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("par2 repair failed: {0}")]
    Par2Failed(String),
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("download has no recoverable content (only par2/archive metadata present)")]
    RecoveryOnly,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-item download failures, recorded on `DownloadItem::error_message`
/// rather than propagated — the worker loop never crashes the process.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("not enough segments available: have {available}, need {required}")]
    InsufficientSegments { available: usize, required: usize },
    #[error("nzb parse error: {0}")]
    NzbParse(String),
    #[error(transparent)]
    PostProcessing(#[from] PostProcessingError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<DownloadError> for EngineError {
    fn from(e: DownloadError) -> Self {
        EngineError::Parse(e.to_string())
    }
}

/// Unifies the source's mixed exception-or-`(ok, msg, id)` return shape
/// (spec.md §9 design note) into one typed result: transient failures are
/// `Retry`, permanent ones `Failed`, and `StateConflict`-style rejections
/// (duplicate torrent, duplicate collection entry) are `Rejected` without
/// being treated as errors by callers that just want a message to show.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Ok(T),
    Rejected(String),
    Retry(String),
    Failed(String),
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Rejected(m) | Outcome::Retry(m) | Outcome::Failed(m) => Some(m),
        }
    }
}

//! Acquisition orchestrator: turns a library item into a search, a
//! scored pick, a submission to a download client, and a tracked
//! completion — the glue between the indexer/scoring layers and the
//! engines this crate drives over IPC.

pub mod blocklist;
pub mod client;
pub mod collection;
pub mod engine;
pub mod import;
pub mod requested_index;

pub use blocklist::{Blocklist, BlocklistEntry};
pub use client::{ClientHistoryEntry, DownloadClient, NzbEngineClient, NzbgetClient, QbitClient, SabnzbdClient, Submission};
pub use collection::{CollectionItem, CollectionStatus, MinimumAvailability};
pub use engine::{spawn_poll_loop, AcquisitionOrchestrator, GrabResult};
pub use import::{Importer, LoggingImporter};
pub use requested_index::{RequestedEntry, RequestedIndex};

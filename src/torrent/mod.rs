//! BitTorrent acquisition engine: a thin `librqbit::Session` wrapper plus
//! the item map, history ring, and resume-data bookkeeping spec.md §4.6
//! describes. Gated behind the `torrent` feature (default-on); disabling
//! it keeps the rest of the crate buildable without pulling in
//! `librqbit`, with every operation reporting `Outcome::Failed`.

pub mod engine;
pub mod item;
pub mod state;

pub use engine::{TorrentEngine, TorrentSource};
pub use item::{TorrentHistoryEntry, TorrentItem, TorrentStatus};
pub use state::TorrentState;

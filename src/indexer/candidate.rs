//! A release candidate as returned by an indexer search, independent of
//! whether the response was JSON or XML on the wire.

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub nzb_url: String,
    pub size_bytes: u64,
}

//! NNTP transport: one authenticated connection (`connection`), a
//! `deadpool`-backed per-server connection pool (`pool`), and a
//! priority-ordered dispatcher across all configured servers
//! (`dispatcher`).

pub mod connection;
pub mod dispatcher;
pub mod pool;

pub use connection::{AsyncNntpConnection, SegmentRequest};
pub use dispatcher::Dispatcher;
pub use pool::ServerPool;

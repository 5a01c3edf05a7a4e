//! Out-of-process engine supervision: each acquisition engine (NZB,
//! torrent) runs as its own child process, talked to over newline-
//! delimited JSON on stdin/stdout plus an atomic-rename status
//! snapshot file, so a web-facing caller never blocks on engine
//! internals and a crashed engine can be restarted transparently.

pub mod child;
pub mod message;
pub mod proxy;
pub mod supervisor;

pub use child::{run_child_loop, IpcEngine};
pub use message::{Command, CommandResult, Snapshot};
pub use proxy::EngineProxy;
pub use supervisor::spawn_supervisor;

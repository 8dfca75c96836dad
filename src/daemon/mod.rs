//! Daemon module - background process holding the index in memory.
//!
//! Loading the embedding index dominates the cost of a one-shot search. The
//! daemon loads it once, serves searches and incremental updates over a
//! Unix socket, and refreshes itself from the vault on a timer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        vault-search daemon              │
//! │  - index + reranker in memory           │
//! │  - periodic incremental update          │
//! │  - Unix socket server                   │
//! └─────────────────────────────────────────┘
//!           ▲
//!           │ <data dir>/.vault-search.sock
//!           ▼
//! ┌─────────────────────────────────────────┐
//! │        vault-search CLI                 │
//! │  - one JSON request per connection      │
//! │  - falls back to in-process work        │
//! └─────────────────────────────────────────┘
//! ```

pub mod client;
pub mod lifecycle;
pub mod protocol;
pub mod server;

pub use client::{send_request, DaemonController, Route, Routed};
pub use lifecycle::{daemon_running, run_daemon, start_daemon, stop_daemon, StartOutcome};
pub use protocol::{Request, Response};
pub use server::Server;

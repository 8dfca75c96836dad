//! # vault-search
//!
//! Semantic search over a directory of Markdown notes.
//!
//! The vault is embedded into a persistent vector index which is kept up to
//! date incrementally (only files whose mtime or size moved are re-read).
//! Searches run either inside a long-lived daemon that holds the index in
//! memory, or directly in the calling process when no daemon is available.
//!
//! ## Key Features
//!
//! - **Incremental**: Change tracking by mtime and size, deletions detected
//! - **Warm queries**: Optional daemon over a private Unix socket
//! - **Reranking**: Over-fetch, then reorder candidates with a second scorer
//! - **Self-healing**: Stale daemon records are cleaned up by whoever finds them
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vault_search::{build_direct, Config, DaemonController};
//!
//! let config = Config::load()?;
//! build_direct(&config, false)?;
//!
//! let controller = DaemonController::new(&config)?;
//! let hits = controller.search("meeting notes", 5, true)?;
//! for hit in hits.value {
//!     println!("{:.3} {}", hit.score, hit.path);
//! }
//! # Ok::<(), vault_search::VaultError>(())
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod index;
pub mod indexer;
pub mod query;
pub mod storage;

// Re-exports for convenience
pub use config::Config;
pub use error::{Result, VaultError};

pub use daemon::{DaemonController, Route, Routed, StartOutcome};
pub use index::{create_store, open_store, Document, IndexStore, SearchHit};
pub use indexer::{build_direct, BuildStats, Indexer};
pub use query::{create_reranker, search, Reranker};

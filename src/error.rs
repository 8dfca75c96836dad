//! Error types for vault-search.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Vault root unset, missing, or not a directory; unreadable config file.
    #[error("configuration error: {0}")]
    Config(String),

    /// A single document could not be read or decoded.
    #[error("could not extract {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("index store error: {0}")]
    IndexStore(String),

    #[error("index not found at {0}, run `vault-search index` first")]
    IndexNotFound(PathBuf),

    /// Malformed request or response on the daemon socket.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The exclusive start lock is held by someone else.
    #[error("another process is starting the daemon")]
    DaemonBusy,

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    pub fn config(msg: impl Into<String>) -> Self {
        VaultError::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        VaultError::IndexStore(msg.into())
    }
}

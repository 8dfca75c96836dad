//! Daemon protocol - request/response types for CLI-daemon communication.
//!
//! One JSON object per direction per connection. The client writes a request
//! (at most [`MAX_REQUEST_BYTES`]), the daemon answers with exactly one
//! response and closes the connection.

use serde::{Deserialize, Serialize};

use crate::index::SearchHit;
use crate::indexer::BuildStats;

/// Upper bound on a request body.
pub const MAX_REQUEST_BYTES: usize = 4096;

pub const DEFAULT_LIMIT: usize = 5;

const UNKNOWN_COMMAND: &str = "unknown command";

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_rerank() -> bool {
    true
}

/// Request from CLI to daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Request {
    /// Ranked search over the in-memory index
    Search {
        query: String,
        #[serde(default = "default_limit")]
        limit: usize,
        #[serde(default = "default_rerank")]
        rerank: bool,
    },

    /// Incremental build against the in-memory index
    Update,

    /// Check if daemon is alive
    Ping,

    /// Any command this daemon does not know
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Response from daemon to CLI.
///
/// The wire shape depends on the request: `{"results": [...]}` for search,
/// `{"status": "ok", "changed": n, "deleted": n}` for update,
/// `{"status": "ok"}` for ping, `{"status": "error", "error": "..."}` on
/// failure and `{"error": "unknown command"}` for an unrecognised command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SearchHit>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn results(results: Vec<SearchHit>) -> Self {
        Response {
            results: Some(results),
            ..Default::default()
        }
    }

    pub fn updated(stats: BuildStats) -> Self {
        Response {
            status: Some(Status::Ok),
            changed: Some(stats.changed),
            deleted: Some(stats.deleted),
            ..Default::default()
        }
    }

    pub fn pong() -> Self {
        Response {
            status: Some(Status::Ok),
            ..Default::default()
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response {
            status: Some(Status::Error),
            error: Some(msg.into()),
            ..Default::default()
        }
    }

    pub fn unknown_command() -> Self {
        Response {
            error: Some(UNKNOWN_COMMAND.to_string()),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Some(Status::Ok)
    }

    /// The daemon predates the command we sent.
    pub fn is_unknown_command(&self) -> bool {
        self.error.as_deref() == Some(UNKNOWN_COMMAND)
    }

    /// Counts from a successful update response.
    pub fn build_stats(&self) -> Option<BuildStats> {
        if !self.is_ok() {
            return None;
        }
        Some(BuildStats {
            changed: self.changed?,
            deleted: self.deleted?,
        })
    }
}

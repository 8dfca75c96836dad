//! Daemon client - talk to the daemon, fall back to in-process work.
//!
//! Every operation prefers a running daemon and degrades silently to the
//! direct path on any connection or protocol problem, so callers never need
//! to care whether a daemon is up.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::lifecycle::{self, StartOutcome};
use super::protocol::{Request, Response, MAX_REQUEST_BYTES};
use crate::config::Config;
use crate::error::{Result, VaultError};
use crate::index::{self, SearchHit};
use crate::indexer::{self, BuildStats};
use crate::query;

/// Which process did the work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Daemon,
    Direct,
}

/// A result together with the route that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed<T> {
    pub value: T,
    pub route: Route,
}

impl<T> Routed<T> {
    fn daemon(value: T) -> Self {
        Self {
            value,
            route: Route::Daemon,
        }
    }

    fn direct(value: T) -> Self {
        Self {
            value,
            route: Route::Direct,
        }
    }
}

/// Send one request and read the single response.
pub fn send_request(config: &Config, request: &Request, timeout: Duration) -> Result<Response> {
    let body = serde_json::to_vec(request)?;
    if body.len() > MAX_REQUEST_BYTES {
        return Err(VaultError::Protocol(format!(
            "request is {} bytes, limit is {}",
            body.len(),
            MAX_REQUEST_BYTES
        )));
    }

    let mut stream = UnixStream::connect(config.socket_path())?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    stream.write_all(&body)?;
    stream.shutdown(Shutdown::Write)?;

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply)?;
    if reply.is_empty() {
        return Err(VaultError::Protocol(
            "daemon closed the connection without a response".to_string(),
        ));
    }
    Ok(serde_json::from_slice(&reply)?)
}

/// Routes CLI operations to the daemon or the direct path.
pub struct DaemonController<'a> {
    config: &'a Config,
    program: PathBuf,
}

impl<'a> DaemonController<'a> {
    /// Controller that re-executes the current binary to start daemons.
    pub fn new(config: &'a Config) -> Result<Self> {
        Ok(Self::with_program(config, std::env::current_exe()?))
    }

    pub fn with_program(config: &'a Config, program: impl Into<PathBuf>) -> Self {
        Self {
            config,
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn is_running(&self) -> bool {
        lifecycle::daemon_running(self.config)
    }

    pub fn pid(&self) -> Option<u32> {
        lifecycle::daemon_pid(self.config)
    }

    pub fn start(&self) -> Result<StartOutcome> {
        lifecycle::start_daemon(self.config, &self.program)
    }

    pub fn stop(&self) -> Result<bool> {
        lifecycle::stop_daemon(self.config)
    }

    /// Ping the daemon; `false` if none answers.
    pub fn ping(&self) -> bool {
        self.is_running()
            && send_request(self.config, &Request::Ping, self.config.search_timeout())
                .map(|r| r.is_ok())
                .unwrap_or(false)
    }

    /// Search through the daemon if one answers, otherwise in-process.
    pub fn search(&self, query: &str, limit: usize, rerank: bool) -> Result<Routed<Vec<SearchHit>>> {
        if !self.config.snapshot_exists() {
            return Err(VaultError::IndexNotFound(self.config.snapshot_path()));
        }

        if self.is_running() {
            let request = Request::Search {
                query: query.to_string(),
                limit,
                rerank,
            };
            match send_request(self.config, &request, self.config.search_timeout()) {
                Ok(Response {
                    results: Some(hits),
                    ..
                }) => return Ok(Routed::daemon(hits)),
                Ok(response) => debug!(error = ?response.error, "daemon search failed, searching directly"),
                Err(e) => debug!(error = %e, "daemon unreachable, searching directly"),
            }
        }

        let store = index::open_store(self.config)?;
        let reranker = if rerank {
            Some(query::create_reranker(self.config)?)
        } else {
            None
        };
        let hits = query::search(
            self.config,
            store.as_ref(),
            reranker.as_deref(),
            query,
            limit,
            rerank,
        )?;
        Ok(Routed::direct(hits))
    }

    /// Incremental update through the daemon if one answers, otherwise
    /// in-process.
    ///
    /// A daemon too old to know `update` is restarted once and asked again.
    pub fn update(&self) -> Result<Routed<BuildStats>> {
        if self.is_running() {
            match self.request_update() {
                Ok(stats) => return Ok(Routed::daemon(stats)),
                Err(UpdateFailure::Outdated) => {
                    info!("daemon does not support update, restarting it");
                    if let Some(stats) = self.restart_and_update() {
                        return Ok(Routed::daemon(stats));
                    }
                }
                Err(UpdateFailure::Other(reason)) => {
                    warn!(%reason, "daemon update failed, updating directly")
                }
            }
        }

        Ok(Routed::direct(indexer::build_direct(self.config, true)?))
    }

    fn request_update(&self) -> std::result::Result<BuildStats, UpdateFailure> {
        let response = send_request(self.config, &Request::Update, self.config.update_timeout())
            .map_err(|e| UpdateFailure::Other(e.to_string()))?;
        if response.is_unknown_command() {
            return Err(UpdateFailure::Outdated);
        }
        response.build_stats().ok_or_else(|| {
            UpdateFailure::Other(
                response
                    .error
                    .unwrap_or_else(|| "malformed update response".to_string()),
            )
        })
    }

    fn restart_and_update(&self) -> Option<BuildStats> {
        if let Err(e) = self.stop() {
            warn!(error = %e, "cannot stop outdated daemon");
            return None;
        }
        match self.start() {
            Ok(StartOutcome::Started { .. }) | Ok(StartOutcome::AlreadyRunning { .. }) => {}
            Ok(outcome) => {
                warn!(?outcome, "daemon restart did not complete");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "daemon restart failed");
                return None;
            }
        }
        match self.request_update() {
            Ok(stats) => Some(stats),
            Err(_) => None,
        }
    }
}

enum UpdateFailure {
    /// The daemon answered "unknown command".
    Outdated,
    Other(String),
}

//! Daemon server - Unix socket server that handles CLI requests.
//!
//! Single-threaded: one connection is read, answered and closed before the
//! next is accepted, so the warm store needs no locking. Between connections
//! the accept wait times out once a second, which is when the periodic
//! incremental update gets its chance to run.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::protocol::{Request, Response, MAX_REQUEST_BYTES};
use crate::config::Config;
use crate::error::{Result, VaultError};
use crate::index::IndexStore;
use crate::indexer::{BuildStats, Indexer};
use crate::query::{self, Reranker};
use crate::storage;

/// How long one accept wait lasts before the loop looks at the timer.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);

/// A client that connects and then says nothing is dropped after this.
const CLIENT_IO_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Server {
    config: Config,
    listener: UnixListener,
    store: Box<dyn IndexStore>,
    reranker: Box<dyn Reranker>,
    last_update: Instant,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Bind the socket (replacing a stale one) with owner-only permissions.
    ///
    /// Setting `shutdown` makes [`Server::serve`] return within one accept
    /// wait.
    pub fn bind(
        config: Config,
        store: Box<dyn IndexStore>,
        reranker: Box<dyn Reranker>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let sock_path = config.socket_path();
        storage::remove_if_exists(&sock_path)?;

        let listener = UnixListener::bind(&sock_path)?;
        storage::restrict_to_owner(&sock_path)?;
        listener.set_nonblocking(true)?;
        info!(socket = %sock_path.display(), "daemon listening");

        Ok(Self {
            config,
            listener,
            store,
            reranker,
            last_update: Instant::now(),
            shutdown,
        })
    }

    /// Accept and answer connections until shut down.
    pub fn serve(&mut self) -> Result<()> {
        info!(
            documents = self.store.len(),
            update_interval_secs = self.config.update_interval_secs,
            "daemon ready"
        );

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.wait_for_client(ACCEPT_TIMEOUT) {
                Ok(true) => self.accept_one(),
                Ok(false) => self.maybe_update(),
                Err(e) => {
                    error!(error = %e, "accept wait failed");
                    thread::sleep(ACCEPT_TIMEOUT);
                }
            }
        }

        Ok(())
    }

    fn accept_one(&mut self) {
        match self.listener.accept() {
            Ok((stream, _)) => {
                if let Err(e) = self.handle_connection(stream) {
                    warn!(error = %e, "connection error");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!(error = %e, "accept error"),
        }
    }

    /// `poll(2)` on the listener; `Ok(false)` on timeout or signal.
    fn wait_for_client(&self, timeout: Duration) -> io::Result<bool> {
        let mut fds = libc::pollfd {
            fd: self.listener.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut fds, 1, timeout.as_millis() as libc::c_int) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(rc > 0 && fds.revents & libc::POLLIN != 0)
    }

    /// Read one request, write exactly one response, close.
    fn handle_connection(&mut self, mut stream: UnixStream) -> Result<()> {
        // Accepted sockets inherit O_NONBLOCK on some platforms.
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(CLIENT_IO_TIMEOUT))?;
        stream.set_write_timeout(Some(CLIENT_IO_TIMEOUT))?;

        let response = match read_request(&mut stream) {
            Ok(request) => self.handle_request(request),
            Err(e) => {
                debug!(error = %e, "rejecting request");
                Response::error(e.to_string())
            }
        };

        let body = serde_json::to_vec(&response)?;
        stream.write_all(&body)?;
        stream.flush()?;
        let _ = stream.shutdown(Shutdown::Both);
        Ok(())
    }

    fn handle_request(&mut self, request: Request) -> Response {
        match request {
            Request::Search {
                query,
                limit,
                rerank,
            } => {
                debug!(%query, limit, rerank, "search");
                match query::search(
                    &self.config,
                    self.store.as_ref(),
                    Some(self.reranker.as_ref()),
                    &query,
                    limit,
                    rerank,
                ) {
                    Ok(hits) => Response::results(hits),
                    Err(e) => {
                        warn!(error = %e, "search failed");
                        Response::error(e.to_string())
                    }
                }
            }

            Request::Update => match self.update() {
                Ok(stats) => Response::updated(stats),
                Err(e) => {
                    warn!(error = %e, "update failed");
                    Response::error(e.to_string())
                }
            },

            Request::Ping => Response::pong(),

            Request::Unknown => Response::unknown_command(),
        }
    }

    /// Incremental build against the warm store.
    fn update(&mut self) -> Result<BuildStats> {
        Indexer::new(&self.config).build(self.store.as_mut(), true, true)
    }

    /// Run the periodic update once the interval has elapsed.
    /// The timer restarts whether or not the update succeeded.
    fn maybe_update(&mut self) {
        if self.last_update.elapsed() < self.config.update_interval() {
            return;
        }

        match self.update() {
            Ok(stats) if !stats.is_noop() => info!(
                changed = stats.changed,
                deleted = stats.deleted,
                "auto-update applied"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "auto-update failed"),
        }
        self.last_update = Instant::now();
    }
}

/// Read until the peer stops writing, the body is complete JSON, or the size
/// limit is reached.
fn read_request(stream: &mut UnixStream) -> Result<Request> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() >= MAX_REQUEST_BYTES {
            buf.truncate(MAX_REQUEST_BYTES);
            break;
        }
        if serde_json::from_slice::<serde::de::IgnoredAny>(&buf).is_ok() {
            break;
        }
    }

    if buf.is_empty() {
        return Err(VaultError::Protocol("empty request".to_string()));
    }
    serde_json::from_slice(&buf)
        .map_err(|e| VaultError::Protocol(format!("invalid request: {}", e)))
}

//! Daemon lifecycle - process record, liveness, exclusive start, stop.
//!
//! ```text
//! NOT_RUNNING ──start──▶ STARTING ──socket bound──▶ READY ──SIGTERM──▶ NOT_RUNNING
//! ```
//!
//! The pid file and the socket are liveness hints, not locks: any reader that
//! finds them pointing at a dead process deletes them. The only real mutual
//! exclusion is the start lock, held while one caller spawns the worker and
//! waits for it to come up.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use std::os::unix::process::CommandExt;

use super::server::Server;
use crate::config::{Config, DATA_DIR_ENV, VAULT_PATH_ENV};
use crate::error::{Result, VaultError};
use crate::index;
use crate::query;
use crate::storage;

/// How long `stop` waits for the daemon to clean up after SIGTERM.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of asking for a daemon to be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
    /// Someone else holds the start lock.
    Busy,
    /// The worker never became live; see the log.
    Failed { log: PathBuf },
}

/// Exclusive advisory lock held for the duration of a start sequence.
/// Released on drop.
pub struct StartLock {
    file: File,
}

impl StartLock {
    /// Non-blocking attempt; `VaultError::DaemonBusy` if already held.
    pub fn try_acquire(path: &Path) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(false);
        #[cfg(unix)]
        options.mode(storage::fs::FILE_MODE);
        let file = options.open(path)?;
        Self::try_lock_exclusive(&file)?;
        Ok(StartLock { file })
    }

    #[cfg(unix)]
    fn try_lock_exclusive(file: &File) -> Result<()> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::EWOULDBLOCK)
                || err.raw_os_error() == Some(libc::EAGAIN)
            {
                return Err(VaultError::DaemonBusy);
            }
            return Err(err.into());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock_exclusive(_file: &File) -> Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for StartLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        unsafe { libc::flock(fd, libc::LOCK_UN) };
    }
}

/// Check if a process with the given PID exists (signal 0 = existence check).
pub fn process_exists(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // Alive but owned by someone else.
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// PID stored in the process record, if any and parseable.
pub fn read_pid(config: &Config) -> Option<u32> {
    fs::read_to_string(config.pid_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn write_pid(config: &Config, pid: u32) -> Result<()> {
    storage::write_atomic(&config.pid_path(), pid.to_string().as_bytes())
}

/// Remove the process record and the socket.
pub fn remove_runtime_files(config: &Config) {
    let _ = storage::remove_if_exists(&config.socket_path());
    let _ = storage::remove_if_exists(&config.pid_path());
}

/// Cleanup for a daemon on its way out: remove socket and record unless the
/// record already names a different process.
pub fn release_runtime_files(config: &Config, own_pid: u32) {
    match read_pid(config) {
        Some(pid) if pid != own_pid => {
            debug!(pid, own_pid, "process record belongs to another daemon, leaving it")
        }
        _ => remove_runtime_files(config),
    }
}

/// Whether a live daemon owns this data directory.
///
/// A process record naming a dead (or unparseable) pid is stale: it is
/// deleted together with the socket and `false` is returned.
pub fn daemon_running(config: &Config) -> bool {
    daemon_pid(config).is_some()
}

/// PID of the live daemon, healing stale state like [`daemon_running`].
pub fn daemon_pid(config: &Config) -> Option<u32> {
    let pid_path = config.pid_path();
    if !pid_path.exists() {
        return None;
    }

    match read_pid(config) {
        Some(pid) if process_exists(pid) => Some(pid),
        stale => {
            debug!(pid = ?stale, "removing stale daemon record");
            remove_runtime_files(config);
            None
        }
    }
}

/// Start a background daemon by re-running `program` in daemon mode.
///
/// Requires an index snapshot. Holds the start lock while the worker is
/// spawned and until it binds its socket (or `start_timeout` passes), then
/// reports whether a daemon is live.
pub fn start_daemon(config: &Config, program: &Path) -> Result<StartOutcome> {
    if let Some(pid) = daemon_pid(config) {
        return Ok(StartOutcome::AlreadyRunning { pid });
    }

    if !config.snapshot_exists() {
        return Err(VaultError::IndexNotFound(config.snapshot_path()));
    }

    storage::ensure_secure_dir(&config.data_dir)?;
    let lock = match StartLock::try_acquire(&config.lock_path()) {
        Ok(lock) => lock,
        Err(VaultError::DaemonBusy) => {
            info!("another process is starting the daemon");
            return Ok(StartOutcome::Busy);
        }
        Err(e) => return Err(e),
    };

    // Another starter may have finished between our check and the lock.
    if let Some(pid) = daemon_pid(config) {
        return Ok(StartOutcome::AlreadyRunning { pid });
    }
    storage::remove_if_exists(&config.socket_path())?;

    let mut child = spawn_worker(config, program)?;
    info!(pid = child.id(), "daemon process spawned");
    wait_ready(config, &mut child, config.start_timeout());
    drop(lock);

    Ok(match daemon_pid(config) {
        Some(pid) => StartOutcome::Started { pid },
        None => StartOutcome::Failed {
            log: config.log_path(),
        },
    })
}

fn spawn_worker(config: &Config, program: &Path) -> Result<Child> {
    let log = storage::open_private_append(&config.log_path())?;

    let mut command = Command::new(program);
    command
        .arg("daemon")
        .env(DATA_DIR_ENV, &config.data_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log));
    if let Some(vault) = &config.vault_path {
        command.env(VAULT_PATH_ENV, vault);
    }

    // Detach from the caller's session and terminal.
    #[cfg(unix)]
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    Ok(command.spawn()?)
}

/// Wait until the socket appears, the worker dies, or `timeout` passes.
fn wait_ready(config: &Config, child: &mut Child, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let socket = config.socket_path();
    while Instant::now() < deadline {
        if socket.exists() {
            return;
        }
        match child.try_wait() {
            Ok(Some(status)) => {
                warn!(%status, log = %config.log_path().display(), "daemon exited during startup");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "cannot poll daemon process");
                return;
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
    warn!(timeout_ms = timeout.as_millis() as u64, "daemon not ready before timeout");
}

/// Send SIGTERM to the daemon and wait for it to clean up.
/// Returns `false` if no daemon was running.
pub fn stop_daemon(config: &Config) -> Result<bool> {
    let Some(pid) = daemon_pid(config) else {
        return Ok(false);
    };

    info!(pid, "stopping daemon");
    if unsafe { libc::kill(pid as i32, libc::SIGTERM) } != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err.into());
        }
    }

    let deadline = Instant::now() + STOP_TIMEOUT;
    let pid_path = config.pid_path();
    while Instant::now() < deadline && pid_path.exists() && process_exists(pid) {
        thread::sleep(POLL_INTERVAL);
    }

    remove_runtime_files(config);
    Ok(true)
}

/// Body of the background worker: record our pid, load the index and the
/// reranker, bind the socket, serve until terminated.
///
/// SIGTERM/SIGINT/SIGHUP only raise the shutdown flag; the serve loop notices
/// it within one accept wait and cleanup happens here. Failing to load the
/// snapshot or to bind the socket is fatal; the process record is removed
/// before the error is returned.
pub fn run_daemon(config: Config) -> Result<()> {
    let own_pid = std::process::id();
    if let Some(pid) = daemon_pid(&config) {
        if pid != own_pid {
            return Err(VaultError::config(format!(
                "daemon already running (PID {})",
                pid
            )));
        }
    }

    storage::ensure_secure_dir(&config.data_dir)?;
    write_pid(&config, own_pid)?;
    info!(pid = own_pid, "daemon starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    install_shutdown_handler(Arc::clone(&shutdown))?;

    let server = index::open_store(&config)
        .and_then(|store| Ok((store, query::create_reranker(&config)?)))
        .and_then(|(store, reranker)| {
            info!(documents = store.len(), "models loaded");
            if shutdown.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Server::bind(config.clone(), store, reranker, Arc::clone(&shutdown)).map(Some)
        });

    let mut server = match server {
        Ok(Some(server)) => server,
        Ok(None) => {
            release_runtime_files(&config, own_pid);
            info!("daemon stopped before serving");
            return Ok(());
        }
        Err(e) => {
            release_runtime_files(&config, own_pid);
            return Err(e);
        }
    };

    let result = server.serve();
    release_runtime_files(&config, own_pid);
    info!("daemon stopped");
    result
}

/// On SIGTERM/SIGINT/SIGHUP: ask the serve loop to stop.
fn install_shutdown_handler(shutdown: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("daemon stopping");
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|e| VaultError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Far above any kernel's pid_max.
    const DEAD_PID: u32 = 2_000_000_000;

    #[test]
    fn test_not_running_without_record() {
        let dir = tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        assert!(!daemon_running(&config));
    }

    #[test]
    fn test_stale_record_is_healed() {
        let dir = tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        fs::write(config.pid_path(), DEAD_PID.to_string()).unwrap();
        fs::write(config.socket_path(), "").unwrap();

        assert!(!daemon_running(&config));
        assert!(!config.pid_path().exists());
        assert!(!config.socket_path().exists());
    }

    #[test]
    fn test_garbage_record_is_healed() {
        let dir = tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        fs::write(config.pid_path(), "not a pid").unwrap();

        assert!(!daemon_running(&config));
        assert!(!config.pid_path().exists());
    }

    #[test]
    fn test_live_record_is_running() {
        let dir = tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        write_pid(&config, std::process::id()).unwrap();

        assert_eq!(daemon_pid(&config), Some(std::process::id()));
        assert!(config.pid_path().exists());
    }

    #[test]
    fn test_start_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("start.lock");

        let first = StartLock::try_acquire(&path).unwrap();
        assert!(matches!(StartLock::try_acquire(&path), Err(VaultError::DaemonBusy)));
        drop(first);
        assert!(StartLock::try_acquire(&path).is_ok());
    }

    #[test]
    fn test_start_without_index_is_rejected() {
        let dir = tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        let err = start_daemon(&config, Path::new("/nonexistent/vault-search")).unwrap_err();
        assert!(matches!(err, VaultError::IndexNotFound(_)));
    }

    #[test]
    fn test_start_while_lock_held_is_busy() {
        let dir = tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        fs::create_dir_all(config.index_dir()).unwrap();
        fs::write(config.snapshot_path(), b"").unwrap();

        let _held = StartLock::try_acquire(&config.lock_path()).unwrap();
        let outcome = start_daemon(&config, Path::new("/nonexistent/vault-search")).unwrap();
        assert_eq!(outcome, StartOutcome::Busy);
    }

    #[test]
    #[cfg(unix)]
    fn test_start_lock_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("start.lock");
        let _lock = StartLock::try_acquire(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_release_keeps_another_daemons_record() {
        let dir = tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        write_pid(&config, std::process::id() + 1).unwrap();
        fs::write(config.socket_path(), "").unwrap();

        release_runtime_files(&config, std::process::id());
        assert!(config.pid_path().exists());
        assert!(config.socket_path().exists());
    }

    #[test]
    fn test_release_removes_own_record() {
        let dir = tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        write_pid(&config, std::process::id()).unwrap();
        fs::write(config.socket_path(), "").unwrap();

        release_runtime_files(&config, std::process::id());
        assert!(!config.pid_path().exists());
        assert!(!config.socket_path().exists());
    }

    #[test]
    fn test_stop_when_not_running() {
        let dir = tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        assert!(!stop_daemon(&config).unwrap());
    }

    #[test]
    fn test_process_exists_rejects_nonpositive() {
        assert!(!process_exists(0));
        assert!(!process_exists(DEAD_PID));
        assert!(process_exists(std::process::id()));
    }
}

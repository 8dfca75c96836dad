//! Daemon lifecycle against the real binary.
//!
//! Each test gets its own vault and data directory, so each daemon has its
//! own socket and process record. A guard stops the daemon even when an
//! assertion fails.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

use vault_search::daemon::{self, send_request, Request};
use vault_search::{build_direct, BuildStats, Config, DaemonController, Route, StartOutcome};

const BINARY: &str = env!("CARGO_BIN_EXE_vault-search");

struct Fixture {
    vault: TempDir,
    _data: TempDir,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let vault = tempdir().unwrap();
        let data = tempdir().unwrap();
        fs::write(vault.path().join("a.md"), "# Alpha\ncats purr and nap in the sun").unwrap();
        fs::write(vault.path().join("b.md"), "# Beta\ndogs bark at the mail carrier").unwrap();
        fs::write(vault.path().join("c.md"), "# Gamma\nbirds sing at dawn").unwrap();

        let mut config = Config::with_data_dir(data.path());
        config.vault_path = Some(vault.path().to_path_buf());
        // Generous for slow CI machines.
        config.start_timeout_ms = 10_000;
        build_direct(&config, false).unwrap();

        Self {
            vault,
            _data: data,
            config,
        }
    }

    fn controller(&self) -> DaemonController<'_> {
        DaemonController::with_program(&self.config, BINARY)
    }

    fn vault(&self) -> &Path {
        self.vault.path()
    }
}

/// Stops the daemon on drop.
struct StopOnDrop<'a>(&'a Config);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        let _ = daemon::stop_daemon(self.0);
    }
}

#[test]
fn test_search_and_update_through_daemon() {
    let fixture = Fixture::new();
    let controller = fixture.controller();
    let _guard = StopOnDrop(&fixture.config);

    assert!(matches!(controller.start().unwrap(), StartOutcome::Started { .. }));
    assert!(controller.is_running());
    assert!(controller.ping());

    let routed = controller.search("cats", 1, false).unwrap();
    assert_eq!(routed.route, Route::Daemon);
    assert_eq!(routed.value.len(), 1);
    assert_eq!(routed.value[0].path, "a.md");

    fs::write(fixture.vault().join("b.md"), "# Beta\ndogs bark at the cats").unwrap();
    let routed = controller.update().unwrap();
    assert_eq!(routed.route, Route::Daemon);
    assert_eq!(routed.value, BuildStats { changed: 1, deleted: 0 });

    assert!(controller.stop().unwrap());
    assert!(!controller.is_running());
    assert!(!fixture.config.pid_path().exists());
    assert!(!fixture.config.socket_path().exists());
}

#[test]
fn test_socket_and_log_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new();
    let controller = fixture.controller();
    let _guard = StopOnDrop(&fixture.config);

    assert!(matches!(controller.start().unwrap(), StartOutcome::Started { .. }));

    for path in [fixture.config.socket_path(), fixture.config.log_path()] {
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600, "{}", path.display());
    }
}

#[test]
fn test_second_start_reports_already_running() {
    let fixture = Fixture::new();
    let controller = fixture.controller();
    let _guard = StopOnDrop(&fixture.config);

    let first = controller.start().unwrap();
    let StartOutcome::Started { pid } = first else {
        panic!("unexpected outcome {:?}", first);
    };
    assert_eq!(controller.start().unwrap(), StartOutcome::AlreadyRunning { pid });
}

#[test]
fn test_concurrent_starts_yield_one_daemon() {
    let fixture = Fixture::new();
    let _guard = StopOnDrop(&fixture.config);
    let barrier = Arc::new(Barrier::new(4));

    let outcomes: Vec<StartOutcome> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let fixture = &fixture;
                scope.spawn(move || {
                    barrier.wait();
                    fixture.controller().start().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let started = outcomes
        .iter()
        .filter(|o| matches!(o, StartOutcome::Started { .. }))
        .count();
    assert_eq!(started, 1, "{:?}", outcomes);
    assert!(outcomes.iter().all(|o| matches!(
        o,
        StartOutcome::Started { .. } | StartOutcome::AlreadyRunning { .. } | StartOutcome::Busy
    )));
    assert!(fixture.controller().ping());
}

#[test]
fn test_stale_record_does_not_block_start() {
    let fixture = Fixture::new();
    let _guard = StopOnDrop(&fixture.config);
    fs::write(fixture.config.pid_path(), "2000000000").unwrap();
    fs::write(fixture.config.socket_path(), "").unwrap();

    let controller = fixture.controller();
    assert!(!controller.is_running());
    assert!(matches!(controller.start().unwrap(), StartOutcome::Started { .. }));
    assert!(controller.ping());
}

#[test]
fn test_unknown_command_is_answered() {
    let fixture = Fixture::new();
    let controller = fixture.controller();
    let _guard = StopOnDrop(&fixture.config);
    controller.start().unwrap();

    let response = send_request(&fixture.config, &Request::Unknown, Duration::from_secs(5)).unwrap();
    assert!(response.is_unknown_command());
    assert!(controller.ping());
}

/// Stands in for a daemon from an older release: answers every request
/// with "unknown command".
fn serve_outdated_daemon(config: &Config) {
    let listener = UnixListener::bind(config.socket_path()).unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut request = Vec::new();
            let _ = stream.read_to_end(&mut request);
            let _ = stream.write_all(br#"{"error":"unknown command"}"#);
        }
    });
}

#[test]
fn test_outdated_daemon_is_restarted_for_update() {
    let fixture = Fixture::new();
    let controller = fixture.controller();
    let _guard = StopOnDrop(&fixture.config);

    serve_outdated_daemon(&fixture.config);
    let mut old_daemon = Command::new("sleep").arg("60").spawn().unwrap();
    fs::write(fixture.config.pid_path(), old_daemon.id().to_string()).unwrap();
    // Reap it once SIGTERM arrives so it stops looking alive.
    let reaper = thread::spawn(move || old_daemon.wait());
    assert!(controller.is_running());

    fs::write(fixture.vault().join("b.md"), "# Beta
dogs bark at the cats").unwrap();
    let routed = controller.update().unwrap();
    assert_eq!(routed.route, Route::Daemon);
    assert_eq!(routed.value, BuildStats { changed: 1, deleted: 0 });

    assert!(reaper.join().unwrap().is_ok());
    assert!(controller.ping());
    let response = send_request(&fixture.config, &Request::Update, Duration::from_secs(10)).unwrap();
    assert_eq!(response.build_stats(), Some(BuildStats { changed: 0, deleted: 0 }));
}

#[test]
fn test_search_falls_back_after_daemon_dies() {
    let fixture = Fixture::new();
    let controller = fixture.controller();
    let _guard = StopOnDrop(&fixture.config);
    controller.start().unwrap();
    controller.stop().unwrap();

    let routed = controller.search("birds", 1, true).unwrap();
    assert_eq!(routed.route, Route::Direct);
    assert_eq!(routed.value[0].path, "c.md");
}

#[test]
fn test_start_requires_index() {
    let fixture = Fixture::new();
    let controller = fixture.controller();
    let _guard = StopOnDrop(&fixture.config);
    fs::remove_file(fixture.config.snapshot_path()).unwrap();

    assert!(controller.start().is_err());
    assert!(!controller.is_running());
}

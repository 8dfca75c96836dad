//! End-to-end runs of the `vault-search` binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

use vault_search::config::{DATA_DIR_ENV, VAULT_PATH_ENV};
use vault_search::SearchHit;

fn vault_search(data: &Path, vault: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vault-search"))
        .args(args)
        .env(DATA_DIR_ENV, data)
        .env(VAULT_PATH_ENV, vault)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_index_search_update() {
    let vault = tempdir().unwrap();
    let data = tempdir().unwrap();
    fs::write(vault.path().join("a.md"), "# Alpha\ncats purr").unwrap();
    fs::write(vault.path().join("b.md"), "# Beta\ndogs bark").unwrap();

    let out = vault_search(data.path(), vault.path(), &["index"]);
    assert!(out.status.success(), "{:?}", out);
    assert!(stdout(&out).contains("Indexed 2 documents"));

    let out = vault_search(
        data.path(),
        vault.path(),
        &["search", "cats", "-n", "1", "--no-rerank", "--json"],
    );
    assert!(out.status.success(), "{:?}", out);
    let hits: Vec<SearchHit> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "a.md");

    fs::write(vault.path().join("c.md"), "# Gamma\nbirds").unwrap();
    let out = vault_search(data.path(), vault.path(), &["update"]);
    assert!(out.status.success(), "{:?}", out);
    assert!(stdout(&out).contains("1 changed, 0 deleted (direct)"));
}

#[test]
fn test_search_without_index_fails() {
    let vault = tempdir().unwrap();
    let data = tempdir().unwrap();

    let out = vault_search(data.path(), vault.path(), &["search", "cats"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("vault-search index"));
}

#[test]
fn test_status_and_config() {
    let vault = tempdir().unwrap();
    let data = tempdir().unwrap();

    let out = vault_search(data.path(), vault.path(), &["status"]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("not running"));
    assert!(text.contains("not built"));

    let out = vault_search(data.path(), vault.path(), &["config", "--vault", &vault.path().display().to_string()]);
    assert!(out.status.success(), "{:?}", out);
    assert!(data.path().join("config.toml").exists());

    let out = vault_search(data.path(), vault.path(), &["stop"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("Daemon not running"));
}

//! Configuration.
//!
//! A single [`Config`] is built when the process starts and passed by
//! reference to every component. It combines the data directory (where the
//! snapshot, socket and pid file live), the optional `config.toml` stored in
//! it, and environment overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, VaultError};
use crate::storage;

/// Overrides the data directory.
pub const DATA_DIR_ENV: &str = "VAULT_SEARCH_DATA_DIR";

/// Overrides the configured vault path.
pub const VAULT_PATH_ENV: &str = "VAULT_SEARCH_PATH";

const CONFIG_FILE_NAME: &str = "config.toml";
const INDEX_DIR_NAME: &str = "index";
const SNAPSHOT_NAME: &str = "embeddings";
const METADATA_NAME: &str = "file_meta.json";
const SOCKET_NAME: &str = ".vault-search.sock";
const PID_NAME: &str = ".vault-search.pid";
const LOCK_NAME: &str = ".vault-search.lock";
const LOG_NAME: &str = "daemon.log";

/// Which embedder backs the vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Feature-hashed bag of words; no model download.
    #[default]
    Hashing,
    /// fastembed ONNX model (requires the `fastembed` cargo feature).
    Fastembed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Model name for the fastembed backend.
    pub model: String,
    /// Vector width for the hashing backend.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Hashing,
            model: "all-MiniLM-L6-v2".to_string(),
            dimensions: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of everything we persist. Not stored in the file itself.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// The document root being indexed.
    pub vault_path: Option<PathBuf>,

    /// Seconds between background incremental updates in the daemon.
    pub update_interval_secs: u64,

    /// Candidates fetched per requested result when reranking.
    pub rerank_overfetch: usize,

    /// Characters of each candidate passed to the reranker.
    pub rerank_prefix_chars: usize,

    pub default_limit: usize,

    /// How long `serve` waits for the worker to come up.
    pub start_timeout_ms: u64,

    pub search_timeout_secs: u64,

    pub update_timeout_secs: u64,

    pub embedding: EmbeddingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            vault_path: None,
            update_interval_secs: 60,
            rerank_overfetch: 2,
            rerank_prefix_chars: 1000,
            default_limit: 5,
            start_timeout_ms: 2000,
            search_timeout_secs: 30,
            update_timeout_secs: 300,
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Config {
    /// Defaults rooted at `data_dir`, ignoring any file or environment.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Build the process configuration: data directory from the environment
    /// (or the platform data dir), then `config.toml`, then `VAULT_SEARCH_PATH`.
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::data_dir()
                .map(|d| d.join("vault-search"))
                .ok_or_else(|| VaultError::config("cannot determine a data directory"))?,
        };

        let mut config = Self::load_from(&data_dir)?;
        if let Some(path) = std::env::var_os(VAULT_PATH_ENV).filter(|p| !p.is_empty()) {
            config.vault_path = Some(expand_home(Path::new(&path)));
        }
        Ok(config)
    }

    /// Read `config.toml` from `data_dir`; a missing file yields defaults.
    pub fn load_from(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            toml::from_str::<Config>(&raw).map_err(|e| {
                VaultError::config(format!("invalid {}: {}", path.display(), e))
            })?
        } else {
            Config::default()
        };
        config.data_dir = data_dir.to_path_buf();
        debug!(data_dir = %data_dir.display(), "configuration loaded");
        Ok(config)
    }

    /// Persist this configuration to `config.toml`.
    pub fn save(&self) -> Result<()> {
        storage::ensure_secure_dir(&self.data_dir)?;
        let raw = toml::to_string_pretty(self)
            .map_err(|e| VaultError::Serialize(e.to_string()))?;
        storage::write_atomic(&self.config_path(), raw.as_bytes())
    }

    /// Validate and record a new vault path. Returns the canonical path.
    pub fn set_vault_path(&mut self, path: &Path) -> Result<PathBuf> {
        let resolved = validate_root(&expand_home(path))?;
        self.vault_path = Some(resolved.clone());
        Ok(resolved)
    }

    /// The configured vault, resolved and checked to be an existing directory.
    pub fn vault_root(&self) -> Result<PathBuf> {
        match &self.vault_path {
            Some(path) => validate_root(path),
            None => Err(VaultError::config(format!(
                "vault path not configured; run `vault-search config --vault PATH` or set {}",
                VAULT_PATH_ENV
            ))),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join(INDEX_DIR_NAME)
    }

    /// The persisted embedding index.
    pub fn snapshot_path(&self) -> PathBuf {
        self.index_dir().join(SNAPSHOT_NAME)
    }

    /// The change-tracking file written next to the snapshot.
    pub fn metadata_path(&self) -> PathBuf {
        self.index_dir().join(METADATA_NAME)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.data_dir.join(SOCKET_NAME)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.data_dir.join(PID_NAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_NAME)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn snapshot_exists(&self) -> bool {
        self.snapshot_path().exists()
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.update_timeout_secs)
    }
}

fn validate_root(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(VaultError::config(format!(
            "vault path does not exist: {}",
            path.display()
        )));
    }
    let resolved = path.canonicalize()?;
    if !resolved.is_dir() {
        return Err(VaultError::config(format!(
            "vault path is not a directory: {}",
            resolved.display()
        )));
    }
    Ok(resolved)
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

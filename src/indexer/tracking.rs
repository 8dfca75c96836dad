//! Change-tracking metadata: document id → (mtime, size) at last index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{info, warn};

use crate::error::{Result, VaultError};
use crate::storage;

/// Metadata for every document present in the last saved snapshot.
pub type TrackedFiles = BTreeMap<String, FileMeta>;

/// What `stat` said about a file when it was indexed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Seconds since the Unix epoch.
    pub mtime: f64,
    pub size: u64,
}

impl FileMeta {
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path)?;
        let modified = meta.modified()?;
        let mtime = match modified.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs_f64(),
            Err(e) => -e.duration().as_secs_f64(),
        };
        Ok(Self {
            mtime,
            size: meta.len(),
        })
    }
}

/// Accepts both the current record format and the old one that stored a
/// content hash per file.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Stat(FileMeta),
    LegacyHash(String),
}

/// Read tracking metadata. A missing file, a corrupt file, or the legacy
/// hash format all yield an empty map, which forces re-extraction.
pub fn load(path: &Path) -> TrackedFiles {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return TrackedFiles::new(),
    };

    let stored: BTreeMap<String, StoredEntry> = match serde_json::from_str(&raw) {
        Ok(stored) => stored,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable change-tracking file, reindexing everything");
            return TrackedFiles::new();
        }
    };

    let mut tracked = TrackedFiles::new();
    for (id, entry) in stored {
        match entry {
            StoredEntry::Stat(meta) => {
                tracked.insert(id, meta);
            }
            StoredEntry::LegacyHash(_) => {
                info!("legacy change-tracking format found, reindexing everything");
                return TrackedFiles::new();
            }
        }
    }
    tracked
}

pub fn save(path: &Path, tracked: &TrackedFiles) -> Result<()> {
    let raw = serde_json::to_vec(tracked).map_err(|e| VaultError::Serialize(e.to_string()))?;
    storage::write_atomic(path, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip_preserves_exact_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file_meta.json");

        let mut tracked = TrackedFiles::new();
        tracked.insert("a.md".into(), FileMeta { mtime: 1_700_000_000.123_456_7, size: 42 });
        tracked.insert("dir/b.md".into(), FileMeta { mtime: 0.1, size: 0 });
        save(&path, &tracked).unwrap();

        assert_eq!(load(&path), tracked);
    }

    #[test]
    fn test_wire_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file_meta.json");
        let mut tracked = TrackedFiles::new();
        tracked.insert("a.md".into(), FileMeta { mtime: 1.5, size: 3 });
        save(&path, &tracked).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["a.md"]["mtime"], 1.5);
        assert_eq!(value["a.md"]["size"], 3);
    }

    #[test]
    fn test_legacy_hash_format_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file_meta.json");
        fs::write(&path, r#"{"a.md": "5d41402abc4b2a76b9719d911017c592"}"#).unwrap();
        assert!(load(&path).is_empty());
    }

    #[test]
    fn test_missing_and_corrupt_files_are_empty() {
        let dir = tempdir().unwrap();
        assert!(load(&dir.path().join("missing.json")).is_empty());

        let path = dir.path().join("corrupt.json");
        fs::write(&path, "{not json").unwrap();
        assert!(load(&path).is_empty());
    }
}

//! Indexing engine - full and incremental builds of the vault index.
//!
//! A build scans the vault, re-extracts only the files whose mtime or size
//! moved since the last build, applies the result to an [`IndexStore`], and
//! persists the snapshot followed by the change-tracking metadata. Metadata is
//! written strictly after the snapshot, so it never lists a document the saved
//! snapshot does not contain.

pub mod extract;
pub mod scan;
pub mod tracking;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::index::{self, Document, IndexStore};
use crate::storage;

pub use extract::{DocumentExtractor, MarkdownExtractor};
pub use scan::{file_changed, scan, Candidate, EXCLUDED_DIRS};
pub use tracking::{FileMeta, TrackedFiles};

/// Outcome of a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub changed: usize,
    pub deleted: usize,
}

impl BuildStats {
    pub fn is_noop(&self) -> bool {
        self.changed == 0 && self.deleted == 0
    }
}

pub struct Indexer<'a> {
    config: &'a Config,
    extractor: &'a dyn DocumentExtractor,
}

impl<'a> Indexer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            extractor: &MarkdownExtractor,
        }
    }

    pub fn with_extractor(config: &'a Config, extractor: &'a dyn DocumentExtractor) -> Self {
        Self { config, extractor }
    }

    /// Run a build against `store`.
    ///
    /// `preloaded` says whether `store` already holds the persisted snapshot
    /// (the daemon's warm store). A cold store is loaded from disk only when
    /// an incremental build actually has something to apply.
    pub fn build(
        &self,
        store: &mut dyn IndexStore,
        preloaded: bool,
        incremental: bool,
    ) -> Result<BuildStats> {
        let root = self.config.vault_root()?;
        let started = Instant::now();
        let snapshot_path = self.config.snapshot_path();

        // Without a snapshot there is nothing to be incremental against.
        let incremental_store = incremental && snapshot_path.exists();

        let candidates = scan(&root);
        info!(
            root = %root.display(),
            files = candidates.len(),
            incremental,
            "scanning vault"
        );

        let previous = if incremental_store {
            tracking::load(&self.config.metadata_path())
        } else {
            TrackedFiles::new()
        };

        let mut tracked = TrackedFiles::new();
        let mut current: BTreeSet<&str> = BTreeSet::new();
        let mut to_extract: Vec<&Candidate> = Vec::new();

        for candidate in &candidates {
            current.insert(candidate.id.as_str());
            let prior = previous.get(&candidate.id);
            if incremental_store && !file_changed(&candidate.path, prior) {
                if let Some(meta) = prior {
                    tracked.insert(candidate.id.clone(), *meta);
                }
                continue;
            }
            to_extract.push(candidate);
        }

        // Stat before reading: an edit racing the read is caught next time.
        let extracted: Vec<(String, Result<(Document, FileMeta)>)> = to_extract
            .par_iter()
            .map(|c| {
                let result = FileMeta::from_path(&c.path).and_then(|meta| {
                    self.extractor
                        .extract(&c.path, &root)
                        .map(|doc| (doc, meta))
                });
                (c.id.clone(), result)
            })
            .collect();

        let mut documents = Vec::with_capacity(extracted.len());
        for (id, result) in extracted {
            match result {
                Ok((doc, meta)) => {
                    tracked.insert(id, meta);
                    documents.push(doc);
                }
                Err(e) => warn!(document = %id, error = %e, "skipping document"),
            }
        }

        // Discarded metadata (legacy, corrupt, missing) says nothing about what
        // the snapshot holds, so deletions come from the store itself.
        let metadata_lost = incremental_store && previous.is_empty();
        let mut loaded = preloaded;
        if metadata_lost && !loaded {
            store.load(&snapshot_path)?;
            loaded = true;
        }

        let deleted: Vec<String> = if metadata_lost {
            store
                .ids()
                .into_iter()
                .filter(|id| !current.contains(id.as_str()))
                .collect()
        } else if incremental_store {
            previous
                .keys()
                .filter(|id| !current.contains(id.as_str()))
                .cloned()
                .collect()
        } else {
            vec![]
        };

        if incremental && documents.is_empty() && deleted.is_empty() {
            debug!("no changes detected, index is up to date");
            return Ok(BuildStats::default());
        }

        let stats = BuildStats {
            changed: documents.len(),
            deleted: deleted.len(),
        };
        info!(changed = stats.changed, deleted = stats.deleted, "applying changes");

        if incremental_store {
            if !loaded {
                store.load(&snapshot_path)?;
            }
            if !documents.is_empty() {
                store.upsert(documents)?;
            }
            for id in &deleted {
                if let Err(e) = store.delete(id) {
                    debug!(document = %id, error = %e, "delete of absent document ignored");
                }
            }
        } else {
            store.index(documents)?;
        }

        storage::ensure_secure_dir(&self.config.data_dir)?;
        storage::ensure_secure_dir(&self.config.index_dir())?;
        store.save(&snapshot_path)?;
        tracking::save(&self.config.metadata_path(), &tracked)?;

        info!(
            changed = stats.changed,
            deleted = stats.deleted,
            documents = store.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index saved"
        );
        Ok(stats)
    }
}

/// Build in the calling process with a freshly created store.
pub fn build_direct(config: &Config, incremental: bool) -> Result<BuildStats> {
    let mut store = index::create_store(config)?;
    Indexer::new(config).build(store.as_mut(), false, incremental)
}

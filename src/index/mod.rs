//! Index store - the nearest-neighbour index over vault documents.
//!
//! The rest of the crate only talks to [`IndexStore`]; the built-in
//! [`VectorIndex`] is one implementation, backed by any [`Embedder`].

pub mod embedder;
pub mod vector;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{Config, EmbeddingBackend};
use crate::error::{Result, VaultError};

pub use embedder::{Embedder, HashingEmbedder};
#[cfg(feature = "fastembed")]
pub use embedder::FastEmbedder;
pub use vector::VectorIndex;

/// A vault document ready for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Root-relative path; the primary key.
    pub id: String,
    pub title: String,
    pub text: String,
    pub path: String,
}

/// One search result, as returned by the store and sent over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub path: String,
    pub title: String,
    pub score: f32,
    pub text: String,
}

impl SearchHit {
    pub fn from_document(doc: &Document, score: f32) -> Self {
        Self {
            id: doc.id.clone(),
            path: doc.path.clone(),
            title: doc.title.clone(),
            score,
            text: doc.text.clone(),
        }
    }
}

/// Persistent nearest-neighbour index keyed by document id.
pub trait IndexStore: Send {
    /// Replace the whole index with `docs`.
    fn index(&mut self, docs: Vec<Document>) -> Result<()>;

    /// Insert or overwrite `docs` by id.
    fn upsert(&mut self, docs: Vec<Document>) -> Result<()>;

    /// Remove one document. Removing an absent id is an error.
    fn delete(&mut self, id: &str) -> Result<()>;

    /// Up to `limit` hits, best first.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Replace the in-memory state with the snapshot at `path`.
    fn load(&mut self, path: &Path) -> Result<()>;

    /// Write the in-memory state to `path`.
    fn save(&self, path: &Path) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, id: &str) -> bool;

    /// Every document id currently held, in ascending order.
    fn ids(&self) -> Vec<String>;
}

/// Create an empty store for the configured embedding backend.
pub fn create_store(config: &Config) -> Result<Box<dyn IndexStore>> {
    let embedder: Box<dyn Embedder> = match config.embedding.backend {
        EmbeddingBackend::Hashing => Box::new(HashingEmbedder::new(config.embedding.dimensions)),
        #[cfg(feature = "fastembed")]
        EmbeddingBackend::Fastembed => Box::new(FastEmbedder::new(
            &config.embedding.model,
            config.models_dir(),
        )?),
        #[cfg(not(feature = "fastembed"))]
        EmbeddingBackend::Fastembed => {
            return Err(VaultError::config(
                "the fastembed backend requires building with `--features fastembed`",
            ))
        }
    };
    Ok(Box::new(VectorIndex::new(embedder)))
}

/// Create a store and fill it from the persisted snapshot.
pub fn open_store(config: &Config) -> Result<Box<dyn IndexStore>> {
    let path = config.snapshot_path();
    if !path.exists() {
        return Err(VaultError::IndexNotFound(path));
    }
    let mut store = create_store(config)?;
    store.load(&path)?;
    Ok(store)
}

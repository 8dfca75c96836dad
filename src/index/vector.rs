//! Built-in vector index: exact cosine search over embedded documents.
//!
//! Snapshots are bincode blobs written atomically (write to `.tmp`, then
//! rename) and tagged with the embedder's model id, so a snapshot built by one
//! embedder is never silently searched with another.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::embedder::Embedder;
use super::{Document, IndexStore, SearchHit};
use crate::error::{Result, VaultError};
use crate::storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    doc: Document,
    vector: Vec<f32>,
}

/// On-disk form, borrowed for writing.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    model_id: &'a str,
    entries: Vec<&'a Entry>,
}

/// On-disk form, owned for reading.
#[derive(Deserialize)]
struct Snapshot {
    model_id: String,
    entries: Vec<Entry>,
}

pub struct VectorIndex {
    embedder: Box<dyn Embedder>,
    entries: BTreeMap<String, Entry>,
}

impl VectorIndex {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: BTreeMap::new(),
        }
    }

    pub fn model_id(&self) -> String {
        self.embedder.model_id()
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.entries.get(id).map(|e| &e.doc)
    }

    fn embed_documents(&self, docs: Vec<Document>) -> Result<Vec<Entry>> {
        let texts: Vec<String> = docs
            .iter()
            .map(|d| format!("{}\n{}", d.title, d.text))
            .collect();
        let vectors = self.embedder.embed(&texts)?;
        if vectors.len() != docs.len() {
            return Err(VaultError::store(format!(
                "embedder returned {} vectors for {} documents",
                vectors.len(),
                docs.len()
            )));
        }
        Ok(docs
            .into_iter()
            .zip(vectors)
            .map(|(doc, vector)| Entry { doc, vector })
            .collect())
    }
}

impl IndexStore for VectorIndex {
    fn index(&mut self, docs: Vec<Document>) -> Result<()> {
        let entries = self.embed_documents(docs)?;
        self.entries = entries
            .into_iter()
            .map(|e| (e.doc.id.clone(), e))
            .collect();
        debug!(documents = self.entries.len(), "index rebuilt");
        Ok(())
    }

    fn upsert(&mut self, docs: Vec<Document>) -> Result<()> {
        for entry in self.embed_documents(docs)? {
            self.entries.insert(entry.doc.id.clone(), entry);
        }
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        self.entries
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| VaultError::store(format!("no document with id {}", id)))
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if limit == 0 || self.entries.is_empty() {
            return Ok(vec![]);
        }

        let query_vector = self.embedder.embed_one(query)?;

        let mut scored: Vec<(&Entry, f32)> = self
            .entries
            .values()
            .map(|e| (e, cosine(&query_vector, &e.vector)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.doc.id.cmp(&b.0.doc.id))
        });

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(e, score)| SearchHit::from_document(&e.doc, score))
            .collect())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "loading index snapshot");

        let bytes = fs::read(path)?;
        let snapshot: Snapshot = bincode::deserialize(&bytes)
            .map_err(|e| VaultError::store(format!("corrupt snapshot: {}", e)))?;

        let expected = self.embedder.model_id();
        if snapshot.model_id != expected {
            return Err(VaultError::store(format!(
                "snapshot was built with {}, current embedder is {}; run `vault-search index`",
                snapshot.model_id, expected
            )));
        }

        self.entries = snapshot
            .entries
            .into_iter()
            .map(|e| (e.doc.id.clone(), e))
            .collect();

        debug!(documents = self.entries.len(), "index snapshot loaded");
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<()> {
        let model_id = self.embedder.model_id();
        let snapshot = SnapshotRef {
            model_id: &model_id,
            entries: self.entries.values().collect(),
        };
        let bytes = bincode::serialize(&snapshot)
            .map_err(|e| VaultError::Serialize(e.to_string()))?;

        storage::write_atomic(path, &bytes)?;
        debug!(bytes = bytes.len(), path = %path.display(), "index snapshot saved");
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::HashingEmbedder;
    use tempfile::tempdir;

    fn doc(id: &str, title: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            title: title.to_string(),
            text: text.to_string(),
            path: id.to_string(),
        }
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new(Box::new(HashingEmbedder::new(1024)));
        index
            .index(vec![
                doc("a.md", "Alpha", "# Alpha\ncats"),
                doc("b.md", "Beta", "# Beta\ndogs"),
                doc("c.md", "Gamma", "# Gamma\nbirds"),
            ])
            .unwrap();
        index
    }

    #[test]
    fn test_search_ranks_matching_document_first() {
        let index = sample_index();
        let hits = index.search("cats", 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "a.md");
        assert_eq!(hits[0].title, "Alpha");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_upsert_overwrites_by_id() {
        let mut index = sample_index();
        index
            .upsert(vec![doc("b.md", "Beta", "# Beta\nparrots")])
            .unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.get("b.md").unwrap().text, "# Beta\nparrots");
        assert_eq!(index.search("parrots", 1).unwrap()[0].id, "b.md");
    }

    #[test]
    fn test_delete_absent_is_error() {
        let mut index = sample_index();
        index.delete("a.md").unwrap();
        assert!(!index.contains("a.md"));
        assert_eq!(index.ids(), vec!["b.md", "c.md"]);
        assert!(index.delete("a.md").is_err());
    }

    #[test]
    fn test_index_replaces_everything() {
        let mut index = sample_index();
        index.index(vec![doc("z.md", "Zeta", "zebras")]).unwrap();
        assert_eq!(index.len(), 1);
        assert!(!index.contains("a.md"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let index = sample_index();
        let dir = tempdir().unwrap();
        let path = dir.path().join("embeddings");

        index.save(&path).unwrap();
        let mut loaded = VectorIndex::new(Box::new(HashingEmbedder::new(1024)));
        loaded.load(&path).unwrap();

        for query in ["cats", "dogs", "gamma birds"] {
            assert_eq!(index.search(query, 3).unwrap(), loaded.search(query, 3).unwrap());
        }
    }

    #[test]
    fn test_load_rejects_other_embedder() {
        let index = sample_index();
        let dir = tempdir().unwrap();
        let path = dir.path().join("embeddings");
        index.save(&path).unwrap();

        let mut other = VectorIndex::new(Box::new(HashingEmbedder::new(64)));
        let err = other.load(&path).unwrap_err();
        assert!(matches!(err, VaultError::IndexStore(_)));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let mut index = VectorIndex::new(Box::new(HashingEmbedder::new(8)));
        assert!(index.load(Path::new("/nonexistent/embeddings")).is_err());
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::new(Box::new(HashingEmbedder::new(8)));
        assert!(index.search("anything", 5).unwrap().is_empty());
    }
}

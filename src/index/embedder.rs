//! Text embedders used by the vector index.

use crate::error::{Result, VaultError};

/// Turns text into fixed-width vectors.
pub trait Embedder: Send {
    /// Stable identifier written into snapshots; a snapshot is only valid
    /// for the embedder that produced it.
    fn model_id(&self) -> String;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| VaultError::store("embedder returned no vector"))
    }
}

/// Feature-hashed bag of words.
///
/// Each lowercase alphanumeric token lands in one of `dimensions` buckets
/// (CRC32 of the token) with a sign taken from a second hash bit, weighted by
/// `1 + ln(tf)`. Vectors are L2-normalised so a dot product is a cosine.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut counts: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_insert(0) += 1;
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for (token, tf) in counts {
            let hash = crc32fast::hash(token.as_bytes());
            let bucket = (hash as usize) % self.dimensions;
            let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * (1.0 + (tf as f32).ln());
        }

        normalize(&mut vector);
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> String {
        format!("hashing-{}", self.dimensions)
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Lowercase alphanumeric runs.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(feature = "fastembed")]
pub use self::fast::FastEmbedder;

#[cfg(feature = "fastembed")]
mod fast {
    use fastembed::{InitOptions, TextEmbedding};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tracing::info;

    use super::Embedder;
    use crate::error::{Result, VaultError};

    /// ONNX sentence embedder via fastembed.
    /// The model sits behind a Mutex because `embed()` takes `&mut self`.
    pub struct FastEmbedder {
        model: Mutex<TextEmbedding>,
        model_name: String,
    }

    impl FastEmbedder {
        /// Load (downloading on first use) `model_name` into `cache_dir`.
        pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self> {
            let model_enum = parse_model_name(model_name)?;
            std::fs::create_dir_all(&cache_dir)?;

            info!(model = model_name, "loading embedding model");
            let options = InitOptions::new(model_enum)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(false);
            let model = TextEmbedding::try_new(options)
                .map_err(|e| VaultError::store(format!("model init failed: {}", e)))?;

            Ok(Self {
                model: Mutex::new(model),
                model_name: model_name.to_string(),
            })
        }
    }

    impl Embedder for FastEmbedder {
        fn model_id(&self) -> String {
            format!("fastembed-{}", self.model_name.to_lowercase())
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(vec![]);
            }
            let mut model = self
                .model
                .lock()
                .map_err(|e| VaultError::store(format!("model lock poisoned: {}", e)))?;
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| VaultError::store(format!("embedding failed: {}", e)))
        }
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-small-en-v1.5-q" => Ok(fastembed::EmbeddingModel::BGESmallENV15Q),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" => Ok(fastembed::EmbeddingModel::BGEBaseENV15Q),
            _ => Err(VaultError::config(format!(
                "unknown embedding model: {} (supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, add -q for quantized)",
                name
            ))),
        }
    }
}

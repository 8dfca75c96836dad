//! Rerankers - second-stage relevance scoring of retrieval candidates.

use std::collections::HashMap;

use crate::config::Config;
use crate::error::Result;

/// Scores each candidate text against a query; higher is more relevant.
pub trait Reranker: Send {
    fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>>;
}

const K1: f32 = 1.2;
const B: f32 = 0.75;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "in", "on", "at", "to",
    "for", "of", "with", "by", "from", "as", "and", "or", "but", "not", "no", "so", "if", "then",
];

/// BM25 over the candidate set itself: document frequencies come from the
/// candidates being reranked, not from the whole vault.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReranker;

impl Reranker for LexicalReranker {
    fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || texts.is_empty() {
            return Ok(vec![0.0; texts.len()]);
        }

        let docs: Vec<HashMap<String, usize>> = texts.iter().map(|t| term_counts(t)).collect();
        let lengths: Vec<usize> = docs.iter().map(|d| d.values().sum()).collect();
        let avg_len = (lengths.iter().sum::<usize>() as f32 / docs.len() as f32).max(1.0);
        let n = docs.len() as f32;

        let scores = docs
            .iter()
            .zip(&lengths)
            .map(|(counts, &len)| {
                query_terms
                    .iter()
                    .map(|term| {
                        let tf = *counts.get(term).unwrap_or(&0) as f32;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let df = docs.iter().filter(|d| d.contains_key(term)).count() as f32;
                        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                        let norm = K1 * (1.0 - B + B * len as f32 / avg_len);
                        idf * tf * (K1 + 1.0) / (tf + norm)
                    })
                    .sum()
            })
            .collect();

        Ok(scores)
    }
}

/// The reranker the daemon and the direct search path load.
pub fn create_reranker(_config: &Config) -> Result<Box<dyn Reranker>> {
    Ok(Box::new(LexicalReranker))
}

/// Lowercase terms without stop words or single characters.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.chars().count() > 1 && !STOP_WORDS.contains(&s.as_str()))
        .collect()
}

fn term_counts(text: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for term in tokenize(text) {
        *counts.entry(term).or_insert(0) += 1;
    }
    counts
}

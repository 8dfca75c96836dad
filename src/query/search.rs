//! Query engine: retrieve, optionally rerank, truncate.

use std::cmp::Ordering;
use tracing::debug;

use super::rerank::Reranker;
use crate::config::Config;
use crate::error::{Result, VaultError};
use crate::index::{IndexStore, SearchHit};

/// Run a query against `store`.
///
/// With reranking, `rerank_overfetch × limit` candidates are retrieved and
/// reordered by the reranker (ties keep retrieval order); otherwise the
/// store's order is returned as is.
pub fn search(
    config: &Config,
    store: &dyn IndexStore,
    reranker: Option<&dyn Reranker>,
    query: &str,
    limit: usize,
    rerank: bool,
) -> Result<Vec<SearchHit>> {
    let reranker = reranker.filter(|_| rerank);
    let fetch = match reranker {
        Some(_) => limit.saturating_mul(config.rerank_overfetch.max(1)),
        None => limit,
    };

    let mut hits = store.search(query, fetch)?;

    match reranker {
        Some(reranker) if hits.len() > 1 => {
            let texts: Vec<&str> = hits
                .iter()
                .map(|h| prefix(&h.text, config.rerank_prefix_chars))
                .collect();
            let scores = reranker.score(query, &texts)?;
            if scores.len() != hits.len() {
                return Err(VaultError::store(format!(
                    "reranker returned {} scores for {} candidates",
                    scores.len(),
                    hits.len()
                )));
            }

            let mut ranked: Vec<(SearchHit, f32)> = hits.into_iter().zip(scores).collect();
            // sort_by is stable, so equal scores keep retrieval order.
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
            hits = ranked
                .into_iter()
                .map(|(mut hit, score)| {
                    hit.score = score;
                    hit
                })
                .collect();
            debug!(candidates = hits.len(), limit, "reranked");
        }
        _ => {}
    }

    hits.truncate(limit);
    Ok(hits)
}

/// The first `max_chars` characters of `text`.
fn prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

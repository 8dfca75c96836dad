//! Query module - search over the vault index.
//!
//! Retrieval comes from an [`IndexStore`](crate::index::IndexStore); an
//! optional [`Reranker`] reorders an over-fetched candidate list before it is
//! cut down to the requested size.

pub mod rerank;
pub mod search;

pub use rerank::{create_reranker, LexicalReranker, Reranker};
pub use search::search;

//! Top-K similarity ranking over the catalog.
//!
//! Linear scan: every entry is scored against the query, then the scores are
//! stably sorted so exact ties keep catalog order.

use serde::Serialize;

use crate::catalog::{Catalog, CatalogEntry};
use crate::vector::cosine_similarity;

/// Default number of matches returned per dish.
pub const DEFAULT_TOP_K: usize = 3;

/// A catalog entry paired with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatch {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    /// Cosine similarity in `[-1, 1]`; `0.0` for degenerate or incomparable vectors.
    pub score: f64,
}

/// Return the `k` entries most similar to `query`, best first.
///
/// The result has exactly `min(k, catalog.len())` matches. An entry whose
/// embedding length differs from the query is scored `0.0` and logged rather
/// than failing the whole ranking.
pub fn top_k(query: &[f32], catalog: &Catalog, k: usize) -> Vec<SimilarityMatch> {
    if k == 0 || catalog.is_empty() {
        return Vec::new();
    }

    tracing::debug!(
        query_dim = query.len(),
        entries = catalog.len(),
        k,
        "ranking catalog"
    );

    let mut scored: Vec<(f64, &CatalogEntry)> = catalog
        .entries()
        .iter()
        .map(|entry| {
            let score = cosine_similarity(query, &entry.embedding).unwrap_or_else(|e| {
                tracing::warn!(entry = %entry.id, error = %e, "scoring entry as 0");
                0.0
            });
            (score, entry)
        })
        .collect();

    // sort_by is stable: equal scores keep catalog order
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(score, entry)| SimilarityMatch {
            entry: entry.clone(),
            score,
        })
        .collect()
}

//! Brute-force cosine ranking over an in-memory candidate set.
//!
//! Pure functions: no storage access, so the ranking can run anywhere (a blocking
//! worker, a test) and always yields the same order for the same input.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};
use crate::store::RecordKey;

/// A record's vector offered to a ranking call.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub key: RecordKey,
    pub vector: Vec<f32>,
}

impl Candidate {
    pub fn new(key: impl Into<RecordKey>, vector: Vec<f32>) -> Self {
        Self {
            key: key.into(),
            vector,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub key: RecordKey,
    pub score: f64,
}

/// A candidate skipped because its length differs from the query's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionMismatch {
    pub key: RecordKey,
    pub expected: usize,
    pub actual: usize,
}

/// Ranked hits plus the non-fatal warnings raised while ranking.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ranking {
    pub hits: Vec<ScoredRecord>,
    pub warnings: Vec<DimensionMismatch>,
}

/// Cosine similarity in `[-1, 1]`, computed in f64.
///
/// Zero or non-finite magnitude on either side scores 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() || !dot.is_finite() {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}

/// Rank `candidates` against `query`, best first, ties by ascending key, at most `top_k`.
pub fn rank(query: &[f32], candidates: &[Candidate], top_k: usize) -> Ranking {
    // without a cancel flag the only error path is unreachable
    rank_inner(query, candidates, top_k, None).unwrap_or_default()
}

/// Like [`rank`], checking `cancel` between candidates. A cancelled call returns
/// [`StoreError::Cancelled`] and no partial hits.
pub fn rank_cancellable(
    query: &[f32],
    candidates: &[Candidate],
    top_k: usize,
    cancel: &CancellationToken,
) -> Result<Ranking> {
    rank_inner(query, candidates, top_k, Some(cancel))
}

fn rank_inner(
    query: &[f32],
    candidates: &[Candidate],
    top_k: usize,
    cancel: Option<&CancellationToken>,
) -> Result<Ranking> {
    if top_k == 0 || candidates.is_empty() {
        return Ok(Ranking::default());
    }

    let mut ranking = Ranking::default();
    ranking.hits.reserve(candidates.len());
    for candidate in candidates {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(StoreError::Cancelled);
        }
        if candidate.vector.len() != query.len() {
            tracing::warn!(
                key = %candidate.key,
                expected = query.len(),
                actual = candidate.vector.len(),
                "dimension mismatch, skipping candidate"
            );
            ranking.warnings.push(DimensionMismatch {
                key: candidate.key.clone(),
                expected: query.len(),
                actual: candidate.vector.len(),
            });
            continue;
        }
        ranking.hits.push(ScoredRecord {
            key: candidate.key.clone(),
            score: cosine(query, &candidate.vector),
        });
    }

    ranking
        .hits
        .sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
    ranking.hits.truncate(top_k);
    Ok(ranking)
}

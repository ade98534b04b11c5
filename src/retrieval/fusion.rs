//! Merge, deduplicate and re-rank related-record candidates.

use std::collections::HashSet;

use crate::search::RelatedRecord;

/// Union of branch results in branch order, keeping the first record seen per identity.
pub fn fuse<I>(branches: I) -> Vec<RelatedRecord>
where
    I: IntoIterator<Item = Vec<RelatedRecord>>,
{
    let mut seen = HashSet::new();
    branches
        .into_iter()
        .flatten()
        .filter(|record| seen.insert(record.dedup_key()))
        .collect()
}

/// Cosine similarity of two vectors; zero when either has no magnitude.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

/// Pair each candidate with its similarity to `query`, most similar first.
///
/// The sort is stable: equal scores keep their input order.
pub fn rank_by_similarity(
    candidates: Vec<RelatedRecord>,
    query: &[f32],
    vectors: &[Vec<f32>],
) -> Vec<(RelatedRecord, f32)> {
    let mut scored: Vec<(RelatedRecord, f32)> = candidates
        .into_iter()
        .zip(vectors)
        .map(|(record, vector)| {
            let score = cosine_similarity(query, vector);
            (record, score)
        })
        .collect();
    scored.sort_by(|(_, left), (_, right)| right.total_cmp(left));
    scored
}

//! Vector similarity utilities.

use cortex_core::memory::{ConversationRecord, ScoredRecord};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the vectors differ in length, are empty, or either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank records by cosine similarity to a query embedding.
///
/// Records without an embedding are skipped. Returns at most `k` records,
/// most similar first; ties keep the newer record first.
pub fn rank_by_similarity<'a>(
    records: impl IntoIterator<Item = &'a ConversationRecord>,
    query_embedding: &[f32],
    k: usize,
) -> Vec<ScoredRecord> {
    let mut scored: Vec<ScoredRecord> = records
        .into_iter()
        .filter(|r| !r.embedding.is_empty())
        .map(|r| ScoredRecord {
            similarity: cosine_similarity(&r.embedding, query_embedding),
            record: r.clone(),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.timestamp.cmp(&a.record.timestamp))
    });
    scored.truncate(k);
    scored
}

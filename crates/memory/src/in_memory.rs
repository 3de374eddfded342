//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use cortex_core::error::MemoryError;
use cortex_core::memory::{ConversationRecord, ConversationStore, ScoredRecord};
use std::sync::Arc;
use tokio::sync::RwLock;
use crate::vector::rank_by_similarity;

/// A conversation store that keeps records in a Vec.
/// Nothing survives the process.
pub struct InMemoryStore {
    records: Arc<RwLock<Vec<ConversationRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str { "in_memory" }

    async fn append(&self, record: ConversationRecord) -> Result<(), MemoryError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredRecord>, MemoryError> {
        let records = self.records.read().await;
        Ok(rank_by_similarity(records.iter(), embedding, k))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ConversationRecord>, MemoryError> {
        let records = self.records.read().await;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(query: &str, embedding: Vec<f32>) -> ConversationRecord {
        let mut r = ConversationRecord::new("s1".into(), query, "answer");
        r.embedding = embedding;
        r
    }

    #[tokio::test]
    async fn append_and_count() {
        let store = InMemoryStore::new();
        store.append(record("one", vec![1.0, 0.0])).await.unwrap();
        store.append(record("two", vec![0.0, 1.0])).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn nearest_orders_by_similarity() {
        let store = InMemoryStore::new();
        store.append(record("far", vec![0.0, 1.0])).await.unwrap();
        store.append(record("near", vec![1.0, 0.1])).await.unwrap();

        let results = store.nearest(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record.query, "near");
    }

    #[tokio::test]
    async fn recent_is_newest_first() {
        let store = InMemoryStore::new();
        for q in ["a", "b", "c"] {
            store.append(record(q, vec![1.0])).await.unwrap();
        }
        let recent = store.recent(2).await.unwrap();
        let queries: Vec<_> = recent.iter().map(|r| r.query.as_str()).collect();
        assert_eq!(queries, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_visible() {
        let store = Arc::new(InMemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(record(&format!("q{i}"), vec![1.0, i as f32])).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 16);
    }
}

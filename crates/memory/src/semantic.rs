//! Semantic memory — embeds records on write and retrieves them by meaning.
//!
//! Failures never propagate: a failed `index` is logged and dropped, a failed
//! `query_similar` returns no history. The agent keeps working without memory.

use chrono::Utc;
use cortex_core::event::{DomainEvent, EventBus};
use cortex_core::memory::{ConversationRecord, ConversationStore, ScoredRecord};
use cortex_core::provider::Embedder;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SemanticMemory {
    store: Arc<dyn ConversationStore>,
    embedder: Arc<dyn Embedder>,
    events: Option<Arc<EventBus>>,
}

impl SemanticMemory {
    pub fn new(store: Arc<dyn ConversationStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    fn publish(&self, operation: &str, count: usize) {
        if let Some(events) = &self.events {
            events.publish(DomainEvent::MemoryAccessed {
                operation: operation.into(),
                count,
                timestamp: Utc::now(),
            });
        }
    }

    /// Persist a record, computing its embedding first if it has none.
    ///
    /// Returns whether the record was stored. A record whose embedding fails
    /// is still stored; it just never comes back from similarity queries.
    pub async fn index(&self, mut record: ConversationRecord) -> bool {
        if record.embedding.is_empty() {
            match self.embedder.embed(&record.searchable_text()).await {
                Ok(embedding) => record.embedding = embedding,
                Err(e) => warn!(record_id = %record.id, error = %e, "Embedding failed, storing record without vector"),
            }
        }

        let id = record.id.clone();
        match self.store.append(record).await {
            Ok(()) => {
                debug!(record_id = %id, backend = self.store.name(), "Conversation indexed");
                self.publish("index", 1);
                true
            }
            Err(e) => {
                warn!(record_id = %id, error = %e, "Failed to index conversation");
                false
            }
        }
    }

    /// The `k` stored records most similar to `text`, most similar first.
    pub async fn query_similar(&self, text: &str, k: usize) -> Vec<ScoredRecord> {
        if k == 0 {
            return Vec::new();
        }

        let embedding = match self.embedder.embed(text).await {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Query embedding failed, continuing without history");
                return Vec::new();
            }
        };

        match self.store.nearest(&embedding, k).await {
            Ok(results) => {
                self.publish("query", results.len());
                results
            }
            Err(e) => {
                warn!(error = %e, "Similarity query failed, continuing without history");
                Vec::new()
            }
        }
    }
}

//! Conversation memory for Cortex: durable stores plus semantic retrieval.

pub mod file_store;
pub mod in_memory;
pub mod semantic;
pub mod vector;

pub use file_store::FileStore;
pub use in_memory::InMemoryStore;
pub use semantic::SemanticMemory;
pub use vector::{cosine_similarity, rank_by_similarity};

use cortex_config::MemoryConfig;
use cortex_core::error::MemoryError;
use cortex_core::memory::ConversationStore;
use std::sync::Arc;

/// Open the store selected by the `[memory]` config section.
pub fn open_store(config: &MemoryConfig) -> Result<Arc<dyn ConversationStore>, MemoryError> {
    match config.backend.as_str() {
        "in_memory" => Ok(Arc::new(InMemoryStore::new())),
        "file" => Ok(Arc::new(FileStore::open(config.resolved_dir())?)),
        other => Err(MemoryError::Unavailable(format!("unknown memory backend '{other}'"))),
    }
}

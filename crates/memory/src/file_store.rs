//! File-based conversation store — persistent JSON-lines storage.
//!
//! Layout under the storage directory:
//!
//! ```text
//! <dir>/YYYY/MM/DD/<session_id>.jsonl   one ConversationRecord per line
//! <dir>/embeddings.jsonl                {"id": <record id>, "embedding": [...]}
//! ```
//!
//! Records are loaded into memory on open and appended to disk on every
//! write. Appends take the write lock for the whole disk write, so readers
//! see a record only once both lines are on disk. The embedding line is
//! written first; an orphaned embedding is ignored on reload.

use async_trait::async_trait;
use cortex_core::error::MemoryError;
use cortex_core::memory::{ConversationRecord, ConversationStore, ScoredRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use walkdir::WalkDir;
use crate::vector::rank_by_similarity;

const EMBEDDINGS_FILE: &str = "embeddings.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingLine {
    id: String,
    embedding: Vec<f32>,
}

/// A file-backed conversation store.
pub struct FileStore {
    dir: PathBuf,
    records: Arc<RwLock<Vec<ConversationRecord>>>,
}

impl FileStore {
    /// Open (or create) a store rooted at `dir`, loading every record found.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            MemoryError::Unavailable(format!("cannot create {}: {e}", dir.display()))
        })?;

        let records = Self::load_from_disk(&dir);
        debug!(dir = %dir.display(), count = records.len(), "File conversation store loaded");

        Ok(Self {
            dir,
            records: Arc::new(RwLock::new(records)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The shard file a record is written to.
    fn record_path(&self, record: &ConversationRecord) -> PathBuf {
        let ts = record.timestamp;
        self.dir
            .join(ts.format("%Y").to_string())
            .join(ts.format("%m").to_string())
            .join(ts.format("%d").to_string())
            .join(format!("{}.jsonl", sanitize(&record.session_id.0)))
    }

    fn load_from_disk(dir: &Path) -> Vec<ConversationRecord> {
        let embeddings = Self::load_embeddings(&dir.join(EMBEDDINGS_FILE));

        let mut records: Vec<ConversationRecord> = WalkDir::new(dir)
            .min_depth(4)
            .max_depth(4)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == "jsonl")
            })
            .flat_map(|entry| read_jsonl::<ConversationRecord>(entry.path()))
            .collect();

        for record in &mut records {
            if let Some(embedding) = embeddings.get(&record.id) {
                record.embedding = embedding.clone();
            }
        }

        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        records
    }

    fn load_embeddings(path: &Path) -> HashMap<String, Vec<f32>> {
        read_jsonl::<EmbeddingLine>(path)
            .into_iter()
            .map(|line| (line.id, line.embedding))
            .collect()
    }
}

/// Parse a JSONL file, skipping blank and corrupted lines. A missing file
/// yields nothing.
fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Vec<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<T>(line) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping corrupted line");
                None
            }
        })
        .collect()
}

fn append_line(path: &Path, line: &str) -> Result<(), MemoryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            MemoryError::Storage(format!("Failed to create memory directory: {e}"))
        })?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| MemoryError::Storage(format!("Failed to open {}: {e}", path.display())))?;
    writeln!(file, "{line}")
        .map_err(|e| MemoryError::Storage(format!("Failed to write {}: {e}", path.display())))
}

/// Keep session ids usable as file names.
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "session".into() } else { cleaned }
}

#[async_trait]
impl ConversationStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&self, record: ConversationRecord) -> Result<(), MemoryError> {
        let mut stored = record.clone();
        stored.embedding = Vec::new();
        let record_line = serde_json::to_string(&stored)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize record: {e}")))?;

        let mut records = self.records.write().await;

        // The record line goes last: it is what makes a record exist on
        // reload, so a failure before it leaves nothing behind.
        if !record.embedding.is_empty() {
            let embedding_line = serde_json::to_string(&EmbeddingLine {
                id: record.id.clone(),
                embedding: record.embedding.clone(),
            })
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize embedding: {e}")))?;
            append_line(&self.dir.join(EMBEDDINGS_FILE), &embedding_line)?;
        }
        append_line(&self.record_path(&record), &record_line)?;

        records.push(record);
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

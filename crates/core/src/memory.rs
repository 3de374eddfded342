//! Conversation memory — records of completed queries and the storage trait.
//!
//! Every top-level query produces exactly one [`ConversationRecord`] once it
//! terminates. Records are append-only; the historical router retrieves them
//! by embedding similarity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::error::MemoryError;
use crate::routing::RouteKind;
use crate::tool::ToolCall;

/// Identifier of an interactive session (a sequence of queries).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// A new session id: `<unix seconds>-<8 hex chars>`, sortable by start time.
    pub fn new() -> Self {
        let short = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", Utc::now().timestamp(), &short[..8]))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The persisted summary of one completed top-level query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique record id
    pub id: String,

    /// When the query finished
    pub timestamp: DateTime<Utc>,

    pub session_id: SessionId,

    /// The user's original query
    pub query: String,

    /// The answer delivered to the user
    pub final_answer: String,

    /// Every tool call made during the run, in order
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Embedding of [`searchable_text`](Self::searchable_text); filled in by
    /// the semantic memory layer when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,

    /// True when the answer came from budget exhaustion or cancellation
    #[serde(default)]
    pub partial: bool,

    /// Which routing path produced this answer
    #[serde(default)]
    pub route: RouteKind,
}

impl ConversationRecord {
    pub fn new(session_id: SessionId, query: impl Into<String>, final_answer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            session_id,
            query: query.into(),
            final_answer: final_answer.into(),
            tool_calls: Vec::new(),
            embedding: Vec::new(),
            partial: false,
            route: RouteKind::default(),
        }
    }

    /// Names of the tools called, in call order (duplicates kept).
    pub fn tool_names(&self) -> Vec<&str> {
        self.tool_calls.iter().map(|c| c.tool_name.as_str()).collect()
    }

    /// The text that gets embedded for similarity search.
    pub fn searchable_text(&self) -> String {
        let mut text = format!("{}\n{}", self.query, self.final_answer);
        if !self.tool_calls.is_empty() {
            text.push_str("\nTools used: ");
            text.push_str(&self.tool_names().join(", "));
        }
        text
    }
}

/// A record returned by a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: ConversationRecord,

    /// Cosine similarity to the query, in [-1, 1]
    pub similarity: f32,
}

/// Durable, append-only storage of conversation records with
/// nearest-neighbour retrieval.
///
/// Implementations must tolerate concurrent `append` and reads: a reader
/// observes either the state before or after any append, never a partially
/// written record.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "file", "in_memory").
    fn name(&self) -> &str;

    /// Append a record. The record must already carry its embedding.
    async fn append(&self, record: ConversationRecord) -> std::result::Result<(), MemoryError>;

    /// The `k` records most similar to `embedding`, most similar first.
    async fn nearest(&self, embedding: &[f32], k: usize) -> std::result::Result<Vec<ScoredRecord>, MemoryError>;

    /// The most recently written records, newest first.
    async fn recent(&self, limit: usize) -> std::result::Result<Vec<ConversationRecord>, MemoryError>;

    /// Total record count.
    async fn count(&self) -> std::result::Result<usize, MemoryError>;
}

//! Domain event system — lets observers follow a run without coupling to it.
//!
//! The agent loop publishes an event at each control decision (route chosen,
//! step finished, tool invoked, run terminated). The CLI subscribes to print
//! progress; tests subscribe to assert on the sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use crate::routing::RouteKind;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The historical router picked a path for a query
    RouteSelected {
        session_id: String,
        route: RouteKind,
        candidates: usize,
        timestamp: DateTime<Utc>,
    },

    /// One plan was executed
    StepCompleted {
        step: usize,
        outcome: String,
        tool_calls_so_far: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool was invoked from generated code
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The memory store was written or queried
    MemoryAccessed {
        operation: String, // "index", "query"
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A query's handling ended
    RunFinished {
        session_id: String,
        termination: String,
        partial: bool,
        steps: usize,
        tool_calls: usize,
        timestamp: DateTime<Utc>,
    },

    /// A recoverable error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

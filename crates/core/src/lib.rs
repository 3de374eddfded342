//! # Cortex Core
//!
//! Domain types, traits, and error definitions for the Cortex task-solving
//! agent. This crate has **no framework dependencies**: it defines the
//! domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Each external collaborator of the control loop (LLM backend, embedding
//! backend, tool servers, conversation storage) is a trait here. Concrete
//! implementations live in their own crates, which keeps the loop testable
//! with scripted doubles.

pub mod error;
pub mod event;
pub mod memory;
pub mod outcome;
pub mod provider;
pub mod routing;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{MemoryError, ProviderError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use memory::{ConversationRecord, ConversationStore, ScoredRecord, SessionId};
pub use outcome::{StepOutcome, ToolFailure, ToolFailureKind};
pub use provider::{Embedder, Provider, TextRequest, TextResponse};
pub use routing::{RouteKind, RoutingDecision};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolRegistry, ToolServerInfo};

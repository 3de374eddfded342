//! Current conversations tool — replays the latest session for generated code.
//!
//! Without arguments it returns the session of the most recently stored
//! conversation, oldest interaction first. A `session_id` picks a session
//! explicitly.

use async_trait::async_trait;
use cortex_core::error::ToolError;
use cortex_core::memory::{ConversationRecord, SessionId};
use cortex_core::tool::{Tool, text_payload};
use cortex_memory::SemanticMemory;
use std::sync::Arc;

pub const TOOL_NAME: &str = "get_current_conversations";

/// How many recent records are scanned for the session
const SCAN_LIMIT: usize = 500;

pub struct CurrentConversationsTool {
    memory: Arc<SemanticMemory>,
}

impl CurrentConversationsTool {
    pub fn new(memory: Arc<SemanticMemory>) -> Self {
        Self { memory }
    }
}

fn format_session(session: &SessionId, records: &[&ConversationRecord]) -> String {
    let mut out = format!("Session {session} ({} interaction(s)):\n", records.len());
    for (i, r) in records.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. [{}{}]\nQ: {}\nA: {}\n",
            i + 1,
            r.timestamp.format("%Y-%m-%d %H:%M"),
            if r.partial { ", partial" } else { "" },
            r.query,
            r.final_answer,
        ));
        if !r.tool_calls.is_empty() {
            out.push_str(&format!("Tools used: {}\n", r.tool_names().join(", ")));
        }
    }
    out
}

#[async_trait]
impl Tool for CurrentConversationsTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "List the interactions of the current session (the most recent one, or \
         the session given by `session_id`), oldest first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session to list; defaults to the most recent session"
                }
            }
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let recent = self
            .memory
            .store()
            .recent(SCAN_LIMIT)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: e.to_string(),
            })?;

        let session = match input["session_id"].as_str().filter(|s| !s.trim().is_empty()) {
            Some(id) => SessionId::from(id),
            None => match recent.first() {
                Some(latest) => latest.session_id.clone(),
                None => return Ok(text_payload("No conversations stored yet.")),
            },
        };

        // `recent` is newest first
        let records: Vec<&ConversationRecord> = recent.iter().rev().filter(|r| r.session_id == session).collect();
        if records.is_empty() {
            return Ok(text_payload(format!("No conversations found for session '{session}'.")));
        }
        Ok(text_payload(format_session(&session, &records)))
    }
}

//! Historical search tool — lets generated code search past conversations.
//!
//! Bridges the tool registry with semantic memory so a plan can look up how
//! a similar question was answered before.

use async_trait::async_trait;
use cortex_core::error::ToolError;
use cortex_core::memory::ScoredRecord;
use cortex_core::tool::{Tool, text_payload};
use cortex_memory::SemanticMemory;
use std::sync::Arc;

pub const TOOL_NAME: &str = "search_historical_conversations";

/// Server id the tool is registered under.
pub const SERVER_ID: &str = "memory";

pub struct HistoricalSearchTool {
    memory: Arc<SemanticMemory>,
}

impl HistoricalSearchTool {
    pub fn new(memory: Arc<SemanticMemory>) -> Self {
        Self { memory }
    }
}

fn format_results(query: &str, results: &[ScoredRecord]) -> String {
    if results.is_empty() {
        return format!("No past conversations found matching '{query}'.");
    }

    let mut out = format!("Found {} related past conversation(s):\n", results.len());
    for (i, scored) in results.iter().enumerate() {
        let r = &scored.record;
        out.push_str(&format!(
            "\n{}. [similarity {:.2}{}] {}\nQ: {}\nA: {}\n",
            i + 1,
            scored.similarity,
            if r.partial { ", partial" } else { "" },
            r.timestamp.format("%Y-%m-%d %H:%M"),
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
impl Tool for HistoricalSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search previously answered questions by meaning. Returns the closest past \
         questions with their answers and the tools that were used."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for in past conversations"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of conversations to return (default 5)",
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let query = input["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let limit = input["limit"].as_u64().unwrap_or(5).clamp(1, 20) as usize;

        let results = self.memory.query_similar(query, limit).await;
        Ok(text_payload(format_results(query, &results)))
    }
}

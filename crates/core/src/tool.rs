//! Tool trait — the abstraction over callable capabilities.
//!
//! Generated `solve` code reaches the outside world only through tools.
//! Tools are grouped into *servers* (a named, described group such as
//! `documents` or `math`); perception selects servers, and the planner and
//! executor only see the tools of the selected servers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use crate::error::ToolError;

/// A tool definition handed to the planner so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub parameters: serde_json::Value,

    /// The server this tool belongs to
    pub server: String,
}

/// A named group of tools, described for perception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerInfo {
    pub id: String,
    pub description: String,
}

/// One intercepted tool invocation, as recorded in a run's trace.
///
/// Created by the executor's interceptor; never mutated after it is
/// appended to the run's ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Position of this call within the run (0-based)
    pub sequence: usize,

    /// Name of the tool that was invoked
    pub tool_name: String,

    /// The structured input payload
    pub input: serde_json::Value,

    /// The structured output payload, absent on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Whether the tool returned successfully
    pub success: bool,

    /// Failure description, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub duration_ms: u64,
}

/// The core Tool trait.
///
/// `invoke` receives the structured input produced by generated code and
/// returns a payload mapping with a `content` list of text blocks (see
/// [`text_payload`]).
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search_documents").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the planner).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    async fn invoke(&self, input: serde_json::Value) -> std::result::Result<serde_json::Value, ToolError>;
}

/// Build the canonical tool output payload: `{"content": [{"type": "text", "text": ...}]}`.
pub fn text_payload(text: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "content": [{ "type": "text", "text": text.into() }]
    })
}

/// Concatenate the text blocks of a payload, if it has the canonical shape.
pub fn payload_text(payload: &serde_json::Value) -> Option<String> {
    let blocks = payload.get("content")?.as_array()?;
    let texts: Vec<&str> = blocks
        .iter()
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}

/// A registry of available tools, keyed by name and grouped by server.
///
/// The agent uses this to:
/// 1. Describe servers to perception
/// 2. Give the planner the definitions of the selected servers' tools
/// 3. Dispatch intercepted calls by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    tool_servers: HashMap<String, String>,
    servers: BTreeMap<String, ToolServerInfo>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a server. Re-declaring replaces its description.
    pub fn add_server(&mut self, id: impl Into<String>, description: impl Into<String>) {
        let id = id.into();
        self.servers.insert(
            id.clone(),
            ToolServerInfo {
                id,
                description: description.into(),
            },
        );
    }

    /// Register a tool under a server. Replaces any existing tool with the
    /// same name. Unknown servers are declared with an empty description.
    pub fn register(&mut self, server: &str, tool: Arc<dyn Tool>) {
        if !self.servers.contains_key(server) {
            self.add_server(server, "");
        }
        let name = tool.name().to_string();
        self.tool_servers.insert(name.clone(), server.to_string());
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All declared servers, ordered by id.
    pub fn servers(&self) -> Vec<&ToolServerInfo> {
        self.servers.values().collect()
    }

    pub fn server_ids(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    fn definition(&self, name: &str, tool: &Arc<dyn Tool>) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
            server: self.tool_servers.get(name).cloned().unwrap_or_default(),
        }
    }

    /// Definitions of every registered tool, ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self
            .tools
            .iter()
            .map(|(name, tool)| self.definition(name, tool))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Definitions of the tools belonging to the given servers, ordered by name.
    /// Unknown server ids are ignored.
    pub fn definitions_for(&self, servers: &[String]) -> Vec<ToolDefinition> {
        self.definitions()
            .into_iter()
            .filter(|d| servers.iter().any(|s| s == &d.server))
            .collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

//! Perception: turns the current input into an intent descriptor and a
//! selection of tool servers.
//!
//! Perception never fails: any provider error, timeout, or unparsable reply
//! yields the fallback descriptor (intent `unknown`, every server selected).

use crate::prompts;
use cortex_core::provider::{Provider, TextRequest};
use cortex_core::tool::ToolServerInfo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionResult {
    pub intent: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub tool_hint: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub selected_servers: Vec<String>,
}

impl PerceptionResult {
    pub fn fallback(servers: &[&ToolServerInfo]) -> Self {
        Self {
            intent: "unknown".into(),
            entities: Vec::new(),
            tool_hint: None,
            tags: Vec::new(),
            selected_servers: servers.iter().map(|s| s.id.clone()).collect(),
        }
    }
}

/// What the model is allowed to send back; `selected_servers` may be absent.
#[derive(Deserialize)]
struct RawPerception {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    tool_hint: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    selected_servers: Option<Vec<String>>,
}

/// Find the JSON object in a model reply: a ```json fence if present,
/// otherwise the span from the first `{` to the last `}`.
pub fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a perception reply against the known servers.
///
/// Unknown server ids are dropped. A reply without `selected_servers`, or one
/// naming only unknown servers, selects every server. An explicit empty list
/// is kept: it means "no tools needed".
pub fn parse_perception(text: &str, servers: &[&ToolServerInfo]) -> Option<PerceptionResult> {
    let block = extract_json_block(text)?;
    let raw: RawPerception = serde_json::from_str(block).ok()?;

    let all: Vec<String> = servers.iter().map(|s| s.id.clone()).collect();
    let selected_servers = match raw.selected_servers {
        None => all,
        Some(list) if list.is_empty() => Vec::new(),
        Some(list) => {
            let known: Vec<String> = list.into_iter().filter(|id| all.contains(id)).collect();
            if known.is_empty() { all } else { known }
        }
    };

    Some(PerceptionResult {
        intent: raw.intent.filter(|i| !i.trim().is_empty()).unwrap_or_else(|| "unknown".into()),
        entities: raw.entities,
        tool_hint: raw.tool_hint.filter(|h| !h.trim().is_empty() && h != "null"),
        tags: raw.tags,
        selected_servers,
    })
}

pub struct Perception {
    provider: Arc<dyn Provider>,
    timeout: Duration,
}

impl Perception {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn perceive(&self, input: &str, servers: &[&ToolServerInfo]) -> PerceptionResult {
        let request = TextRequest::new(prompts::stage::PERCEPTION, prompts::perception(servers, input))
            .with_temperature(0.0);

        let text = match tokio::time::timeout(self.timeout, self.provider.generate(request)).await {
            Ok(Ok(response)) => response.text,
            Ok(Err(e)) => {
                warn!(error = %e, "Perception call failed, selecting all servers");
                return PerceptionResult::fallback(servers);
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Perception timed out, selecting all servers");
                return PerceptionResult::fallback(servers);
            }
        };

        match parse_perception(&text, servers) {
            Some(result) => {
                debug!(intent = %result.intent, servers = ?result.selected_servers, "Perception complete");
                result
            }
            None => {
                warn!("Perception reply was not valid JSON, selecting all servers");
                PerceptionResult::fallback(servers)
            }
        }
    }
}

//! Shared test doubles for the agent crate.

use async_trait::async_trait;
use cortex_core::error::{ProviderError, ToolError};
use cortex_core::provider::{Embedder, Provider, TextRequest, TextResponse};
use cortex_core::tool::{Tool, text_payload};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sandbox::{SandboxFault, SandboxRuntime, ToolBridge};

/// A mock provider that returns scripted replies per pipeline stage.
///
/// Each call for a stage pops the next reply queued for it. A stage with
/// nothing left answers with an API error.
#[derive(Default)]
pub struct SequentialMockProvider {
    replies: Mutex<HashMap<String, VecDeque<Result<String, ProviderError>>>>,
    prompts: Mutex<HashMap<String, Vec<String>>>,
}

impl SequentialMockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<'a>(self, stage: &str, replies: impl IntoIterator<Item = &'a str>) -> Self {
        self.on_results(stage, replies.into_iter().map(|r| Ok(r.to_string())))
    }

    pub fn on_results(self, stage: &str, replies: impl IntoIterator<Item = Result<String, ProviderError>>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(stage.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// Prompts received for a stage, in call order.
    pub fn prompts(&self, stage: &str) -> Vec<String> {
        self.prompts.lock().unwrap().get(stage).cloned().unwrap_or_default()
    }

    pub fn call_count(&self, stage: &str) -> usize {
        self.prompts(stage).len()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn generate(&self, request: TextRequest) -> Result<TextResponse, ProviderError> {
        self.prompts
            .lock()
            .unwrap()
            .entry(request.stage.clone())
            .or_default()
            .push(request.prompt.clone());

        let next = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&request.stage)
            .and_then(|q| q.pop_front());

        match next {
            Some(Ok(text)) => Ok(TextResponse {
                text,
                model: "mock-model".into(),
                usage: None,
            }),
            Some(Err(e)) => Err(e),
            None => Err(ProviderError::ApiError {
                status_code: 500,
                message: format!("no scripted reply for stage '{}'", request.stage),
            }),
        }
    }
}

/// Embeds text as word-presence counts over a fixed vocabulary, so texts
/// sharing words are similar and unrelated texts are orthogonal.
pub struct KeywordEmbedder {
    vocabulary: Vec<&'static str>,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&'static str]) -> Self {
        Self {
            vocabulary: vocabulary.to_vec(),
        }
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let lower = text.to_lowercase();
        Ok(self
            .vocabulary
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect())
    }
}

/// A tool that returns a fixed text and counts its invocations.
pub struct StaticTool {
    name: String,
    reply: Result<String, String>,
    pub invocations: AtomicUsize,
}

impl StaticTool {
    pub fn ok(name: &str, reply: &str) -> Self {
        Self {
            name: name.into(),
            reply: Ok(reply.into()),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self {
            name: name.into(),
            reply: Err(error.into()),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted tool"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn invoke(&self, _input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Ok(text) => Ok(text_payload(text.clone())),
            Err(reason) => Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// One action of a scripted `solve` run.
#[derive(Debug, Clone)]
pub enum Action {
    /// Call a tool; a non-fatal failure is swallowed like `try/except`.
    Call(&'static str),
    /// Call a tool and let a failure propagate as an uncaught error.
    CallOrRaise(&'static str),
    /// Return this value from `solve`.
    Return(String),
    /// Return the text of the last successful tool result after a prefix.
    ReturnLastResult(&'static str),
    /// Raise an uncaught error.
    Raise(&'static str),
    /// Sleep, simulating slow generated code.
    Sleep(std::time::Duration),
}

/// A sandbox runtime that ignores the code and plays back scripts, one per run.
#[derive(Default)]
pub struct ScriptedRuntime {
    scripts: Mutex<VecDeque<Vec<Action>>>,
    pub codes: Mutex<Vec<String>>,
}

impl ScriptedRuntime {
    pub fn new(scripts: Vec<Vec<Action>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            codes: Mutex::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> usize {
        self.codes.lock().unwrap().len()
    }
}

#[async_trait]
impl SandboxRuntime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, code: &str, bridge: &mut dyn ToolBridge) -> Result<String, SandboxFault> {
        self.codes.lock().unwrap().push(code.to_string());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();

        let mut last_text = String::new();
        for action in script {
            match action {
                Action::Call(name) | Action::CallOrRaise(name) => {
                    let raise = matches!(action, Action::CallOrRaise(_));
                    match bridge.call_tool(name, serde_json::json!({"query": name})).await {
                        Ok(payload) => {
                            last_text = cortex_core::tool::payload_text(&payload).unwrap_or_default();
                        }
                        Err(failure) => {
                            if failure.is_fatal() {
                                return Err(SandboxFault::Aborted(failure));
                            }
                            if raise {
                                return Err(SandboxFault::Raised(format!("ToolError: {failure}")));
                            }
                        }
                    }
                }
                Action::Return(value) => return Ok(value),
                Action::ReturnLastResult(prefix) => return Ok(format!("{prefix} {last_text}")),
                Action::Raise(message) => return Err(SandboxFault::Raised(message.into())),
                Action::Sleep(d) => tokio::time::sleep(d).await,
            }
        }
        Ok("None".into())
    }
}

//! Provider traits — the abstraction over LLM and embedding backends.
//!
//! The control loop only ever needs free text back from a model (perception,
//! planning, routing judgment, direct analysis), so the provider contract is
//! prompt in, text out. Everything a provider returns is untrusted and is
//! parsed/validated by the caller.
//!
//! Implementations: OpenAI-compatible endpoints (OpenAI, OpenRouter, Ollama).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;

/// A single text-generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRequest {
    /// The fully rendered prompt
    pub prompt: String,

    /// Temperature override; the provider default applies when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Which pipeline stage issued the request (for logs only)
    #[serde(default)]
    pub stage: String,
}

impl TextRequest {
    pub fn new(stage: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
            stage: stage.into(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextResponse {
    /// The generated text, untrimmed
    pub text: String,

    /// Which model actually responded
    pub model: String,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core text-generation trait.
///
/// Every LLM backend implements this. The agent calls `generate()` without
/// knowing which backend is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Send a prompt and get the complete response text.
    async fn generate(&self, request: TextRequest) -> std::result::Result<TextResponse, ProviderError>;

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

/// Turns text into an embedding vector for similarity search.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError>;
}

//! Configuration loading, validation, and management for Cortex.
//!
//! Loads configuration from `~/.cortex/config.toml` with environment
//! variable overrides. Validates all budgets and thresholds at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.cortex/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM / embedding endpoint
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Loop budgets and fallbacks
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Historical router thresholds
    #[serde(default)]
    pub router: RouterConfig,

    /// Conversation memory storage
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Code execution sandbox
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Tool servers offered to perception
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// External command tools
    #[serde(default)]
    pub tools: Vec<CommandToolConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name, for logs
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API key (usually supplied through the environment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Text-generation model
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// HTTP timeout for a single request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Budgets and fallbacks of the plan/execute/observe loop. All budgets are
/// per run and are hard ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Maximum number of steps (a step ends with a continuation)
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Consecutive tool/sandbox failures before the run is abandoned
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,

    /// Planner invocations allowed per attempt before PLAN_INVALID is terminal
    #[serde(default = "default_max_plan_attempts")]
    pub max_plan_attempts: usize,

    /// Maximum tool invocations per run
    #[serde(default = "default_tool_call_budget")]
    pub tool_call_budget: usize,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,

    /// Wall-clock limit for one execution of `solve`
    #[serde(default = "default_sandbox_timeout")]
    pub sandbox_timeout_secs: u64,

    /// Answer directly with the LLM when the selected servers expose no tools
    #[serde(default = "default_true")]
    pub answer_without_tools: bool,

    /// After this many continuations in one run, analyse the payload directly
    /// instead of planning again (0 disables)
    #[serde(default = "default_direct_analysis_after")]
    pub direct_analysis_after: usize,

    /// Payload characters kept in analysis prompts
    #[serde(default = "default_max_payload_chars")]
    pub max_payload_chars: usize,
}

fn default_max_steps() -> usize {
    5
}
fn default_max_consecutive_failures() -> usize {
    2
}
fn default_max_plan_attempts() -> usize {
    2
}
fn default_tool_call_budget() -> usize {
    10
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_sandbox_timeout() -> u64 {
    120
}
fn default_true() -> bool {
    true
}
fn default_direct_analysis_after() -> usize {
    2
}
fn default_max_payload_chars() -> usize {
    50_000
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_consecutive_failures: default_max_consecutive_failures(),
            max_plan_attempts: default_max_plan_attempts(),
            tool_call_budget: default_tool_call_budget(),
            tool_timeout_secs: default_tool_timeout(),
            llm_timeout_secs: default_llm_timeout(),
            sandbox_timeout_secs: default_sandbox_timeout(),
            answer_without_tools: true,
            direct_analysis_after: default_direct_analysis_after(),
            max_payload_chars: default_max_payload_chars(),
        }
    }
}

impl StrategyConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_timeout_secs)
    }
}

/// Historical router parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Consult history at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How many similar records to retrieve
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Records below this cosine similarity are ignored
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// A direct answer is only accepted when the best record is at least
    /// this similar; otherwise it is downgraded to context
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f32,
}

fn default_top_k() -> usize {
    5
}
fn default_min_similarity() -> f32 {
    0.3
}
fn default_acceptance_threshold() -> f32 {
    0.75
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            acceptance_threshold: default_acceptance_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "file" or "in_memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// Storage directory for the file backend; `~/.cortex/memory` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_memory_backend() -> String {
    "file".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            dir: None,
        }
    }
}

impl MemoryConfig {
    /// The effective storage directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("memory"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Python interpreter used to run generated code
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Modules generated code may import
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<String>,
}

fn default_interpreter() -> String {
    "python3".into()
}
fn default_allowed_modules() -> Vec<String> {
    ["json", "math", "re", "datetime", "statistics", "collections", "itertools", "functools", "asyncio"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            allowed_modules: default_allowed_modules(),
        }
    }
}

/// A tool server as described to perception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// A tool backed by a local command: JSON input on stdin, result on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandToolConfig {
    pub name: String,

    /// Server id this tool belongs to
    pub server: String,

    #[serde(default)]
    pub description: String,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// JSON Schema of the input; `{"type": "object"}` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Load configuration from the default location with env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var("CORTEX_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }
        if let Ok(url) = std::env::var("CORTEX_API_URL") {
            self.provider.api_url = url;
        }
        if let Ok(model) = std::env::var("CORTEX_MODEL") {
            self.provider.model = model;
        }
        if let Ok(dir) = std::env::var("CORTEX_MEMORY_DIR") {
            self.memory.dir = Some(PathBuf::from(dir));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cortex")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.temperature < 0.0 || self.provider.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let s = &self.strategy;
        if s.max_steps == 0 {
            return Err(ConfigError::ValidationError("strategy.max_steps must be >= 1".into()));
        }
        if s.max_consecutive_failures == 0 {
            return Err(ConfigError::ValidationError(
                "strategy.max_consecutive_failures must be >= 1".into(),
            ));
        }
        if s.max_plan_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "strategy.max_plan_attempts must be >= 1".into(),
            ));
        }
        if s.tool_timeout_secs == 0 || s.llm_timeout_secs == 0 || s.sandbox_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("timeouts must be > 0 seconds".into()));
        }

        let r = &self.router;
        if r.top_k == 0 {
            return Err(ConfigError::ValidationError("router.top_k must be >= 1".into()));
        }
        for (name, value) in [
            ("router.min_similarity", r.min_similarity),
            ("router.acceptance_threshold", r.acceptance_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between -1.0 and 1.0"
                )));
            }
        }
        if r.acceptance_threshold < r.min_similarity {
            return Err(ConfigError::ValidationError(
                "router.acceptance_threshold must be >= router.min_similarity".into(),
            ));
        }

        if !matches!(self.memory.backend.as_str(), "file" | "in_memory") {
            return Err(ConfigError::ValidationError(format!(
                "memory.backend must be \"file\" or \"in_memory\", got \"{}\"",
                self.memory.backend
            )));
        }

        for tool in &self.tools {
            if tool.name.trim().is_empty() || tool.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "every [[tools]] entry needs a name and a command".into(),
                ));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy.max_steps, 5);
        assert_eq!(config.strategy.max_consecutive_failures, 2);
        assert_eq!(config.router.top_k, 5);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.strategy.tool_call_budget, config.strategy.tool_call_budget);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.provider.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_step_budget_rejected() {
        let mut config = AppConfig::default();
        config.strategy.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn acceptance_below_min_similarity_rejected() {
        let mut config = AppConfig::default();
        config.router.min_similarity = 0.8;
        config.router.acceptance_threshold = 0.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("acceptance_threshold"));
    }

    #[test]
    fn unknown_memory_backend_rejected() {
        let mut config = AppConfig::default();
        config.memory.backend = "faiss".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider.name, "openai");
    }

    #[test]
    fn api_key_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn servers_and_tools_parse() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[strategy]
max_steps = 3
tool_call_budget = 4

[router]
acceptance_threshold = 0.9

[[servers]]
id = "documents"
description = "Search local documents"

[[tools]]
name = "search_documents"
server = "documents"
description = "Full-text search over indexed documents"
command = "doc-search"
args = ["--json"]
timeout_secs = 10
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.strategy.max_steps, 3);
        assert_eq!(config.strategy.max_consecutive_failures, 2);
        assert_eq!(config.servers[0].id, "documents");
        assert_eq!(config.tools[0].args, vec!["--json".to_string()]);
        assert_eq!(config.tools[0].timeout_secs, Some(10));
        assert!((config.router.acceptance_threshold - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("max_steps"));
        assert!(toml_str.contains("acceptance_threshold"));
    }
}

//! Command tool — a tool backed by a local executable.
//!
//! The JSON input is written to the process's stdin. Stdout is the result:
//! a JSON object carrying a `content` list is passed through unchanged,
//! anything else is wrapped as a single text block.

use async_trait::async_trait;
use cortex_config::CommandToolConfig;
use cortex_core::error::ToolError;
use cortex_core::tool::{Tool, text_payload};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct CommandTool {
    name: String,
    description: String,
    command: String,
    args: Vec<String>,
    parameters: serde_json::Value,
    timeout: Option<Duration>,
}

impl CommandTool {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            command: command.into(),
            args: Vec::new(),
            parameters: serde_json::json!({"type": "object"}),
            timeout: None,
        }
    }

    pub fn from_config(config: &CommandToolConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            parameters: config
                .parameters
                .clone()
                .unwrap_or_else(|| serde_json::json!({"type": "object"})),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run(&self, input: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason,
        };

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("cannot start '{}': {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let body = serde_json::to_vec(input).map_err(|e| failed(e.to_string()))?;
            // A command that ignores its input may close stdin early
            if let Err(e) = stdin.write_all(&body).await {
                debug!(tool = %self.name, error = %e, "stdin closed before input was written");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            warn!(tool = %self.name, exit_code = code, "Command tool failed");
            return Err(failed(format!("[exit code: {code}] {stderr}")));
        }

        Ok(parse_output(stdout))
    }
}

/// Pass canonical payloads through; wrap everything else as text.
fn parse_output(stdout: String) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(&stdout) {
        Ok(value) if value.get("content").is_some_and(|c| c.is_array()) => value,
        _ => text_payload(stdout),
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        debug!(tool = %self.name, command = %self.command, "Executing command tool");

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(&input))
                .await
                .map_err(|_| ToolError::Timeout {
                    tool_name: self.name.clone(),
                    timeout_secs: limit.as_secs(),
                })?,
            None => self.run(&input).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::tool::payload_text;

    #[test]
    fn canonical_payload_passes_through() {
        let out = parse_output(r#"{"content":[{"type":"text","text":"42"}]}"#.into());
        assert_eq!(payload_text(&out).as_deref(), Some("42"));
    }

    #[test]
    fn plain_output_is_wrapped() {
        let out = parse_output("hello".into());
        assert_eq!(payload_text(&out).as_deref(), Some("hello"));

        let out = parse_output(r#"{"value": 3}"#.into());
        assert_eq!(payload_text(&out).as_deref(), Some(r#"{"value": 3}"#));
    }

    #[test]
    fn from_config_defaults_schema() {
        let config = CommandToolConfig {
            name: "lookup".into(),
            server: "docs".into(),
            description: "Look things up".into(),
            command: "lookup-bin".into(),
            args: vec![],
            parameters: None,
            timeout_secs: Some(3),
        };
        let tool = CommandTool::from_config(&config);
        assert_eq!(tool.parameters_schema()["type"], "object");
        assert_eq!(tool.timeout, Some(Duration::from_secs(3)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn input_is_fed_on_stdin() {
        let tool = CommandTool::new("echo_input", "cat");
        let payload = tool.invoke(serde_json::json!({"q": "x"})).await.unwrap();
        assert_eq!(payload_text(&payload).as_deref(), Some(r#"{"q":"x"}"#));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let tool = CommandTool::new("broken", "sh").with_args(vec!["-c".into(), "echo boom >&2; exit 3".into()]);
        let err = tool.invoke(serde_json::json!({})).await.unwrap_err();
        match err {
            ToolError::ExecutionFailed { reason, .. } => {
                assert!(reason.contains("exit code: 3"));
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let tool = CommandTool::new("slow", "sleep")
            .with_args(vec!["5".into()])
            .with_timeout(Duration::from_millis(200));
        let err = tool.invoke(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_failure() {
        let tool = CommandTool::new("ghost", "definitely-not-a-real-binary-xyz");
        assert!(tool.invoke(serde_json::json!({})).await.is_err());
    }
}

//! Step outcomes and the textual termination protocol.
//!
//! Generated `solve` code signals how the loop should proceed by prefixing
//! its return value with one of two case-sensitive markers.

use serde::{Deserialize, Serialize};

/// Prefix of a terminal result.
pub const FINAL_MARKER: &str = "FINAL_ANSWER:";

/// Prefix of a result that needs another step of processing.
pub const CONTINUE_MARKER: &str = "FURTHER_PROCESSING_REQUIRED:";

/// What one execution of a plan produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Final { answer: String },
    NeedsFurtherProcessing { payload: String },
    ToolFailure { error: ToolFailure },
    SandboxError { error: String },
}

impl StepOutcome {
    /// Classify the string returned by `solve`.
    ///
    /// Leading/trailing whitespace around the whole value and around the
    /// payload is ignored; anything without a recognized prefix, and a final
    /// marker with nothing after it, is a sandbox error.
    pub fn from_return_value(value: &str) -> Self {
        let value = value.trim();
        if let Some(answer) = value.strip_prefix(FINAL_MARKER) {
            let answer = answer.trim();
            if answer.is_empty() {
                return Self::SandboxError {
                    error: "solve() returned an empty final answer".into(),
                };
            }
            Self::Final {
                answer: answer.to_string(),
            }
        } else if let Some(payload) = value.strip_prefix(CONTINUE_MARKER) {
            Self::NeedsFurtherProcessing {
                payload: payload.trim().to_string(),
            }
        } else {
            let preview: String = value.chars().take(200).collect();
            Self::SandboxError {
                error: format!("solve() returned an unrecognized value: {preview:?}"),
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ToolFailure { .. } | Self::SandboxError { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Final { .. } => "final",
            Self::NeedsFurtherProcessing { .. } => "needs_further_processing",
            Self::ToolFailure { .. } => "tool_failure",
            Self::SandboxError { .. } => "sandbox_error",
        }
    }
}

/// Why a tool invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// The tool itself returned an error.
    Failed,
    /// The per-call timeout elapsed.
    TimedOut,
    /// The tool is unknown or outside the step's catalog.
    NotFound,
    /// The per-run tool-call budget is spent; the call was never made.
    BudgetExceeded,
}

/// A failed tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub tool_name: String,
    pub message: String,
}

impl ToolFailure {
    pub fn new(kind: ToolFailureKind, tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Fatal failures abort the current run instead of being handed back to
    /// the generated code.
    pub fn is_fatal(&self) -> bool {
        self.kind == ToolFailureKind::BudgetExceeded
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ToolFailureKind::Failed => "failed",
            ToolFailureKind::TimedOut => "timed out",
            ToolFailureKind::NotFound => "not available",
            ToolFailureKind::BudgetExceeded => "refused (tool-call budget exceeded)",
        };
        write!(f, "tool '{}' {}: {}", self.tool_name, kind, self.message)
    }
}

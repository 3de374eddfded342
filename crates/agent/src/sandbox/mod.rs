//! Sandboxed execution of validated plans.
//!
//! A [`SandboxRuntime`] runs the code of one plan and routes every tool call
//! the code makes back through a [`ToolBridge`]. The bridge is where budgets,
//! timeouts, and the step's tool catalog are enforced; the runtime never
//! touches a tool directly.

pub mod executor;
pub mod python;

pub use executor::Executor;
pub use python::PythonRuntime;

use async_trait::async_trait;
use cortex_core::outcome::ToolFailure;

/// The only path from generated code to a tool.
#[async_trait]
pub trait ToolBridge: Send {
    /// Invoke `name` with `input`. Fatal failures must end the run.
    async fn call_tool(&mut self, name: &str, input: serde_json::Value) -> Result<serde_json::Value, ToolFailure>;
}

/// Why a sandbox run did not return a value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxFault {
    /// The code raised an uncaught error.
    #[error("solve() raised: {0}")]
    Raised(String),

    /// A fatal tool failure stopped the run.
    #[error("{0}")]
    Aborted(ToolFailure),

    /// The sandbox process could not be started.
    #[error("failed to start sandbox: {0}")]
    Spawn(String),

    /// The sandbox process broke the message protocol.
    #[error("sandbox protocol error: {0}")]
    Protocol(String),
}

/// Executes plan code in isolation.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Run `code`, call its `solve`, and return the value it produced as a string.
    async fn run(&self, code: &str, bridge: &mut dyn ToolBridge) -> Result<String, SandboxFault>;
}

//! The Cortex control loop.
//!
//! Each query goes through the following steps:
//!
//! 1. **Route** against conversation history: answer directly, reuse it as
//!    context, or start fresh
//! 2. **Perceive** the current input and select tool servers
//! 3. **Plan** one step as a `solve()` function
//! 4. **Execute** it in a sandbox where every tool call is budgeted
//! 5. **Observe** the marker it returned: finish, or feed the payload into
//!    the next step
//!
//! The loop stops on a final answer, on budget exhaustion, or on
//! cancellation. Every query persists exactly one conversation record.

pub mod context;
pub mod loop_runner;
pub mod perception;
pub mod planner;
pub mod prompts;
pub mod router;
pub mod sandbox;

#[cfg(test)]
mod test_helpers;

pub use context::{AgentContext, ExhaustionReason, Termination, ToolLedger};
pub use loop_runner::{AgentLoop, RunReport};
pub use perception::{Perception, PerceptionResult};
pub use planner::{PlanError, Planner, ValidatedPlan};
pub use router::HistoricalRouter;
pub use sandbox::{Executor, PythonRuntime, SandboxFault, SandboxRuntime, ToolBridge};

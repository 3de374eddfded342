//! The executor runs one validated plan and classifies what it produced.

use super::{SandboxFault, SandboxRuntime, ToolBridge};
use crate::context::ToolLedger;
use crate::planner::ValidatedPlan;
use async_trait::async_trait;
use chrono::Utc;
use cortex_core::error::ToolError;
use cortex_core::event::{DomainEvent, EventBus};
use cortex_core::outcome::{StepOutcome, ToolFailure, ToolFailureKind};
use cortex_core::tool::{ToolCall, ToolDefinition, ToolRegistry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct Executor {
    runtime: Arc<dyn SandboxRuntime>,
    tools: Arc<ToolRegistry>,
    tool_timeout: Duration,
    run_timeout: Duration,
    events: Option<Arc<EventBus>>,
}

impl Executor {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            runtime,
            tools,
            tool_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(120),
            events: None,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run `plan` with access to the tools in `catalog` only.
    ///
    /// Every invoked call is appended to `ledger`. This never returns an
    /// error: every way a run can go wrong maps to a [`StepOutcome`].
    pub async fn execute(&self, plan: &ValidatedPlan, catalog: &[ToolDefinition], ledger: &mut ToolLedger) -> StepOutcome {
        let mut interceptor = Interceptor {
            tools: &self.tools,
            catalog,
            ledger,
            timeout: self.tool_timeout,
            events: self.events.as_deref(),
            last_failure: None,
        };

        let result = tokio::time::timeout(self.run_timeout, self.runtime.run(plan.code(), &mut interceptor)).await;
        let last_failure = interceptor.last_failure.take();

        let outcome = match result {
            Err(_) => StepOutcome::SandboxError {
                error: format!("execution exceeded {}s", self.run_timeout.as_secs()),
            },
            Ok(Ok(value)) => StepOutcome::from_return_value(&value),
            Ok(Err(SandboxFault::Aborted(failure))) => StepOutcome::ToolFailure { error: failure },
            Ok(Err(SandboxFault::Raised(message))) => match last_failure {
                Some(failure) => StepOutcome::ToolFailure {
                    error: ToolFailure::new(
                        failure.kind,
                        failure.tool_name,
                        format!("{} (uncaught: {message})", failure.message),
                    ),
                },
                None => StepOutcome::SandboxError { error: message },
            },
            Ok(Err(fault)) => StepOutcome::SandboxError { error: fault.to_string() },
        };

        debug!(runtime = self.runtime.name(), outcome = outcome.label(), "Plan executed");
        outcome
    }
}

/// Sits between the sandbox and the registry for one execution.
struct Interceptor<'a> {
    tools: &'a ToolRegistry,
    catalog: &'a [ToolDefinition],
    ledger: &'a mut ToolLedger,
    timeout: Duration,
    events: Option<&'a EventBus>,
    /// The most recent failed call, cleared by a later success
    last_failure: Option<ToolFailure>,
}

impl Interceptor<'_> {
    fn fail(&mut self, failure: ToolFailure) -> Result<serde_json::Value, ToolFailure> {
        self.last_failure = Some(failure.clone());
        Err(failure)
    }
}

#[async_trait]
impl ToolBridge for Interceptor<'_> {
    async fn call_tool(&mut self, name: &str, input: serde_json::Value) -> Result<serde_json::Value, ToolFailure> {
        let tool = match self.tools.get(name) {
            Some(tool) if self.catalog.iter().any(|d| d.name == name) => tool,
            _ => {
                warn!(tool = name, "Generated code called a tool outside the step catalog");
                let failure = ToolFailure::new(
                    ToolFailureKind::NotFound,
                    name,
                    "no such tool is available in this step",
                );
                self.ledger.record_rejected(name, input, failure.message.clone());
                return self.fail(failure);
            }
        };

        let sequence = match self.ledger.try_reserve(name) {
            Ok(sequence) => sequence,
            Err(refused) => {
                warn!(tool = name, budget = self.ledger.budget(), "Tool call refused, budget exhausted");
                return self.fail(refused);
            }
        };

        info!(tool = name, sequence, "Invoking tool");
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, tool.invoke(input.clone())).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(ToolError::Timeout { timeout_secs, .. })) => Err(ToolFailure::new(
                ToolFailureKind::TimedOut,
                name,
                format!("no result after {timeout_secs}s"),
            )),
            Ok(Err(e)) => Err(ToolFailure::new(ToolFailureKind::Failed, name, e.to_string())),
            Err(_) => Err(ToolFailure::new(
                ToolFailureKind::TimedOut,
                name,
                format!("no result after {}s", self.timeout.as_secs()),
            )),
        };

        self.ledger.record(ToolCall {
            sequence,
            tool_name: name.to_string(),
            input,
            output: outcome.as_ref().ok().cloned(),
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(|f| f.message.clone()),
            duration_ms,
        });

        if let Some(events) = self.events {
            events.publish(DomainEvent::ToolExecuted {
                tool_name: name.to_string(),
                success: outcome.is_ok(),
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        match outcome {
            Ok(output) => {
                self.last_failure = None;
                Ok(output)
            }
            Err(failure) => {
                warn!(tool = name, error = %failure.message, "Tool call failed");
                self.fail(failure)
            }
        }
    }
}

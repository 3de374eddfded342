//! Per-query run state.
//!
//! One [`AgentContext`] exists per top-level query and is owned by the loop
//! driving that query. Nothing in it is shared between runs.

use cortex_core::memory::SessionId;
use cortex_core::outcome::{ToolFailure, ToolFailureKind};
use cortex_core::routing::RouteKind;
use cortex_core::tool::ToolCall;
use serde::{Deserialize, Serialize};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Termination {
    /// Answered from history without entering the loop.
    Direct,
    /// A step produced a final answer.
    Final,
    /// A budget ran out; the answer is best-effort.
    BudgetExhausted(ExhaustionReason),
    /// The caller cancelled the run.
    Cancelled,
}

impl Termination {
    /// Whether the answer is incomplete.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::BudgetExhausted(_) | Self::Cancelled)
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Final => f.write_str("final"),
            Self::BudgetExhausted(reason) => write!(f, "budget_exhausted({reason})"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    StepBudget,
    RepeatedFailures,
    PlanInvalid,
    ToolBudget,
}

impl std::fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StepBudget => "step budget",
            Self::RepeatedFailures => "repeated failures",
            Self::PlanInvalid => "invalid plan",
            Self::ToolBudget => "tool-call budget",
        };
        f.write_str(s)
    }
}

/// Tool calls made during one run, against a hard budget.
///
/// A sequence index is reserved *before* a tool is invoked; once the budget
/// is spent, reservation fails and the tool is never called. Calls rejected
/// before reaching a tool get a sequence index but no budget slot.
#[derive(Debug, Clone)]
pub struct ToolLedger {
    budget: usize,
    reserved: usize,
    next_sequence: usize,
    calls: Vec<ToolCall>,
}

impl ToolLedger {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            reserved: 0,
            next_sequence: 0,
            calls: Vec::new(),
        }
    }

    /// Reserve the next sequence index for a call to `tool_name`.
    pub fn try_reserve(&mut self, tool_name: &str) -> Result<usize, ToolFailure> {
        if self.reserved >= self.budget {
            return Err(ToolFailure::new(
                ToolFailureKind::BudgetExceeded,
                tool_name,
                format!("limit of {} tool calls per run reached", self.budget),
            ));
        }
        self.reserved += 1;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Ok(sequence)
    }

    /// Append a finished call.
    pub fn record(&mut self, call: ToolCall) {
        self.calls.push(call);
    }

    /// Record a call that was refused before any tool ran.
    pub fn record_rejected(&mut self, tool_name: &str, input: serde_json::Value, error: impl Into<String>) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.calls.push(ToolCall {
            sequence,
            tool_name: tool_name.to_string(),
            input,
            output: None,
            success: false,
            error: Some(error.into()),
            duration_ms: 0,
        });
    }

    /// Calls reserved so far, including any still in flight.
    pub fn count(&self) -> usize {
        self.reserved
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn into_calls(self) -> Vec<ToolCall> {
        self.calls
    }
}

/// State of one query's run.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub session_id: SessionId,
    user_input: String,
    user_input_override: Option<String>,

    /// Relevant history from the router, carried into every continuation
    pub historical_context: Option<String>,

    /// Completed steps; a step completes on a continuation.
    pub step_index: usize,

    /// Plans executed, retries included
    pub plans_executed: usize,

    pub ledger: ToolLedger,
    pub consecutive_failures: usize,

    /// Continuations seen in this run
    pub continuations: usize,
    pub last_payload: Option<String>,
    pub last_error: Option<String>,

    pub route: RouteKind,
    pub termination: Option<Termination>,
}

impl AgentContext {
    pub fn new(user_input: impl Into<String>, session_id: SessionId, tool_call_budget: usize) -> Self {
        Self {
            session_id,
            user_input: user_input.into(),
            user_input_override: None,
            historical_context: None,
            step_index: 0,
            plans_executed: 0,
            ledger: ToolLedger::new(tool_call_budget),
            consecutive_failures: 0,
            continuations: 0,
            last_payload: None,
            last_error: None,
            route: RouteKind::default(),
            termination: None,
        }
    }

    /// The query exactly as the user asked it.
    pub fn user_input(&self) -> &str {
        &self.user_input
    }

    pub fn user_input_override(&self) -> Option<&str> {
        self.user_input_override.as_deref()
    }

    /// Replace the input seen by every later perception and planning call.
    pub fn set_override(&mut self, text: impl Into<String>) {
        self.user_input_override = Some(text.into());
    }

    /// The input for the current iteration. Read fresh each time.
    pub fn effective_input(&self) -> &str {
        self.user_input_override.as_deref().unwrap_or(&self.user_input)
    }

    pub fn terminate(&mut self, termination: Termination) {
        self.termination = Some(termination);
    }
}

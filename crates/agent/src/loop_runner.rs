//! The agent loop: route once, then perceive → plan → execute until a final
//! answer or a budget runs out.

use crate::context::{AgentContext, ExhaustionReason, Termination};
use crate::perception::{Perception, PerceptionResult};
use crate::planner::{PlanError, Planner, ValidatedPlan};
use crate::prompts::{self, stage};
use crate::router::HistoricalRouter;
use crate::sandbox::{Executor, SandboxRuntime};
use chrono::Utc;
use cortex_config::{RouterConfig, StrategyConfig};
use cortex_core::event::{DomainEvent, EventBus};
use cortex_core::memory::{ConversationRecord, SessionId};
use cortex_core::outcome::StepOutcome;
use cortex_core::provider::{Provider, TextRequest};
use cortex_core::routing::{RouteKind, RoutingDecision};
use cortex_core::tool::{ToolCall, ToolDefinition, ToolRegistry};
use cortex_memory::SemanticMemory;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-result cap when earlier tool output is shown to the planner
const EARLIER_RESULT_CHARS: usize = 1000;

/// What the caller gets back for one query. Runs never fail; an incomplete
/// run is reported through `partial` and `warning`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub answer: String,
    pub termination: Termination,
    pub partial: bool,
    pub warning: Option<String>,
    pub route: RouteKind,
    /// Steps completed (a step completes on a continuation)
    pub steps: usize,
    /// Plans executed, retries included
    pub executions: usize,
    pub tool_calls: Vec<ToolCall>,
    /// Id of the persisted record, if persisting succeeded
    pub record_id: Option<String>,
}

/// The core agent loop.
///
/// One `AgentLoop` can serve concurrent queries; each run owns its own
/// [`AgentContext`], and the memory store is the only shared state.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    memory: Arc<SemanticMemory>,
    tools: Arc<ToolRegistry>,
    runtime: Arc<dyn SandboxRuntime>,
    event_bus: Arc<EventBus>,
    strategy: StrategyConfig,

    router: HistoricalRouter,
    perception: Perception,
    planner: Planner,
    executor: Executor,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        memory: Arc<SemanticMemory>,
        tools: Arc<ToolRegistry>,
        runtime: Arc<dyn SandboxRuntime>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let strategy = StrategyConfig::default();
        Self {
            router: HistoricalRouter::new(memory.clone(), provider.clone(), RouterConfig::default())
                .with_timeout(strategy.llm_timeout()),
            perception: Perception::new(provider.clone()).with_timeout(strategy.llm_timeout()),
            planner: Planner::new(provider.clone()).with_timeout(strategy.llm_timeout()),
            executor: Self::build_executor(&runtime, &tools, &event_bus, &strategy),
            provider,
            memory,
            tools,
            runtime,
            event_bus,
            strategy,
        }
    }

    fn build_executor(
        runtime: &Arc<dyn SandboxRuntime>,
        tools: &Arc<ToolRegistry>,
        event_bus: &Arc<EventBus>,
        strategy: &StrategyConfig,
    ) -> Executor {
        Executor::new(runtime.clone(), tools.clone())
            .with_tool_timeout(strategy.tool_timeout())
            .with_run_timeout(strategy.sandbox_timeout())
            .with_events(event_bus.clone())
    }

    /// Replace budgets and timeouts.
    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.router = self.router.with_timeout(strategy.llm_timeout());
        self.perception = Perception::new(self.provider.clone()).with_timeout(strategy.llm_timeout());
        self.planner = Planner::new(self.provider.clone()).with_timeout(strategy.llm_timeout());
        self.executor = Self::build_executor(&self.runtime, &self.tools, &self.event_bus, &strategy);
        self.strategy = strategy;
        self
    }

    pub fn with_router_config(mut self, config: RouterConfig) -> Self {
        self.router = HistoricalRouter::new(self.memory.clone(), self.provider.clone(), config)
            .with_timeout(self.strategy.llm_timeout());
        self
    }

    pub fn strategy(&self) -> &StrategyConfig {
        &self.strategy
    }

    pub async fn run(&self, query: &str, session_id: &SessionId) -> RunReport {
        self.run_with_cancel(query, session_id, CancellationToken::new()).await
    }

    /// Handle one query. Cancelling `cancel` stops the run at its next
    /// suspend point; the tool calls finished so far are still persisted.
    pub async fn run_with_cancel(&self, query: &str, session_id: &SessionId, cancel: CancellationToken) -> RunReport {
        info!(session_id = %session_id, "Processing query");
        let mut ctx = AgentContext::new(query, session_id.clone(), self.strategy.tool_call_budget);

        let answer = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            answer = self.drive(&mut ctx) => Some(answer),
        };

        let answer = match answer {
            Some(answer) => answer,
            None => {
                warn!(session_id = %session_id, "Run cancelled");
                ctx.terminate(Termination::Cancelled);
                best_effort_answer(&ctx)
            }
        };

        self.finish(ctx, answer).await
    }

    async fn drive(&self, ctx: &mut AgentContext) -> String {
        let (decision, candidates) = self.router.route_with_stats(ctx.user_input()).await;
        ctx.route = decision.kind();
        self.event_bus.publish(DomainEvent::RouteSelected {
            session_id: ctx.session_id.to_string(),
            route: ctx.route,
            candidates,
            timestamp: Utc::now(),
        });

        match decision {
            RoutingDecision::DirectAnswer { answer } => {
                info!(route = %ctx.route, "Answered from history");
                ctx.terminate(Termination::Direct);
                return answer;
            }
            RoutingDecision::ContextAware { context_text } => {
                let input = prompts::context_override(&context_text, ctx.user_input());
                ctx.set_override(input);
                ctx.historical_context = Some(context_text);
            }
            RoutingDecision::FreshApproach => {}
        }

        while ctx.step_index < self.strategy.max_steps {
            let input = ctx.effective_input().to_string();
            let step = ctx.step_index + 1;
            debug!(step, failures = ctx.consecutive_failures, "Agent loop iteration");

            let servers = self.tools.servers();
            let perception = self.perception.perceive(&input, &servers).await;
            let catalog = self.tools.definitions_for(&perception.selected_servers);

            if catalog.is_empty() && self.strategy.answer_without_tools {
                match self.ask(stage::DIRECT_ANSWER, prompts::direct_answer(&input)).await {
                    Ok(answer) => {
                        info!(step, "No tools needed, answered directly");
                        ctx.terminate(Termination::Final);
                        return answer;
                    }
                    Err(e) => {
                        if self.record_failure(ctx, e) {
                            return best_effort_answer(ctx);
                        }
                        continue;
                    }
                }
            }

            let earlier = prompts::tool_results(ctx.ledger.calls(), EARLIER_RESULT_CHARS);
            let plan = match self.plan(&perception, &catalog, &input, &earlier, step).await {
                Ok(plan) => plan,
                Err(PlanError::Invalid { reason }) => {
                    warn!(step, %reason, "No valid plan after retries");
                    ctx.last_error = Some(reason);
                    ctx.terminate(Termination::BudgetExhausted(ExhaustionReason::PlanInvalid));
                    return best_effort_answer(ctx);
                }
                Err(e) => {
                    if self.record_failure(ctx, e.to_string()) {
                        return best_effort_answer(ctx);
                    }
                    continue;
                }
            };

            let outcome = self.executor.execute(&plan, &catalog, &mut ctx.ledger).await;
            ctx.plans_executed += 1;
            self.event_bus.publish(DomainEvent::StepCompleted {
                step,
                outcome: outcome.label().to_string(),
                tool_calls_so_far: ctx.ledger.count(),
                timestamp: Utc::now(),
            });

            match outcome {
                StepOutcome::Final { answer } => {
                    info!(step, tool_calls = ctx.ledger.count(), "Final answer produced");
                    ctx.consecutive_failures = 0;
                    ctx.terminate(Termination::Final);
                    return answer;
                }
                StepOutcome::NeedsFurtherProcessing { payload } => {
                    ctx.consecutive_failures = 0;
                    ctx.continuations += 1;
                    debug!(step, payload_chars = payload.len(), "Step needs further processing");

                    let analyse_after = self.strategy.direct_analysis_after;
                    if analyse_after > 0 && ctx.continuations >= analyse_after {
                        let prompt = prompts::analysis(ctx.user_input(), &payload, self.strategy.max_payload_chars);
                        match self.ask(stage::ANALYSIS, prompt).await {
                            Ok(answer) => {
                                info!(step, continuations = ctx.continuations, "Payload analysed directly");
                                ctx.last_payload = Some(payload);
                                ctx.terminate(Termination::Final);
                                return answer;
                            }
                            Err(e) => warn!(step, error = %e, "Direct analysis failed, continuing the loop"),
                        }
                    }

                    let next = prompts::continuation(ctx.user_input(), &payload, ctx.historical_context.as_deref());
                    ctx.set_override(next);
                    ctx.last_payload = Some(payload);
                    ctx.step_index += 1;
                }
                StepOutcome::ToolFailure { error } if error.is_fatal() => {
                    warn!(step, tool = %error.tool_name, "Tool-call budget exhausted");
                    ctx.last_error = Some(error.to_string());
                    ctx.terminate(Termination::BudgetExhausted(ExhaustionReason::ToolBudget));
                    return best_effort_answer(ctx);
                }
                StepOutcome::ToolFailure { error } => {
                    if self.record_failure(ctx, error.to_string()) {
                        return best_effort_answer(ctx);
                    }
                }
                StepOutcome::SandboxError { error } => {
                    if self.record_failure(ctx, error) {
                        return best_effort_answer(ctx);
                    }
                }
            }
        }

        warn!(max_steps = self.strategy.max_steps, "Step budget exhausted");
        ctx.terminate(Termination::BudgetExhausted(ExhaustionReason::StepBudget));
        best_effort_answer(ctx)
    }

    /// Planner calls for one iteration; an invalid plan is re-requested up
    /// to `max_plan_attempts` times in total.
    async fn plan(
        &self,
        perception: &PerceptionResult,
        catalog: &[ToolDefinition],
        input: &str,
        earlier_results: &[String],
        step: usize,
    ) -> Result<ValidatedPlan, PlanError> {
        let attempts = self.strategy.max_plan_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match self
                .planner
                .plan(perception, catalog, input, earlier_results, step, self.strategy.max_steps)
                .await
            {
                Ok(plan) => return Ok(plan),
                Err(e @ PlanError::Invalid { .. }) => {
                    debug!(step, attempt, "Re-planning after invalid plan");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or(PlanError::Invalid {
            reason: "no planner attempts allowed".into(),
        }))
    }

    /// Count a failed iteration. Returns true when the run must stop.
    fn record_failure(&self, ctx: &mut AgentContext, error: String) -> bool {
        ctx.consecutive_failures += 1;
        warn!(
            step = ctx.step_index + 1,
            failures = ctx.consecutive_failures,
            error = %error,
            "Iteration failed"
        );
        ctx.last_error = Some(error);

        if ctx.consecutive_failures >= self.strategy.max_consecutive_failures {
            ctx.terminate(Termination::BudgetExhausted(ExhaustionReason::RepeatedFailures));
            return true;
        }
        false
    }

    /// A free-text LLM call whose reply is the answer.
    async fn ask(&self, stage: &str, prompt: String) -> Result<String, String> {
        let request = TextRequest::new(stage, prompt);
        let response = tokio::time::timeout(self.strategy.llm_timeout(), self.provider.generate(request))
            .await
            .map_err(|_| format!("{stage} call timed out"))?
            .map_err(|e| e.to_string())?;

        let answer = prompts::strip_final_marker(&response.text);
        if answer.is_empty() {
            return Err(format!("{stage} call returned an empty answer"));
        }
        Ok(answer)
    }

    async fn finish(&self, ctx: AgentContext, answer: String) -> RunReport {
        let termination = ctx.termination.unwrap_or(Termination::Final);
        let partial = termination.is_partial();
        let steps = ctx.step_index;
        let executions = ctx.plans_executed;
        let route = ctx.route;
        let session_id = ctx.session_id.clone();

        let mut record = ConversationRecord::new(session_id.clone(), ctx.user_input(), answer.clone());
        record.tool_calls = ctx.ledger.into_calls();
        record.partial = partial;
        record.route = route;

        let tool_calls = record.tool_calls.clone();
        let record_id = record.id.clone();
        let record_id = self.memory.index(record).await.then_some(record_id);

        self.event_bus.publish(DomainEvent::RunFinished {
            session_id: session_id.to_string(),
            termination: termination.to_string(),
            partial,
            steps,
            tool_calls: tool_calls.len(),
            timestamp: Utc::now(),
        });
        info!(
            session_id = %session_id,
            %termination,
            route = %route,
            tool_calls = tool_calls.len(),
            "Query finished"
        );

        RunReport {
            answer,
            termination,
            partial,
            warning: partial.then(|| format!("the answer is incomplete: run ended with {termination}")),
            route,
            steps,
            executions,
            tool_calls,
            record_id,
        }
    }
}

/// The answer given when a run stops without a final answer. Never empty.
fn best_effort_answer(ctx: &AgentContext) -> String {
    let reason = match ctx.termination {
        Some(Termination::BudgetExhausted(reason)) => reason.to_string(),
        Some(Termination::Cancelled) => "cancelled".to_string(),
        _ => "stopped".to_string(),
    };

    let mut answer = format!("I could not fully complete this request ({reason}).");
    if let Some(payload) = &ctx.last_payload {
        answer.push_str("\n\nPartial results so far:\n");
        answer.push_str(&prompts::truncate_payload(payload, 2000));
    } else if let Some(error) = &ctx.last_error {
        answer.push_str("\n\nLast error: ");
        answer.push_str(error);
    }
    let successful = ctx.ledger.calls().iter().filter(|c| c.success).count();
    if successful > 0 {
        answer.push_str(&format!("\n\n{successful} tool call(s) completed before stopping."));
    }
    answer
}

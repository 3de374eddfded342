//! End-to-end scenarios for the agent loop.
//!
//! Every collaborator is scripted: the provider answers per pipeline stage,
//! the embedder matches keywords, and the sandbox plays back tool calls
//! instead of running Python (except in the fenced-code scenario, which
//! uses the real interpreter when one is installed).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cortex_agent::prompts::stage;
use cortex_agent::{
    AgentLoop, ExhaustionReason, PythonRuntime, SandboxFault, SandboxRuntime, Termination, ToolBridge,
};
use cortex_config::{SandboxConfig, StrategyConfig};
use cortex_core::error::{ProviderError, ToolError};
use cortex_core::event::{DomainEvent, EventBus};
use cortex_core::memory::{ConversationRecord, ConversationStore, SessionId};
use cortex_core::provider::{Embedder, Provider, TextRequest, TextResponse};
use cortex_core::routing::RouteKind;
use cortex_core::tool::{Tool, ToolRegistry, payload_text, text_payload};
use cortex_memory::{InMemoryStore, SemanticMemory};
use tokio_util::sync::CancellationToken;

// ── Scripted collaborators ──────────────────────────────────────────────

#[derive(Default)]
struct StageProvider {
    replies: Mutex<HashMap<String, VecDeque<String>>>,
    prompts: Mutex<HashMap<String, Vec<String>>>,
}

impl StageProvider {
    fn on(self, stage: &str, replies: &[&str]) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(stage.to_string())
            .or_default()
            .extend(replies.iter().map(|r| r.to_string()));
        self
    }

    fn prompts(&self, stage: &str) -> Vec<String> {
        self.prompts.lock().unwrap().get(stage).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Provider for StageProvider {
    fn name(&self) -> &str {
        "stage_mock"
    }

    async fn generate(&self, request: TextRequest) -> Result<TextResponse, ProviderError> {
        self.prompts
            .lock()
            .unwrap()
            .entry(request.stage.clone())
            .or_default()
            .push(request.prompt);
        let next = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&request.stage)
            .and_then(|q| q.pop_front());
        next.map(|text| TextResponse {
            text,
            model: "mock".into(),
            usage: None,
        })
        .ok_or_else(|| ProviderError::ApiError {
            status_code: 500,
            message: format!("nothing scripted for {}", request.stage),
        })
    }
}

struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let lower = text.to_lowercase();
        Ok(["weather", "paris", "report", "invoice"]
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect())
    }
}

struct CountingTool {
    name: &'static str,
    reply: &'static str,
    calls: AtomicUsize,
}

impl CountingTool {
    fn new(name: &'static str, reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Searches the document store"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}}})
    }

    async fn invoke(&self, _input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text_payload(self.reply))
    }
}

#[derive(Clone)]
enum Step {
    Call(&'static str),
    Return(&'static str),
    ReturnWithLast(&'static str),
    Raise(&'static str),
    Sleep(Duration),
}

/// Plays back one script per execution, ignoring the plan's code.
#[derive(Default)]
struct PlaybackRuntime {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    codes: Mutex<Vec<String>>,
}

impl PlaybackRuntime {
    fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            codes: Mutex::new(Vec::new()),
        })
    }

    fn runs(&self) -> usize {
        self.codes.lock().unwrap().len()
    }
}

#[async_trait]
impl SandboxRuntime for PlaybackRuntime {
    fn name(&self) -> &str {
        "playback"
    }

    async fn run(&self, code: &str, bridge: &mut dyn ToolBridge) -> Result<String, SandboxFault> {
        self.codes.lock().unwrap().push(code.to_string());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let mut last = String::new();
        for step in script {
            match step {
                Step::Call(name) => match bridge.call_tool(name, serde_json::json!({"query": "x"})).await {
                    Ok(payload) => last = payload_text(&payload).unwrap_or_default(),
                    Err(f) if f.is_fatal() => return Err(SandboxFault::Aborted(f)),
                    Err(f) => return Err(SandboxFault::Raised(format!("ToolError: {f}"))),
                },
                Step::Return(value) => return Ok(value.to_string()),
                Step::ReturnWithLast(prefix) => return Ok(format!("{prefix} {last}")),
                Step::Raise(message) => return Err(SandboxFault::Raised(message.to_string())),
                Step::Sleep(d) => tokio::time::sleep(d).await,
            }
        }
        Ok("None".into())
    }
}

// ── Fixture ─────────────────────────────────────────────────────────────

const PICK_DOCS: &str = r#"{"intent": "search", "selected_servers": ["documents"]}"#;
const PLAN: &str = "```python\nasync def solve():\n    r = await mcp.call_tool('search_documents', {'query': 'x'})\n    return 'FINAL_ANSWER: ' + r.content[0].text\n```";

struct Fixture {
    agent: AgentLoop,
    provider: Arc<StageProvider>,
    store: Arc<InMemoryStore>,
    memory: Arc<SemanticMemory>,
    search: Arc<CountingTool>,
    events: Arc<EventBus>,
}

fn fixture(provider: StageProvider, runtime: Arc<dyn SandboxRuntime>, strategy: StrategyConfig) -> Fixture {
    let provider = Arc::new(provider);
    let store = Arc::new(InMemoryStore::new());
    let memory = Arc::new(SemanticMemory::new(store.clone(), Arc::new(KeywordEmbedder)));
    let search = CountingTool::new("search_documents", "search found X");
    let events = Arc::new(EventBus::new(64));

    let mut registry = ToolRegistry::new();
    registry.add_server("documents", "Search and read stored documents");
    registry.register("documents", search.clone());

    let agent = AgentLoop::new(provider.clone(), memory.clone(), Arc::new(registry), runtime, events.clone())
        .with_strategy(strategy);

    Fixture {
        agent,
        provider,
        store,
        memory,
        search,
        events,
    }
}

fn session() -> SessionId {
    SessionId::from("test-session")
}

// ── Routing ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn no_history_takes_fresh_approach() {
    let provider = StageProvider::default()
        .on(stage::PERCEPTION, &[PICK_DOCS])
        .on(stage::PLANNER, &[PLAN]);
    let runtime = PlaybackRuntime::new(vec![vec![Step::Call("search_documents"), Step::ReturnWithLast("FINAL_ANSWER:")]]);
    let f = fixture(provider, runtime, StrategyConfig::default());
    let mut rx = f.events.subscribe();

    let report = f.agent.run("find the invoice", &session()).await;

    assert_eq!(report.route, RouteKind::FreshApproach);
    assert_eq!(report.answer, "search found X");
    assert!(f.provider.prompts(stage::ROUTER).is_empty());
    let first = rx.recv().await.unwrap();
    assert!(matches!(
        first.as_ref(),
        DomainEvent::RouteSelected { route: RouteKind::FreshApproach, candidates: 0, .. }
    ));
}

#[tokio::test]
async fn complete_history_answers_directly_without_tools() {
    let provider = StageProvider::default().on(stage::ROUTER, &["FINAL_ANSWER: Sunny and 22C"]);
    let runtime = PlaybackRuntime::new(vec![]);
    let f = fixture(provider, runtime.clone(), StrategyConfig::default());
    f.memory
        .index(ConversationRecord::new(session(), "Weather in Paris today?", "Sunny and 22C"))
        .await;

    let report = f.agent.run("weather in paris", &session()).await;

    assert_eq!(report.route, RouteKind::DirectAnswer);
    assert_eq!(report.termination, Termination::Direct);
    assert_eq!(report.answer, "Sunny and 22C");
    assert!(report.tool_calls.is_empty());
    assert!(f.provider.prompts(stage::PERCEPTION).is_empty());
    assert!(f.provider.prompts(stage::PLANNER).is_empty());
    assert_eq!(runtime.runs(), 0);
    assert_eq!(f.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn relevant_history_is_injected_as_context() {
    let provider = StageProvider::default()
        .on(stage::ROUTER, &["HAS_CONTEXT: We previously found the Paris weather report"])
        .on(stage::PERCEPTION, &[PICK_DOCS])
        .on(stage::PLANNER, &[PLAN]);
    let runtime = PlaybackRuntime::new(vec![vec![Step::Call("search_documents"), Step::ReturnWithLast("FINAL_ANSWER:")]]);
    let f = fixture(provider, runtime, StrategyConfig::default());
    f.memory
        .index(ConversationRecord::new(session(), "Paris weather report?", "It rained"))
        .await;

    let report = f.agent.run("weather report for paris tomorrow", &session()).await;

    assert_eq!(report.route, RouteKind::ContextAware);
    let perception_prompt = &f.provider.prompts(stage::PERCEPTION)[0];
    assert!(perception_prompt.contains("Previous Q: Paris weather report?"));
    assert!(perception_prompt.contains("weather report for paris tomorrow"));
}

// ── Continuation ────────────────────────────────────────────────────────

#[tokio::test]
async fn history_survives_continuation() {
    let provider = StageProvider::default()
        .on(stage::ROUTER, &["HAS_CONTEXT: We previously found the Paris weather report"])
        .on(stage::PERCEPTION, &[PICK_DOCS, PICK_DOCS])
        .on(stage::PLANNER, &[PLAN, PLAN]);
    let runtime = PlaybackRuntime::new(vec![
        vec![Step::Call("search_documents"), Step::ReturnWithLast("FURTHER_PROCESSING_REQUIRED:")],
        vec![Step::Return("FINAL_ANSWER: Rain again")],
    ]);
    let f = fixture(provider, runtime, StrategyConfig::default());
    f.memory
        .index(ConversationRecord::new(session(), "Paris weather report?", "It rained"))
        .await;

    let report = f.agent.run("weather report for paris tomorrow", &session()).await;

    assert_eq!(report.route, RouteKind::ContextAware);
    assert_eq!(report.answer, "Rain again");
    let planner_prompts = f.provider.prompts(stage::PLANNER);
    assert_eq!(planner_prompts.len(), 2);
    assert!(planner_prompts[0].contains("Previous Q: Paris weather report?"));
    assert!(planner_prompts[1].contains("Previous Q: Paris weather report?"));
    assert!(planner_prompts[1].contains("search found X"));
    assert!(f.provider.prompts(stage::PERCEPTION)[1].contains("Previous Q: Paris weather report?"));
}

#[tokio::test]
async fn continuation_payload_reaches_next_step() {
    let provider = StageProvider::default()
        .on(stage::PERCEPTION, &[PICK_DOCS, PICK_DOCS])
        .on(stage::PLANNER, &[PLAN, PLAN]);
    let runtime = PlaybackRuntime::new(vec![
        vec![Step::Call("search_documents"), Step::ReturnWithLast("FURTHER_PROCESSING_REQUIRED:")],
        vec![Step::Return("FINAL_ANSWER: The report is about X")],
    ]);
    let f = fixture(provider, runtime, StrategyConfig::default());

    let report = f.agent.run("summarize the report", &session()).await;

    assert_eq!(report.termination, Termination::Final);
    assert_eq!(report.answer, "The report is about X");
    assert_eq!(report.steps, 1);
    assert_eq!(report.tool_calls.len(), 1);

    let planner_prompts = f.provider.prompts(stage::PLANNER);
    assert!(!planner_prompts[0].contains("search found X"));
    assert!(planner_prompts[1].contains("search found X"));
    assert!(planner_prompts[1].contains("Original user task: summarize the report"));
}

// ── Budgets ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn call_beyond_tool_budget_is_refused() {
    let provider = StageProvider::default()
        .on(stage::PERCEPTION, &[PICK_DOCS])
        .on(stage::PLANNER, &[PLAN]);
    let runtime = PlaybackRuntime::new(vec![vec![
        Step::Call("search_documents"),
        Step::Call("search_documents"),
        Step::Call("search_documents"),
        Step::Return("FINAL_ANSWER: too many"),
    ]]);
    let strategy = StrategyConfig {
        tool_call_budget: 2,
        ..StrategyConfig::default()
    };
    let f = fixture(provider, runtime, strategy);

    let report = f.agent.run("find the invoice", &session()).await;

    assert_eq!(report.termination, Termination::BudgetExhausted(ExhaustionReason::ToolBudget));
    assert!(report.partial);
    assert_eq!(f.search.calls(), 2);
    assert_eq!(report.tool_calls.len(), 2);
    assert!(report.tool_calls.iter().all(|c| c.success));
}

#[tokio::test]
async fn step_budget_yields_non_empty_best_effort_answer() {
    let perceptions = [PICK_DOCS; 5];
    let plans = [PLAN; 5];
    let provider = StageProvider::default()
        .on(stage::PERCEPTION, &perceptions)
        .on(stage::PLANNER, &plans);
    let scripts = (0..5)
        .map(|_| vec![Step::Call("search_documents"), Step::ReturnWithLast("FURTHER_PROCESSING_REQUIRED:")])
        .collect();
    let strategy = StrategyConfig {
        max_steps: 5,
        direct_analysis_after: 0,
        ..StrategyConfig::default()
    };
    let f = fixture(provider, PlaybackRuntime::new(scripts), strategy);

    let report = f.agent.run("summarize every report", &session()).await;

    assert_eq!(report.termination, Termination::BudgetExhausted(ExhaustionReason::StepBudget));
    assert_eq!(report.steps, 5);
    assert!(!report.answer.trim().is_empty());
    assert!(report.answer.contains("search found X"));
    assert!(report.warning.is_some());
}

#[tokio::test]
async fn repeated_failures_stop_at_threshold() {
    let perceptions = [PICK_DOCS; 6];
    let plans = [PLAN; 6];
    let provider = StageProvider::default()
        .on(stage::PERCEPTION, &perceptions)
        .on(stage::PLANNER, &plans);
    let scripts = (0..6).map(|_| vec![Step::Raise("ValueError: bad data")]).collect();
    let runtime = PlaybackRuntime::new(scripts);
    let strategy = StrategyConfig {
        max_steps: 5,
        max_consecutive_failures: 2,
        ..StrategyConfig::default()
    };
    let f = fixture(provider, runtime.clone(), strategy);

    let report = f.agent.run("find the invoice", &session()).await;

    assert_eq!(report.termination, Termination::BudgetExhausted(ExhaustionReason::RepeatedFailures));
    assert_eq!(report.executions, 2);
    assert_eq!(runtime.runs(), 2);
    assert!(report.answer.contains("ValueError"));
}

#[tokio::test]
async fn bare_final_marker_is_not_an_answer() {
    let provider = StageProvider::default()
        .on(stage::PERCEPTION, &[PICK_DOCS, PICK_DOCS])
        .on(stage::PLANNER, &[PLAN, PLAN]);
    let scripts = (0..2).map(|_| vec![Step::Return("FINAL_ANSWER:")]).collect();
    let f = fixture(provider, PlaybackRuntime::new(scripts), StrategyConfig::default());

    let report = f.agent.run("find the invoice", &session()).await;

    assert_eq!(report.termination, Termination::BudgetExhausted(ExhaustionReason::RepeatedFailures));
    assert!(report.partial);
    assert!(report.warning.is_some());
    assert!(report.answer.contains("empty final answer"));

    let records = f.store.recent(10).await.unwrap();
    assert!(records[0].partial);
    assert!(!records[0].final_answer.is_empty());
}

// ── Concurrency ─────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_runs_keep_separate_ledgers() {
    let provider = StageProvider::default()
        .on(stage::PERCEPTION, &[PICK_DOCS, PICK_DOCS])
        .on(stage::PLANNER, &[PLAN, PLAN]);
    let script = vec![
        Step::Call("search_documents"),
        Step::Sleep(Duration::from_millis(50)),
        Step::ReturnWithLast("FINAL_ANSWER:"),
    ];
    let runtime = PlaybackRuntime::new(vec![script.clone(), script]);
    let f = fixture(provider, runtime.clone(), StrategyConfig::default());

    let first_session = SessionId::from("first");
    let second_session = SessionId::from("second");
    let (first, second) = tokio::join!(
        f.agent.run("find the invoice", &first_session),
        f.agent.run("find the weather report", &second_session),
    );

    for report in [&first, &second] {
        assert_eq!(report.termination, Termination::Final);
        assert_eq!(report.answer, "search found X");
        assert_eq!(report.tool_calls.len(), 1);
        assert_eq!(report.tool_calls[0].sequence, 0);
    }
    assert_eq!(runtime.runs(), 2);
    assert_eq!(f.search.calls(), 2);

    let records = f.store.recent(10).await.unwrap();
    assert_eq!(records.len(), 2);
    for session in [&first_session, &second_session] {
        let mine: Vec<_> = records.iter().filter(|r| &r.session_id == session).collect();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].tool_calls.len(), 1);
    }
}

// ── Extraction into execution ───────────────────────────────────────────

const FENCED_REPLY: &str = "Here is my plan.\n```python\nasync def solve():\n    return 'FINAL_ANSWER: 7'\n```\nIt returns seven.";

#[tokio::test]
async fn fenced_plan_reaches_sandbox_as_bare_code() {
    let provider = StageProvider::default()
        .on(stage::PERCEPTION, &[PICK_DOCS])
        .on(stage::PLANNER, &[FENCED_REPLY]);
    let runtime = PlaybackRuntime::new(vec![vec![Step::Return("FINAL_ANSWER: 7")]]);
    let f = fixture(provider, runtime.clone(), StrategyConfig::default());

    let report = f.agent.run("what is 3 + 4", &session()).await;

    assert_eq!(report.answer, "7");
    assert_eq!(
        runtime.codes.lock().unwrap()[0],
        "async def solve():\n    return 'FINAL_ANSWER: 7'"
    );
}

#[tokio::test]
async fn fenced_plan_runs_in_python() {
    let python = std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success());
    if !python {
        return;
    }

    let provider = StageProvider::default()
        .on(stage::PERCEPTION, &[PICK_DOCS])
        .on(stage::PLANNER, &[FENCED_REPLY]);
    let runtime = Arc::new(PythonRuntime::from_config(&SandboxConfig::default()));
    let f = fixture(provider, runtime, StrategyConfig::default());

    let report = f.agent.run("what is 3 + 4", &session()).await;

    assert_eq!(report.termination, Termination::Final);
    assert_eq!(report.answer, "7");
}

// ── Cancellation ────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_run_persists_partial_record() {
    let provider = StageProvider::default()
        .on(stage::PERCEPTION, &[PICK_DOCS])
        .on(stage::PLANNER, &[PLAN]);
    let runtime = PlaybackRuntime::new(vec![vec![
        Step::Call("search_documents"),
        Step::Sleep(Duration::from_secs(30)),
        Step::Return("FINAL_ANSWER: never"),
    ]]);
    let f = fixture(provider, runtime, StrategyConfig::default());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let report = f.agent.run_with_cancel("find the invoice", &session(), cancel).await;

    assert_eq!(report.termination, Termination::Cancelled);
    assert!(report.partial);
    assert_eq!(report.tool_calls.len(), 1);

    let records = f.store.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].partial);
    assert_eq!(records[0].tool_names(), vec!["search_documents"]);
}

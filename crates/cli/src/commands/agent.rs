//! `cortex agent` — Interactive or single-message mode.

use cortex_agent::{AgentLoop, PythonRuntime, RunReport};
use cortex_config::AppConfig;
use cortex_core::event::{DomainEvent, EventBus};
use cortex_core::memory::SessionId;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn build_agent(config: &AppConfig, events: Arc<EventBus>) -> Result<(AgentLoop, usize), Box<dyn std::error::Error>> {
    let provider = super::provider(config)?;
    let memory = super::semantic_memory(config, provider.clone(), Some(events.clone()))?;
    let tools = Arc::new(cortex_tools::build_registry(config, memory.clone()));
    let tool_count = tools.len();
    let runtime = Arc::new(PythonRuntime::from_config(&config.sandbox));

    let agent = AgentLoop::new(provider, memory, tools, runtime, events)
        .with_strategy(config.strategy.clone())
        .with_router_config(config.router.clone());
    debug!(tools = tool_count, memory = %config.memory.backend, model = %config.provider.model, "Agent assembled");
    Ok((agent, tool_count))
}

/// Print loop events to stderr as they happen.
fn spawn_event_printer(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event.as_ref() {
                DomainEvent::RouteSelected { route, candidates, .. } => {
                    eprintln!("  [route] {route} ({candidates} similar conversation(s))");
                }
                DomainEvent::StepCompleted { step, outcome, tool_calls_so_far, .. } => {
                    eprintln!("  [step {step}] {outcome}, {tool_calls_so_far} tool call(s) so far");
                }
                DomainEvent::ToolExecuted { tool_name, success, duration_ms, .. } => {
                    let status = if *success { "ok" } else { "failed" };
                    eprintln!("  [tool] {tool_name} {status} in {duration_ms}ms");
                }
                DomainEvent::RunFinished { termination, steps, tool_calls, .. } => {
                    eprintln!("  [done] {termination} after {steps} step(s), {tool_calls} tool call(s)");
                }
                DomainEvent::MemoryAccessed { .. } => {}
                DomainEvent::ErrorOccurred { context, error_message, .. } => {
                    eprintln!("  [error] {context}: {error_message}");
                }
            }
        }
    });
}

/// Run one query; Ctrl-C cancels it instead of killing the process.
async fn ask(agent: &AgentLoop, query: &str, session: &SessionId) -> RunReport {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let report = agent.run_with_cancel(query, session, cancel).await;
    watcher.abort();
    report
}

fn print_report(report: &RunReport, prefix: &str) {
    for line in report.answer.lines() {
        println!("{prefix}{line}");
    }
    if let Some(warning) = &report.warning {
        eprintln!();
        eprintln!("  [warning] {warning}");
    }
}

pub async fn run(message: Option<String>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let events = Arc::new(EventBus::default());
    let (agent, tool_count) = build_agent(&config, events.clone())?;

    if verbose {
        spawn_event_printer(&events);
    }

    if let Some(msg) = message {
        let report = ask(&agent, &msg, &SessionId::new()).await;
        print_report(&report, "");
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║          Cortex Agent — Interactive Mode     ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Provider:  {}", config.provider.name);
    println!("  Model:     {}", config.provider.model);
    println!("  Tools:     {tool_count}");
    println!("  Memory:    {}", config.memory.backend);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'new' to start a new session, 'exit' to quit.");
    println!("  Ctrl+C cancels a running request.");
    println!();

    let mut session = SessionId::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "new" => {
                session = SessionId::new();
                println!("  Started session {session}");
                println!();
                continue;
            }
            _ => {}
        }

        eprint!("  ...");
        let report = ask(&agent, input, &session).await;
        eprint!("\r     \r");
        println!();
        print_report(&report, "  Cortex > ");
        println!();
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

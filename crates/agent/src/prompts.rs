//! Prompt builders for every LLM call the loop makes.
//!
//! Prompt wording is deliberately plain; model output is never trusted and
//! is always parsed by the calling stage.

use crate::perception::PerceptionResult;
use cortex_core::outcome::{CONTINUE_MARKER, FINAL_MARKER};
use cortex_core::tool::{ToolCall, ToolDefinition, ToolServerInfo, payload_text};

/// Stage names attached to provider requests (logs and test scripting).
pub mod stage {
    pub const ROUTER: &str = "router";
    pub const PERCEPTION: &str = "perception";
    pub const PLANNER: &str = "planner";
    pub const DIRECT_ANSWER: &str = "direct_answer";
    pub const ANALYSIS: &str = "analysis";
}

/// Cut `text` to at most `max_chars` characters, noting how much was dropped.
pub fn truncate_payload(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n\n[Content truncated - showing first {max_chars} characters of {total} total]")
}

/// One line per successful call, for reuse by later plans in the same run.
pub fn tool_results(calls: &[ToolCall], max_chars: usize) -> Vec<String> {
    calls
        .iter()
        .filter(|c| c.success)
        .filter_map(|c| {
            let output = c.output.as_ref()?;
            let text = payload_text(output).unwrap_or_else(|| output.to_string());
            Some(format!("{} -> {}", c.tool_name, truncate_payload(&text, max_chars)))
        })
        .collect()
}

pub fn perception(servers: &[&ToolServerInfo], input: &str) -> String {
    let server_list: Vec<String> = servers
        .iter()
        .map(|s| {
            let desc = if s.description.is_empty() { "No description available" } else { &s.description };
            format!("- {}: {}", s.id, desc)
        })
        .collect();

    format!(
        r#"Analyze the user's request and decide which tool servers can help.

Available servers:
{servers}

User request:
{input}

Respond with a single JSON object and nothing else:
{{"intent": "...", "entities": ["..."], "tool_hint": "... or null", "tags": ["..."], "selected_servers": ["server_id", ...]}}

Select an empty list of servers when the request needs no tools (greetings, general knowledge)."#,
        servers = server_list.join("\n"),
    )
}

pub fn planner(
    perception: &PerceptionResult,
    tools: &[ToolDefinition],
    input: &str,
    earlier_results: &[String],
    step: usize,
    max_steps: usize,
) -> String {
    let tool_list: Vec<String> = tools
        .iter()
        .map(|t| format!("- {}: {}\n  input schema: {}", t.name, t.description, t.parameters))
        .collect();
    let tool_text = if tool_list.is_empty() {
        "(no tools available)".to_string()
    } else {
        tool_list.join("\n")
    };
    let earlier = if earlier_results.is_empty() {
        String::new()
    } else {
        format!(
            "\nResults already gathered in this run (reuse them instead of calling the tool again):\n{}\n",
            earlier_results.join("\n")
        )
    };

    format!(
        r#"You write one step of Python that solves the user's task. This is step {step} of at most {max_steps}.

Task:
{input}

Intent: {intent}
Entities: {entities}
Tool hint: {hint}
{earlier}
Tools (call as `await mcp.call_tool("name", {{...input...}})`; results expose `.content[0].text`):
{tool_text}

Rules:
- Define exactly one function `async def solve():` taking no required arguments.
- Only import from the standard data modules (json, re, math, datetime, ...).
- Return a string starting with `{final}` followed by the answer when the task is done.
- Return a string starting with `{cont}` followed by the raw tool output when it still has to be analysed.
- Reply with the code in a single ```python block."#,
        intent = perception.intent,
        entities = perception.entities.join(", "),
        hint = perception.tool_hint.as_deref().unwrap_or("none"),
        final = FINAL_MARKER,
        cont = CONTINUE_MARKER,
    )
}

pub fn judge(query: &str, history: &str) -> String {
    format!(
        r#"Decide whether the user's question can be answered from earlier conversations, without tools.

User's current question: "{query}"

Previous conversations:
{history}

Respond with exactly one of:
FINAL_ANSWER: <complete answer>      (only if the history answers the question completely and accurately)
HAS_CONTEXT: <short summary>         (if the history is relevant but incomplete)
NO_CONTEXT                           (if the history is unrelated)"#
    )
}

/// The input given to the loop when history is relevant but incomplete.
pub fn context_override(context_text: &str, query: &str) -> String {
    format!("{query}\n\nRelevant context from previous conversations:\n{context_text}\n\nUse this context to inform your tool selection and search strategy.")
}

/// The input given to the next step after a continuation. Always embeds
/// the payload verbatim, and the router's history when there is any.
pub fn continuation(original: &str, payload: &str, history: Option<&str>) -> String {
    let mut text = format!("Original user task: {original}\n\n");
    if let Some(history) = history {
        text.push_str(&format!("Relevant context from previous conversations:\n{history}\n\n"));
    }
    text.push_str(&format!(
        "Your last tool produced this result:\n\n\
         {payload}\n\n\
         Analyze the content above and return {FINAL_MARKER} with the answer. \
         Do not call any tools again for content that is already provided."
    ));
    text
}

pub fn direct_answer(input: &str) -> String {
    format!(
        r#"The user asked: "{input}"

This request needs no tools. Give a helpful, concise answer. If it is a greeting, respond warmly.

Respond with {FINAL_MARKER} <your answer>"#
    )
}

pub fn analysis(original: &str, payload: &str, max_chars: usize) -> String {
    format!(
        r#"Analyze the following content and answer the user's task.

Original user task: {original}

Content to analyze:
{content}

If the user asked for a summary or explanation, summarize comprehensively. If they asked a specific question, answer it from the content.

Respond with {FINAL_MARKER} <your analysis and answer>"#,
        content = truncate_payload(payload, max_chars),
    )
}

/// Strip an optional `FINAL_ANSWER:` prefix from free-form model output.
pub fn strip_final_marker(text: &str) -> String {
    let text = text.trim();
    text.strip_prefix(FINAL_MARKER).unwrap_or(text).trim().to_string()
}

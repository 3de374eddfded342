//! `cortex memory` — Inspect stored conversations.

use cortex_core::memory::{ConversationRecord, ConversationStore};

fn preview(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{cut}…")
}

fn print_record(index: usize, record: &ConversationRecord, score: Option<f32>) {
    let score = score.map(|s| format!("[score: {s:.2}] ")).unwrap_or_default();
    let partial = if record.partial { " (partial)" } else { "" };
    println!(
        "  {index:>2}. {score}{} {}{partial}",
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.route,
    );
    println!("      Q: {}", preview(&record.query, 80));
    println!("      A: {}", preview(&record.final_answer, 80));
    if !record.tool_calls.is_empty() {
        println!("      tools: {}", record.tool_names().join(", "));
    }
}

pub async fn list(limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let store = cortex_memory::open_store(&config.memory)?;

    let records = store.recent(limit).await?;
    if records.is_empty() {
        println!("  No conversations stored yet.");
        return Ok(());
    }
    for (i, record) in records.iter().enumerate() {
        print_record(i + 1, record, None);
    }
    Ok(())
}

pub async fn search(query: &str, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let provider = super::provider(&config)?;
    let memory = super::semantic_memory(&config, provider, None)?;

    println!("  Searching conversations for: \"{query}\"");
    println!();

    let results = memory.query_similar(query, limit).await;
    if results.is_empty() {
        println!("  No similar conversations found.");
    }
    for (i, scored) in results.iter().enumerate() {
        print_record(i + 1, &scored.record, Some(scored.similarity));
    }
    Ok(())
}

pub async fn count() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let store = cortex_memory::open_store(&config.memory)?;
    println!("  Backend:        {}", store.name());
    if config.memory.backend == "file" {
        println!("  Directory:      {}", config.memory.resolved_dir().display());
    }
    println!("  Conversations:  {}", store.count().await?);
    Ok(())
}

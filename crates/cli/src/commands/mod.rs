pub mod agent;
pub mod config_cmd;
pub mod memory;

use cortex_config::AppConfig;
use cortex_core::event::EventBus;
use cortex_memory::SemanticMemory;
use cortex_providers::OpenAiCompatProvider;
use std::sync::Arc;

pub(crate) fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Build the provider, printing setup help when no key is configured.
pub(crate) fn provider(config: &AppConfig) -> Result<Arc<OpenAiCompatProvider>, Box<dyn std::error::Error>> {
    match OpenAiCompatProvider::from_config(&config.provider) {
        Ok(provider) => Ok(Arc::new(provider)),
        Err(e) => {
            eprintln!();
            eprintln!("  ERROR: {e}");
            eprintln!();
            eprintln!("  Set one of these environment variables:");
            eprintln!("    CORTEX_API_KEY=sk-...     (generic)");
            eprintln!("    OPENAI_API_KEY=sk-...     (OpenAI)");
            eprintln!();
            eprintln!("  Or add api_key under [provider] in:");
            eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
            eprintln!();
            eprintln!("  A local endpoint (e.g. CORTEX_API_URL=http://localhost:11434/v1) needs no key.");
            eprintln!();
            Err("No API key found. See above for setup instructions.".into())
        }
    }
}

/// Open the configured store behind semantic memory.
pub(crate) fn semantic_memory(
    config: &AppConfig,
    provider: Arc<OpenAiCompatProvider>,
    events: Option<Arc<EventBus>>,
) -> Result<Arc<SemanticMemory>, Box<dyn std::error::Error>> {
    let store = cortex_memory::open_store(&config.memory)?;
    let memory = SemanticMemory::new(store, provider);
    Ok(Arc::new(match events {
        Some(events) => memory.with_events(events),
        None => memory,
    }))
}

//! Tool implementations for Cortex.
//!
//! Tools are what generated `solve` code can reach: the built-in memory
//! tools (historical search and the current session), plus any local command
//! declared under `[[tools]]` in the configuration.

pub mod command;
pub mod current_conversations;
pub mod historical_search;

pub use command::CommandTool;
pub use current_conversations::CurrentConversationsTool;
pub use historical_search::HistoricalSearchTool;

use cortex_config::AppConfig;
use cortex_core::tool::ToolRegistry;
use cortex_memory::SemanticMemory;
use std::sync::Arc;

/// Build the tool registry described by the configuration.
///
/// Declared servers come first so their descriptions win; the `memory`
/// server hosting the memory tools is always present.
pub fn build_registry(config: &AppConfig, memory: Arc<SemanticMemory>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    for server in &config.servers {
        registry.add_server(&server.id, &server.description);
    }

    if !config.servers.iter().any(|s| s.id == historical_search::SERVER_ID) {
        registry.add_server(
            historical_search::SERVER_ID,
            "Search past conversations and the answers given to them",
        );
    }
    registry.register(
        historical_search::SERVER_ID,
        Arc::new(HistoricalSearchTool::new(memory.clone())),
    );
    registry.register(
        historical_search::SERVER_ID,
        Arc::new(CurrentConversationsTool::new(memory)),
    );

    for tool in &config.tools {
        registry.register(&tool.server, Arc::new(CommandTool::from_config(tool)));
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_config::{CommandToolConfig, ServerConfig};
    use cortex_core::error::ProviderError;
    use cortex_core::provider::Embedder;
    use cortex_memory::InMemoryStore;

    struct ZeroEmbedder;

    #[async_trait]
    impl Embedder for ZeroEmbedder {
        fn name(&self) -> &str {
            "zero"
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![0.0])
        }
    }

    #[test]
    fn registry_contains_builtin_and_configured_tools() {
        let mut config = AppConfig::default();
        config.servers.push(ServerConfig {
            id: "documents".into(),
            description: "Local documents".into(),
        });
        config.tools.push(CommandToolConfig {
            name: "search_documents".into(),
            server: "documents".into(),
            description: "Search documents".into(),
            command: "doc-search".into(),
            args: vec![],
            parameters: None,
            timeout_secs: None,
        });

        let memory = Arc::new(SemanticMemory::new(Arc::new(InMemoryStore::new()), Arc::new(ZeroEmbedder)));
        let registry = build_registry(&config, memory);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.server_ids(), vec!["documents".to_string(), "memory".to_string()]);
        let docs = registry.definitions_for(&["documents".to_string()]);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "search_documents");
        assert!(registry.get(historical_search::TOOL_NAME).is_some());
        assert!(registry.get(current_conversations::TOOL_NAME).is_some());
        assert_eq!(registry.definitions_for(&["memory".to_string()]).len(), 2);
    }
}

//! `cortex config` — Configuration management commands.

use cortex_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("  Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();
            if !config.has_api_key() && !config.provider.api_url.contains("localhost") {
                warnings.push("No API key set (set CORTEX_API_KEY or OPENAI_API_KEY)".to_string());
            }
            if config.servers.is_empty() && config.tools.is_empty() {
                warnings.push("Only the built-in memory tools are available; declare [[tools]] to add more".to_string());
            }
            for tool in &config.tools {
                if !config.servers.iter().any(|s| s.id == tool.server) {
                    warnings.push(format!("Tool '{}' uses undeclared server '{}'", tool.name, tool.server));
                }
            }

            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Provider:  {} ({})", config.provider.name, config.provider.api_url);
            println!("   Model:     {}", config.provider.model);
            println!("   Memory:    {}", config.memory.backend);
            println!("   Sandbox:   {}", config.sandbox.interpreter);
            println!(
                "   Budgets:   {} steps, {} tool calls, {} consecutive failures",
                config.strategy.max_steps, config.strategy.tool_call_budget, config.strategy.max_consecutive_failures
            );
            println!("   Tools:     {}", config.tools.len());
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;
    if config.provider.api_key.is_some() {
        config.provider.api_key = Some("***".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn default_toml() {
    println!("{}", AppConfig::default_toml());
}

pub fn path() {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
}

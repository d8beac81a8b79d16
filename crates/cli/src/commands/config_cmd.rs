//! `stockwise config`: Configuration management commands.

use anyhow::Context;
use stockwise_config::{AppConfig, BackendConfig, CheckpointBackend};

pub fn print_default() {
    println!("{}", AppConfig::default_toml());
}

pub fn show() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load config")?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path() {
    println!("{}", config_path().display());
}

pub fn validate() -> anyhow::Result<()> {
    println!("Validating {} ...", config_path().display());

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed and validated");

    let warnings = warnings(&config);
    for w in &warnings {
        println!("   ⚠️  {w}");
    }

    println!();
    println!("   Model:        {} ({})", config.model.model(), config.model.kind());
    println!(
        "   Summary:      {} ({})",
        config.summary_model.model(),
        config.summary_model.kind()
    );
    println!("   Max steps:    {}", config.agent.max_steps);
    println!(
        "   Deadline:     {}",
        config
            .agent
            .deadline_secs
            .map_or_else(|| "none".to_string(), |s| format!("{s}s"))
    );
    println!("   Checkpoints:  {}", match config.checkpoint.backend {
        CheckpointBackend::Memory => "memory".to_string(),
        CheckpointBackend::File => config.checkpoint.resolved_directory().display().to_string(),
    });

    Ok(())
}

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

fn needs_key(backend: &BackendConfig) -> bool {
    matches!(backend, BackendConfig::Openai(_) | BackendConfig::Gemini(_))
}

/// Problems that do not fail validation but will bite at runtime.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if needs_key(&config.model) && !config.has_api_key() {
        warnings.push("No API key for [model] (set STOCKWISE_API_KEY or the provider's env var)".into());
    }
    if config.middleware.summarization.enabled
        && needs_key(&config.summary_model)
        && config.api_key_for(&config.summary_model).is_none()
    {
        warnings.push("Summarization is enabled but [summary_model] has no API key".into());
    }
    if config.agent.deadline_secs.is_none() {
        warnings.push("No [agent] deadline_secs: a turn is bounded only by max_steps".into());
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        assert!(config_path().to_str().unwrap().ends_with("config.toml"));
    }

    #[test]
    fn keyed_config_has_no_key_warnings() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-test".into());
        config.agent.deadline_secs = Some(60);
        assert!(warnings(&config).is_empty());
    }
}

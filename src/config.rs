use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Cli;

pub const DEFAULT_PIPELINE_MODEL: &str = "openrouter/x-ai/grok-4.1-fast:free";

/// Ensemble used when neither --models nor the profile names one.
pub fn default_ensemble_models() -> Vec<String> {
    vec![
        "openrouter/anthropic/claude-opus-4.5".to_string(),
        "openrouter/google/gemini-3-pro-preview".to_string(),
        "openrouter/openai/gpt-5.1".to_string(),
    ]
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub model: String,
    pub models: Vec<String>,
    pub max_iters: usize,
    pub news_rate_limit_per_minute: Option<f64>,
    pub fetch_timeout_secs: u64,
    pub page_cache_path: String,
    pub search_cache_path: String,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub model: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    pub max_iters: Option<usize>,
    pub news_rate_limit_per_minute: Option<f64>,
    pub fetch_timeout_secs: Option<u64>,
    pub page_cache_path: Option<String>,
    pub search_cache_path: Option<String>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    toml::from_str::<ProfilesFile>(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check model/cache values and field names.",
            path.display()
        )
    })
}

pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    let models = if !cli.models.is_empty() {
        cli.models.clone()
    } else if !profile.models.is_empty() {
        profile.models.clone()
    } else {
        default_ensemble_models()
    };

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        model: cli
            .model
            .clone()
            .or(profile.model)
            .unwrap_or_else(|| DEFAULT_PIPELINE_MODEL.to_string()),
        models,
        max_iters: cli.max_iters.or(profile.max_iters).unwrap_or(5).max(1),
        news_rate_limit_per_minute: cli
            .news_rate_limit
            .or(profile.news_rate_limit_per_minute)
            .or(Some(60.0))
            .filter(|rate| *rate > 0.0),
        fetch_timeout_secs: cli
            .fetch_timeout_secs
            .or(profile.fetch_timeout_secs)
            .unwrap_or(10)
            .max(1),
        page_cache_path: cli
            .page_cache_path
            .clone()
            .or(profile.page_cache_path)
            .unwrap_or_else(|| ".chronicle/wikipedia_page_cache.db".to_string()),
        search_cache_path: cli
            .search_cache_path
            .clone()
            .or(profile.search_cache_path)
            .unwrap_or_else(|| ".chronicle/wikipedia_search_cache.db".to_string()),
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| ".chronicle/telemetry/events.jsonl".to_string()),
    })
}

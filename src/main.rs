use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::level_filters::LevelFilter;

use chronicle_cli::cli::{CacheCommands, Cli, Commands, ProfileCommands, command_label};
use chronicle_cli::config::{RuntimeConfig, load_profiles, resolve_runtime_config};
use chronicle_cli::error::{categorize_error, format_cli_error};
use chronicle_cli::forecast::{ForecastInputs, gather_contexts, run_ensemble};
use chronicle_cli::gdelt::GdeltClient;
use chronicle_cli::model::{LanguageModel, OpenRouterModel, resolve_api_key};
use chronicle_cli::pipeline::{generate_timeline_to_now, write_json_report};
use chronicle_cli::telemetry::TelemetrySink;
use chronicle_cli::tools::Toolbox;
use chronicle_cli::wiki::CachedWikipedia;

const DEFAULT_TIMELINE_OUTPUT: &str = ".chronicle/reports/timeline.json";
const DEFAULT_FORECAST_OUTPUT: &str = ".chronicle/reports/forecast.json";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err));
        tracing::error!(category = %categorize_error(&err).code(), error = %err, "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;
    let telemetry = TelemetrySink::new(&cfg, command_label(&cli.command));

    match cli.command {
        Commands::Timeline {
            topic,
            until,
            output,
        } => {
            let topic = topic.join(" ");
            let until = until.unwrap_or_else(today);
            let model = open_model()?;
            let toolbox = build_toolbox(&cfg).await?;
            telemetry.emit(
                "model.resolved",
                json!({"model": cfg.model, "path": "timeline"}),
            );
            tracing::info!(model = %cfg.model, topic = %topic, until = %until, "generating timeline to now");

            let report = generate_timeline_to_now(
                model.as_ref(),
                &cfg.model,
                &toolbox,
                &topic,
                &until,
                cfg.max_iters,
                &telemetry,
            )
            .await?;

            let output = output.unwrap_or_else(|| DEFAULT_TIMELINE_OUTPUT.to_string());
            write_json_report(&output, &report)?;
            println!("{}", report.merged);
            println!("Report written to {output}");
        }
        Commands::Forecast {
            question,
            scenario,
            context_pages,
            current_date,
            output,
        } => {
            let question = question.join(" ");
            let current_date = current_date.unwrap_or_else(today);
            let model = open_model()?;
            let wiki = CachedWikipedia::open(&cfg.page_cache_path, &cfg.search_cache_path).await?;
            let contexts = gather_contexts(&wiki, &context_pages).await?;
            telemetry.emit(
                "model.resolved",
                json!({"models": cfg.models, "path": "forecast"}),
            );
            tracing::info!(
                models = cfg.models.len(),
                question = %question,
                "running forecast ensemble"
            );

            let records = run_ensemble(
                model,
                &cfg.models,
                ForecastInputs {
                    scenario,
                    contexts,
                    current_date,
                    question,
                },
                &telemetry,
            )
            .await;

            let output = output.unwrap_or_else(|| DEFAULT_FORECAST_OUTPUT.to_string());
            write_json_report(&output, &records)?;
            for record in &records {
                println!(
                    "{}",
                    serde_json::to_string(record).context("failed to render rollout record")?
                );
            }
            println!("Report written to {output}");
        }
        Commands::Doctor => run_doctor(&cfg)?,
        Commands::Profiles { command } => match command {
            ProfileCommands::List => {
                let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
                if !names.contains(&"default".to_string()) {
                    names.push("default".to_string());
                }
                names.sort();
                for name in names {
                    let marker = if name == cfg.profile { " (active)" } else { "" };
                    println!("{name}{marker}");
                }
            }
            ProfileCommands::Show => run_profiles_show(&cfg),
        },
        Commands::Cache { command } => match command {
            CacheCommands::Clear => {
                let wiki =
                    CachedWikipedia::open(&cfg.page_cache_path, &cfg.search_cache_path).await?;
                let removed = wiki.clear().await?;
                telemetry.emit("cache.cleared", json!({"removed": removed}));
                println!("Removed {removed} cached document entries.");
            }
        },
    }

    Ok(())
}

fn open_model() -> Result<Arc<dyn LanguageModel>> {
    Ok(Arc::new(OpenRouterModel::new(resolve_api_key()?)))
}

async fn build_toolbox(cfg: &RuntimeConfig) -> Result<Toolbox> {
    let wiki = CachedWikipedia::open(&cfg.page_cache_path, &cfg.search_cache_path).await?;
    let news = GdeltClient::new(cfg.news_rate_limit_per_minute);
    Ok(Toolbox::new(
        wiki,
        news,
        Duration::from_secs(cfg.fetch_timeout_secs),
    ))
}

fn run_doctor(cfg: &RuntimeConfig) -> Result<()> {
    let key_present = std::env::var("OPENROUTER_API_KEY")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    println!(
        "OPENROUTER_API_KEY: {}",
        if key_present { "present" } else { "missing" }
    );
    println!("Pipeline model: {}", cfg.model);
    println!("Ensemble models: {}", cfg.models.join(", "));
    println!("Page cache: {}", cfg.page_cache_path);
    println!("Search cache: {}", cfg.search_cache_path);
    println!(
        "News rate limit: {}",
        cfg.news_rate_limit_per_minute
            .map(|rate| format!("{rate} requests/minute"))
            .unwrap_or_else(|| "disabled".to_string())
    );

    if !key_present {
        return Err(anyhow::anyhow!(
            "OPENROUTER_API_KEY is not set; model calls will fail"
        ));
    }
    Ok(())
}

fn run_profiles_show(cfg: &RuntimeConfig) {
    println!("profile = {}", cfg.profile);
    println!("config_path = {}", cfg.config_path);
    println!("model = {}", cfg.model);
    println!("models = [{}]", cfg.models.join(", "));
    println!("max_iters = {}", cfg.max_iters);
    println!(
        "news_rate_limit_per_minute = {}",
        cfg.news_rate_limit_per_minute
            .map(|rate| rate.to_string())
            .unwrap_or_else(|| "disabled".to_string())
    );
    println!("fetch_timeout_secs = {}", cfg.fetch_timeout_secs);
    println!("page_cache_path = {}", cfg.page_cache_path);
    println!("search_cache_path = {}", cfg.search_cache_path);
    println!("telemetry_enabled = {}", cfg.telemetry_enabled);
    println!("telemetry_path = {}", cfg.telemetry_path);
}

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let level = log_filter
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(log_filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

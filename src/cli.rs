use clap::{Parser, Subcommand};

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "List configured profiles and highlight the active profile")]
    List,
    #[command(about = "Show the active profile's resolved runtime settings")]
    Show,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommands {
    #[command(about = "Empty the durable Wikipedia page/search caches")]
    Clear,
}

const CLI_EXAMPLES: &str = "Examples:\n\
  chronicle-cli timeline \"Russia/Ukraine conflict\" --until 2025-12-02\n\
  chronicle-cli timeline \"Red Sea shipping disruption\" --output reports/red-sea.json\n\
  chronicle-cli --model openrouter/x-ai/grok-4.1-fast:free timeline \"EU AI Act rollout\"\n\
  chronicle-cli forecast \"Russia x Ukraine ceasefire by end of 2026?\" \\\n\
      --scenario \"Russia/Ukraine conflict\" \\\n\
      --context-page \"Peace negotiations in the Russo-Ukrainian war (2022-present)\"\n\
  chronicle-cli --models openrouter/openai/gpt-5.1 --models openrouter/google/gemini-3-pro-preview \\\n\
      forecast \"ceasefire by end of 2026?\" --scenario \"Russia/Ukraine conflict\"\n\
  chronicle-cli doctor\n\
  chronicle-cli profiles show\n\
  chronicle-cli cache clear\n\
\n\
Switching behavior:\n\
  - Use --model to pick the research/pipeline model per invocation.\n\
  - Use repeated --models flags (or a profile) to set the forecast ensemble.\n\
  - Use --profile <name> with .chronicle/config.toml for persistent settings.";

#[derive(Debug, Parser)]
#[command(name = "chronicle-cli")]
#[command(about = "Evidence-gathering timeline generator and ensemble forecaster")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "CHRONICLE_MODEL")]
    pub model: Option<String>,

    #[arg(long = "models", env = "CHRONICLE_MODELS", value_delimiter = ',')]
    pub models: Vec<String>,

    #[arg(long, env = "CHRONICLE_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "CHRONICLE_CONFIG", default_value = ".chronicle/config.toml")]
    pub config_path: String,

    #[arg(long, env = "CHRONICLE_MAX_ITERS")]
    pub max_iters: Option<usize>,

    #[arg(long, env = "CHRONICLE_NEWS_RATE_LIMIT")]
    pub news_rate_limit: Option<f64>,

    #[arg(long, env = "CHRONICLE_FETCH_TIMEOUT_SECS")]
    pub fetch_timeout_secs: Option<u64>,

    #[arg(long, env = "CHRONICLE_PAGE_CACHE_PATH")]
    pub page_cache_path: Option<String>,

    #[arg(long, env = "CHRONICLE_SEARCH_CACHE_PATH")]
    pub search_cache_path: Option<String>,

    #[arg(long, env = "CHRONICLE_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "CHRONICLE_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "error")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Research a topic and produce a merged timeline-to-now report")]
    Timeline {
        #[arg(required = true)]
        topic: Vec<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        output: Option<String>,
    },
    #[command(about = "Run the multi-model forecast ensemble for a yes/no question")]
    Forecast {
        #[arg(required = true)]
        question: Vec<String>,
        #[arg(long)]
        scenario: String,
        #[arg(long = "context-page")]
        context_pages: Vec<String>,
        #[arg(long)]
        current_date: Option<String>,
        #[arg(long)]
        output: Option<String>,
    },
    #[command(about = "Validate model credentials and cache path configuration")]
    Doctor,
    #[command(about = "Inspect profile configuration and active resolved profile state")]
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    #[command(about = "Manage the durable document caches")]
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Timeline { .. } => "timeline".to_string(),
        Commands::Forecast { .. } => "forecast".to_string(),
        Commands::Doctor => "doctor".to_string(),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => "profiles.list".to_string(),
            ProfileCommands::Show => "profiles.show".to_string(),
        },
        Commands::Cache { command } => match command {
            CacheCommands::Clear => "cache.clear".to_string(),
        },
    }
}

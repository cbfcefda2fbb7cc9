#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Model,
    Search,
    Cache,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Model => "MODEL",
            ErrorCategory::Search => "SEARCH",
            ErrorCategory::Cache => "CACHE",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Model => {
                "Set OPENROUTER_API_KEY (or pick a different --model) and retry."
            }
            ErrorCategory::Search => {
                "Check the news search window (timespan vs start/end datetimes) and query terms."
            }
            ErrorCategory::Cache => {
                "Check --page-cache-path/--search-cache-path and directory permissions."
            }
            ErrorCategory::Input => "Run chronicle-cli --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("openrouter_api_key") || msg.contains("model") || msg.contains("completion") {
        return ErrorCategory::Model;
    }

    if msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("profile")
        || msg.contains("cannot be empty")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("news search") || msg.contains("gdelt") {
        return ErrorCategory::Search;
    }

    if msg.contains("cache") || msg.contains("sqlite") {
        return ErrorCategory::Cache;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error) -> String {
    let category = categorize_error(err);
    format!("[{}] {}\nHint: {}", category.code(), err, category.hint())
}

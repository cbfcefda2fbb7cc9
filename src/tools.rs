use std::time::Duration;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

use crate::gdelt::{GdeltClient, NewsQuery};
use crate::model::ToolSpec;
use crate::webpage::fetch_webpage_content;
use crate::wiki::CachedWikipedia;

pub const GET_WIKIPEDIA_PAGE_TOOL_NAME: &str = "get_wikipedia_page";
pub const SEARCH_WIKIPEDIA_PAGES_TOOL_NAME: &str = "search_wikipedia_pages";
pub const NEWS_SEARCH_TOOL_NAME: &str = "news_search";
pub const FETCH_WEBPAGE_TOOL_NAME: &str = "fetch_webpage";
pub const THINK_TOOL_NAME: &str = "think";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetWikipediaPageArgs {
    /// Wikipedia page title to load.
    pub page_title: String,
}

fn default_n_results() -> u32 {
    10
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchWikipediaPagesArgs {
    /// Search phrase.
    pub term: String,
    /// Number of candidate titles to return.
    #[serde(default = "default_n_results")]
    pub n_results: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NewsSearchArgs {
    /// Search terms in English, joined by OR when more than one is given.
    pub queries: Vec<String>,
    /// Relative lookback window like `15min`, `4h`, `1week`, `3m` (months).
    pub timespan: Option<String>,
    /// Absolute lower bound in `YYYYMMDDHHMMSS`, within the last three months.
    pub startdatetime: Option<String>,
    /// Absolute upper bound in `YYYYMMDDHHMMSS`, pairs with startdatetime.
    pub enddatetime: Option<String>,
    /// Number of article rows; defaults to 75 and caps at 250.
    pub maxrecords: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchWebpageArgs {
    /// URL to fetch and convert to markdown.
    pub url: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThinkArgs {
    /// Reflection on research progress, findings, gaps, and next steps.
    pub reflection: String,
}

fn spec_for<T: JsonSchema>(name: &str, description: &str) -> ToolSpec {
    let parameters = serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null);
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

/// The closed toolset declared to the research loop. Fixed per invocation;
/// the loop never needs open-ended reflection, only this registry.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        spec_for::<GetWikipediaPageArgs>(
            GET_WIKIPEDIA_PAGE_TOOL_NAME,
            "Return a markdown version of a Wikipedia page by title.",
        ),
        spec_for::<SearchWikipediaPagesArgs>(
            SEARCH_WIKIPEDIA_PAGES_TOOL_NAME,
            "Search Wikipedia for page titles matching a query.",
        ),
        spec_for::<NewsSearchArgs>(
            NEWS_SEARCH_TOOL_NAME,
            "Search recent news coverage for entities or topics within a timeframe. \
             Returns one markdown bullet per article.",
        ),
        spec_for::<FetchWebpageArgs>(
            FETCH_WEBPAGE_TOOL_NAME,
            "Fetch a webpage and convert its content to markdown.",
        ),
        spec_for::<ThinkArgs>(
            THINK_TOOL_NAME,
            "Record a strategic reflection after new information arrives: what was found, \
             what is missing, and whether the timeline can be answered comprehensively yet.",
        ),
    ]
}

/// Dispatch table mapping tool name to handler. Tool failures are converted
/// to ordinary strings at this boundary; dispatch itself never errors.
pub struct Toolbox {
    wiki: CachedWikipedia,
    news: GdeltClient,
    http: reqwest::Client,
    fetch_timeout: Duration,
}

impl Toolbox {
    pub fn new(wiki: CachedWikipedia, news: GdeltClient, fetch_timeout: Duration) -> Self {
        Self {
            wiki,
            news,
            http: reqwest::Client::new(),
            fetch_timeout,
        }
    }

    pub async fn dispatch(&self, name: &str, arguments: &Value) -> String {
        match name {
            GET_WIKIPEDIA_PAGE_TOOL_NAME => match parse_args::<GetWikipediaPageArgs>(arguments) {
                Ok(args) => self
                    .wiki
                    .get_page(&args.page_title)
                    .await
                    .unwrap_or_else(|err| format!("page cache failure: {err:#}")),
                Err(err) => err,
            },
            SEARCH_WIKIPEDIA_PAGES_TOOL_NAME => {
                match parse_args::<SearchWikipediaPagesArgs>(arguments) {
                    Ok(args) => match self.wiki.search(&args.term, args.n_results).await {
                        Ok(titles) => serde_json::to_string(&titles)
                            .unwrap_or_else(|err| format!("search encoding failure: {err}")),
                        Err(err) => format!("wikipedia search failed: {err:#}"),
                    },
                    Err(err) => err,
                }
            }
            NEWS_SEARCH_TOOL_NAME => match parse_args::<NewsSearchArgs>(arguments) {
                Ok(args) => {
                    let query = NewsQuery {
                        queries: args.queries,
                        timespan: args.timespan,
                        start: args.startdatetime,
                        end: args.enddatetime,
                        max_records: args.maxrecords,
                    };
                    self.news
                        .search(query)
                        .await
                        .unwrap_or_else(|err| format!("news search failed: {err:#}"))
                }
                Err(err) => err,
            },
            FETCH_WEBPAGE_TOOL_NAME => match parse_args::<FetchWebpageArgs>(arguments) {
                Ok(args) => fetch_webpage_content(&self.http, &args.url, self.fetch_timeout).await,
                Err(err) => err,
            },
            THINK_TOOL_NAME => match parse_args::<ThinkArgs>(arguments) {
                Ok(args) => format!("Reflection recorded: {}", args.reflection),
                Err(err) => err,
            },
            unknown => format!("unknown tool '{unknown}'"),
        }
    }

    pub async fn clear_news_cache(&self) {
        self.news.clear_cache().await;
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &Value) -> Result<T, String> {
    serde_json::from_value::<T>(arguments.clone())
        .map_err(|err| format!("invalid tool arguments: {err}"))
}

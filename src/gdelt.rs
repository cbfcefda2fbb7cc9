use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const GDELT_BASE_URL: &str = "https://api.gdeltproject.org/api/v2/doc/doc";

/// Full response materials kept per cache entry so a hit reconstructs a
/// response indistinguishable from a live one.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub url: String,
}

#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn get(&self, base_url: &str, params: &BTreeMap<String, String>) -> Result<RawResponse>;
}

/// Shared reqwest client reused across calls for connection reuse.
pub struct HttpSearchTransport {
    http: reqwest::Client,
}

impl HttpSearchTransport {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpSearchTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchTransport for HttpSearchTransport {
    async fn get(&self, base_url: &str, params: &BTreeMap<String, String>) -> Result<RawResponse> {
        let response = self
            .http
            .get(base_url)
            .query(params)
            .send()
            .await
            .context("news search request to GDELT failed")?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .context("failed reading GDELT response body")?
            .to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewsQuery {
    /// Search terms, OR-combined when more than one is given.
    pub queries: Vec<String>,
    /// Relative lookback window like `15min`, `4h`, `1week`, `3m`.
    pub timespan: Option<String>,
    /// Absolute lower bound, `YYYYMMDDHHMMSS`, pairs with `end`.
    pub start: Option<String>,
    /// Absolute upper bound, `YYYYMMDDHHMMSS`, pairs with `start`.
    pub end: Option<String>,
    /// Row count for article-list mode; the API defaults to 75, caps at 250.
    pub max_records: Option<u32>,
}

/// Rate-limited, memoizing client for the GDELT DOC 2.0 API.
pub struct GdeltClient {
    transport: Box<dyn SearchTransport>,
    rate_limit_per_minute: Option<f64>,
    cache_enabled: bool,
    last_request_at: Mutex<Option<Instant>>,
    cache: Mutex<HashMap<BTreeMap<String, String>, RawResponse>>,
}

impl GdeltClient {
    pub fn new(rate_limit_per_minute: Option<f64>) -> Self {
        Self::with_transport(Box::new(HttpSearchTransport::new()), rate_limit_per_minute)
    }

    pub fn with_transport(
        transport: Box<dyn SearchTransport>,
        rate_limit_per_minute: Option<f64>,
    ) -> Self {
        Self {
            transport,
            rate_limit_per_minute: rate_limit_per_minute.filter(|rate| *rate > 0.0),
            cache_enabled: true,
            last_request_at: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    /// Execute a news search. Returns rendered markdown, the literal
    /// `"No results found"`, or an error string wrapping an unparseable body.
    /// Non-2xx responses propagate as hard failures.
    pub async fn search(&self, query: NewsQuery) -> Result<String> {
        let joined = joined_query(&query.queries)?;
        let params = build_params(&joined, &query);
        let key = normalized_key(&params);

        if self.cache_enabled
            && let Some(cached) = self.cache.lock().await.get(&key).cloned()
        {
            tracing::debug!(url = %cached.url, "news search served from cache");
            return Ok(render_response(&cached));
        }

        self.respect_rate_limit().await;
        tracing::info!(query = %joined, "news search request");
        let response = self.transport.get(GDELT_BASE_URL, &key).await?;
        if !(200..300).contains(&response.status) {
            return Err(anyhow::anyhow!(
                "news search returned HTTP {} for '{}': {}",
                response.status,
                response.url,
                String::from_utf8_lossy(&response.body).trim()
            ));
        }

        if self.cache_enabled {
            self.cache.lock().await.insert(key, response.clone());
        }
        Ok(render_response(&response))
    }

    /// Empty the in-memory response cache.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Release the underlying transport.
    pub fn close(self) {}

    async fn respect_rate_limit(&self) {
        let Some(rate) = self.rate_limit_per_minute else {
            return;
        };

        let min_interval = Duration::from_secs_f64(60.0 / rate);
        let mut last = self.last_request_at.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// OR-combine multiple query terms into one boolean query string; a single
/// term passes through verbatim. Pure function of caller input.
pub fn joined_query(queries: &[String]) -> Result<String> {
    match queries {
        [] => Err(anyhow::anyhow!(
            "news search requires at least one query term"
        )),
        [single] => Ok(single.clone()),
        many => {
            let quoted = many
                .iter()
                .map(|term| Value::String(term.clone()).to_string())
                .collect::<Vec<String>>();
            Ok(format!("({})", quoted.join(" OR ")))
        }
    }
}

/// Unset parameters are dropped before key computation, so absent vs explicit
/// default is not a stable key distinction.
pub fn build_params(joined_query: &str, query: &NewsQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("query".to_string(), joined_query.to_string()),
        ("mode".to_string(), "artlist".to_string()),
        ("format".to_string(), "json".to_string()),
        ("sort".to_string(), "hybridrel".to_string()),
    ];
    if let Some(timespan) = &query.timespan {
        params.push(("timespan".to_string(), timespan.clone()));
    }
    if let Some(start) = &query.start {
        params.push(("startdatetime".to_string(), start.clone()));
    }
    if let Some(end) = &query.end {
        params.push(("enddatetime".to_string(), end.clone()));
    }
    if let Some(max_records) = query.max_records {
        params.push(("maxrecords".to_string(), max_records.to_string()));
    }
    params
}

/// Canonical cache key: parameter names lower-cased, values stringified,
/// sorted by name. Stable under key case and insertion order.
pub fn normalized_key(params: &[(String, String)]) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect()
}

fn render_response(response: &RawResponse) -> String {
    let body = String::from_utf8_lossy(&response.body);
    let Ok(parsed) = serde_json::from_str::<Value>(&body) else {
        return format!("Error({})", body.trim());
    };

    match parsed.get("articles") {
        None => "No results found".to_string(),
        Some(articles) => match articles.as_array() {
            Some(items) => articles_to_markdown(items),
            None => format!("Error({})", body.trim()),
        },
    }
}

pub fn articles_to_markdown(items: &[Value]) -> String {
    let field = |item: &Value, name: &str| -> String {
        item.get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    items
        .iter()
        .map(|item| {
            format!(
                "- **{}**  \n  - URL: {}  \n  - Seen: {}  \n  - Domain: {}  \n  - Language: {}  \n  - Country: {}",
                field(item, "title"),
                field(item, "url"),
                field(item, "seendate"),
                field(item, "domain"),
                field(item, "language"),
                field(item, "sourcecountry"),
            )
        })
        .collect::<Vec<String>>()
        .join("\n")
}

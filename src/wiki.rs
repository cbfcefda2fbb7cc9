use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::store::KvStore;

pub const WIKIPEDIA_API_URL: &str = "https://en.wikipedia.org/w/api.php";

#[async_trait]
pub trait WikiTransport: Send + Sync {
    async fn page_html(&self, title: &str) -> Result<String>;
    async fn search_titles(&self, term: &str, n_results: u32) -> Result<Vec<String>>;
}

pub struct HttpWikiTransport {
    http: reqwest::Client,
    api_url: String,
}

impl HttpWikiTransport {
    pub fn new() -> Self {
        Self::with_api_url(WIKIPEDIA_API_URL.to_string())
    }

    pub fn with_api_url(api_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
        }
    }
}

impl Default for HttpWikiTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WikiTransport for HttpWikiTransport {
    async fn page_html(&self, title: &str) -> Result<String> {
        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("action", "parse"),
                ("page", title),
                ("prop", "text"),
                ("redirects", "1"),
                ("formatversion", "2"),
                ("format", "json"),
            ])
            .send()
            .await
            .with_context(|| format!("wikipedia page request failed for '{title}'"))?
            .error_for_status()
            .with_context(|| format!("wikipedia page request rejected for '{title}'"))?;

        let parsed = response
            .json::<Value>()
            .await
            .with_context(|| format!("wikipedia page response was not JSON for '{title}'"))?;

        if let Some(info) = parsed.pointer("/error/info").and_then(Value::as_str) {
            return Err(anyhow::anyhow!("wikipedia error for page '{title}': {info}"));
        }

        parsed
            .pointer("/parse/text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("wikipedia page '{title}' had no parse text"))
    }

    async fn search_titles(&self, term: &str, n_results: u32) -> Result<Vec<String>> {
        let limit = n_results.to_string();
        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("action", "opensearch"),
                ("search", term),
                ("limit", limit.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .with_context(|| format!("wikipedia search request failed for '{term}'"))?
            .error_for_status()
            .with_context(|| format!("wikipedia search request rejected for '{term}'"))?;

        let parsed = response
            .json::<Value>()
            .await
            .with_context(|| format!("wikipedia search response was not JSON for '{term}'"))?;

        let titles = parsed
            .get(1)
            .and_then(Value::as_array)
            .map(|titles| {
                titles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<String>>()
            })
            .ok_or_else(|| anyhow::anyhow!("wikipedia search for '{term}' had no title list"))?;
        Ok(titles)
    }
}

/// Durable memoization layer over the two read-mostly Wikipedia lookups.
/// Titles are treated as stable identifiers: cached entries never expire.
pub struct CachedWikipedia {
    transport: Box<dyn WikiTransport>,
    page_cache: KvStore,
    search_cache: KvStore,
}

impl CachedWikipedia {
    pub async fn open(page_cache_path: &str, search_cache_path: &str) -> Result<Self> {
        Ok(Self {
            transport: Box::new(HttpWikiTransport::new()),
            page_cache: KvStore::open(page_cache_path).await?,
            search_cache: KvStore::open(search_cache_path).await?,
        })
    }

    pub fn with_transport(
        transport: Box<dyn WikiTransport>,
        page_cache: KvStore,
        search_cache: KvStore,
    ) -> Self {
        Self {
            transport,
            page_cache,
            search_cache,
        }
    }

    /// Markdown rendering of a Wikipedia page by title. Fetch failures come
    /// back as ordinary text (so an agent loop can reason about them) and are
    /// not cached; only the outer `Result` carries cache-storage errors.
    pub async fn get_page(&self, title: &str) -> Result<String> {
        if let Some(cached) = self.page_cache.get(title).await? {
            return Ok(cached);
        }

        tracing::info!(title, "fetching wikipedia page");
        let html = match self.transport.page_html(title).await {
            Ok(html) => html,
            Err(err) => return Ok(format!("{err:#}")),
        };
        let markdown = match htmd::convert(&html) {
            Ok(markdown) => markdown,
            Err(err) => return Ok(format!("failed to convert page '{title}' to markdown: {err}")),
        };

        self.page_cache.put(title, &markdown).await?;
        Ok(markdown)
    }

    /// Ordered candidate page titles for a search term. The cache key carries
    /// `n_results` so a later, larger request is never satisfied by a stale
    /// truncated list.
    pub async fn search(&self, term: &str, n_results: u32) -> Result<Vec<String>> {
        let key = search_cache_key(term, n_results);
        if let Some(cached) = self.search_cache.get(&key).await? {
            return serde_json::from_str::<Vec<String>>(&cached)
                .context("corrupt cached wikipedia search entry");
        }

        tracing::info!(term, n_results, "searching wikipedia");
        let titles = self.transport.search_titles(term, n_results).await?;
        let encoded = serde_json::to_string(&titles)
            .context("failed to encode wikipedia search results")?;
        self.search_cache.put(&key, &encoded).await?;
        Ok(titles)
    }

    /// Empty both durable caches; returns the number of entries removed.
    pub async fn clear(&self) -> Result<u64> {
        Ok(self.page_cache.clear().await? + self.search_cache.clear().await?)
    }
}

pub fn search_cache_key(term: &str, n_results: u32) -> String {
    format!("{term}\u{1f}{n_results}")
}

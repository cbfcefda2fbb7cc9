use std::time::Duration;

/// Browser-like user agent; some sites refuse default client strings.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch a webpage and convert it to markdown. Every failure (timeout,
/// non-2xx, connection error, conversion error) is returned as a descriptive
/// string instead of an error, so the research loop sees it as ordinary tool
/// output.
pub async fn fetch_webpage_content(http: &reqwest::Client, url: &str, timeout: Duration) -> String {
    tracing::info!(url, "fetching webpage");
    match fetch_markdown(http, url, timeout).await {
        Ok(markdown) => markdown,
        Err(err) => {
            tracing::warn!(url, error = %err, "webpage fetch failed");
            format!("Error fetching content from {url}: {err:#}")
        }
    }
}

async fn fetch_markdown(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> anyhow::Result<String> {
    let body = http
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .timeout(timeout)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    htmd::convert(&body).map_err(|err| anyhow::anyhow!("markdown conversion failed: {err}"))
}

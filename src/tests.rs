use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::tempdir;

use crate::cli::*;
use crate::config::*;
use crate::error::*;
use crate::extract::*;
use crate::forecast::*;
use crate::gdelt::*;
use crate::model::*;
use crate::pipeline::*;
use crate::research::*;
use crate::store::*;
use crate::telemetry::*;
use crate::tools::*;
use crate::webpage::*;
use crate::wiki::*;

fn base_cli() -> Cli {
    Cli {
        model: None,
        models: Vec::new(),
        profile: "default".to_string(),
        config_path: ".chronicle/config.toml".to_string(),
        max_iters: None,
        news_rate_limit: None,
        fetch_timeout_secs: None,
        page_cache_path: None,
        search_cache_path: None,
        telemetry_enabled: None,
        telemetry_path: None,
        log_filter: "error".to_string(),
        command: Commands::Doctor,
    }
}

fn base_cfg() -> RuntimeConfig {
    RuntimeConfig {
        profile: "default".to_string(),
        config_path: ".chronicle/config.toml".to_string(),
        model: DEFAULT_PIPELINE_MODEL.to_string(),
        models: vec!["openrouter/a/one".to_string(), "openrouter/b/two".to_string()],
        max_iters: 5,
        news_rate_limit_per_minute: None,
        fetch_timeout_secs: 1,
        page_cache_path: ".chronicle/test-pages.db".to_string(),
        search_cache_path: ".chronicle/test-search.db".to_string(),
        telemetry_enabled: false,
        telemetry_path: ".chronicle/test-telemetry.jsonl".to_string(),
    }
}

fn test_telemetry() -> TelemetrySink {
    TelemetrySink::new(&base_cfg(), "test".to_string())
}

enum Reply {
    Text(&'static str),
    Tool(&'static str, Value),
    Empty,
}

/// Scripted in-memory model: replies are consumed in order, every request is
/// recorded, and an exhausted script fails like a dead endpoint.
struct ScriptedModel {
    replies: std::sync::Mutex<VecDeque<Reply>>,
    requests: std::sync::Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self::new(Vec::new())
    }

    fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().unwrap().push(request);
        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Text(text)) => Ok(ChatResponse {
                text: Some(text.to_string()),
                tool_call: None,
            }),
            Some(Reply::Tool(name, arguments)) => Ok(ChatResponse {
                text: None,
                tool_call: Some(ToolCall {
                    id: "call-test".to_string(),
                    name: name.to_string(),
                    arguments,
                }),
            }),
            Some(Reply::Empty) => Ok(ChatResponse {
                text: Some(String::new()),
                tool_call: None,
            }),
            None => Err(anyhow::anyhow!("scripted model has no reply left")),
        }
    }
}

struct StubSearchTransport {
    status: u16,
    body: String,
    calls: Arc<AtomicUsize>,
}

impl StubSearchTransport {
    fn with_body(status: u16, body: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                status,
                body: body.to_string(),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl SearchTransport for StubSearchTransport {
    async fn get(&self, base_url: &str, params: &BTreeMap<String, String>) -> Result<RawResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawResponse {
            status: self.status,
            headers: Vec::new(),
            body: self.body.clone().into_bytes(),
            url: format!("{base_url}?query={}", params.get("query").cloned().unwrap_or_default()),
        })
    }
}

#[derive(Default)]
struct WikiCalls {
    pages: AtomicUsize,
    searches: AtomicUsize,
}

struct StubWikiTransport {
    pages: HashMap<String, String>,
    calls: Arc<WikiCalls>,
}

impl StubWikiTransport {
    fn with_pages(pages: HashMap<String, String>) -> (Self, Arc<WikiCalls>) {
        let calls = Arc::new(WikiCalls::default());
        (
            Self {
                pages,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl WikiTransport for StubWikiTransport {
    async fn page_html(&self, title: &str) -> Result<String> {
        self.calls.pages.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(title)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such page '{title}'"))
    }

    async fn search_titles(&self, term: &str, n_results: u32) -> Result<Vec<String>> {
        self.calls.searches.fetch_add(1, Ordering::SeqCst);
        Ok((0..n_results.min(3))
            .map(|index| format!("{term} {index}"))
            .collect())
    }
}

async fn test_wiki(
    dir: &tempfile::TempDir,
    pages: HashMap<String, String>,
) -> (CachedWikipedia, Arc<WikiCalls>) {
    let page_path = dir.path().join("pages.db");
    let search_path = dir.path().join("search.db");
    let (transport, calls) = StubWikiTransport::with_pages(pages);
    let wiki = CachedWikipedia::with_transport(
        Box::new(transport),
        KvStore::open(&page_path.to_string_lossy())
            .await
            .expect("open page cache"),
        KvStore::open(&search_path.to_string_lossy())
            .await
            .expect("open search cache"),
    );
    (wiki, calls)
}

async fn test_toolbox(dir: &tempfile::TempDir) -> Toolbox {
    let (wiki, _) = test_wiki(dir, HashMap::new()).await;
    let (transport, _) = StubSearchTransport::with_body(200, r#"{"articles":[]}"#);
    let news = GdeltClient::with_transport(Box::new(transport), None);
    Toolbox::new(wiki, news, Duration::from_secs(1))
}

fn user_content(message: &ChatMessage) -> Option<&str> {
    match message {
        ChatMessage::User { content } => Some(content),
        _ => None,
    }
}

// --- news search ---

#[test]
fn normalized_key_ignores_name_case_and_order() {
    let forward = normalized_key(&[
        ("Query".to_string(), "ukraine".to_string()),
        ("MODE".to_string(), "artlist".to_string()),
    ]);
    let reversed = normalized_key(&[
        ("mode".to_string(), "artlist".to_string()),
        ("query".to_string(), "ukraine".to_string()),
    ]);
    assert_eq!(forward, reversed);
    assert_eq!(forward.get("query").map(String::as_str), Some("ukraine"));
}

#[test]
fn build_params_drops_unset_parameters() {
    let bare = build_params("ukraine", &NewsQuery::default());
    assert_eq!(bare.len(), 4);
    assert!(bare.iter().all(|(name, _)| {
        matches!(name.as_str(), "query" | "mode" | "format" | "sort")
    }));

    let full = build_params(
        "ukraine",
        &NewsQuery {
            queries: vec!["ukraine".to_string()],
            timespan: Some("1week".to_string()),
            start: Some("20250101000000".to_string()),
            end: Some("20250201000000".to_string()),
            max_records: Some(50),
        },
    );
    assert_eq!(full.len(), 8);
    assert_eq!(normalized_key(&bare).len(), 4);
    assert_eq!(normalized_key(&full).len(), 8);
}

#[test]
fn joined_query_quotes_only_multiple_terms() {
    let single = joined_query(&["ukraine conflict".to_string()]).expect("single term");
    assert_eq!(single, "ukraine conflict");

    let multiple =
        joined_query(&["ceasefire".to_string(), "peace deal".to_string()]).expect("two terms");
    assert_eq!(multiple, r#"("ceasefire" OR "peace deal")"#);

    assert!(joined_query(&[]).is_err());
}

#[tokio::test]
async fn news_search_caches_identical_requests() {
    let body = r#"{"articles":[{"title":"T","url":"u","seendate":"s","domain":"d","language":"l","sourcecountry":"c"}]}"#;
    let (transport, calls) = StubSearchTransport::with_body(200, body);
    let client = GdeltClient::with_transport(Box::new(transport), None);

    let query = NewsQuery {
        queries: vec!["ukraine".to_string()],
        ..NewsQuery::default()
    };
    let first = client.search(query.clone()).await.expect("first search");
    let second = client.search(query).await.expect("second search");

    assert_eq!(first, second);
    assert!(first.contains("- **T**"));
    assert!(first.contains("  - URL: u"));
    assert!(first.contains("  - Country: c"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn news_search_spaces_requests_at_the_configured_rate() {
    let (transport, calls) = StubSearchTransport::with_body(200, r#"{"articles":[]}"#);
    // 120 per minute: one request every 500ms.
    let client = GdeltClient::with_transport(Box::new(transport), Some(120.0));

    let started = tokio::time::Instant::now();
    for index in 0..3 {
        let query = NewsQuery {
            queries: vec![format!("topic-{index}")],
            ..NewsQuery::default()
        };
        client.search(query).await.expect("search");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_millis(990));
}

#[tokio::test]
async fn news_search_renders_no_results_when_articles_key_is_absent() {
    let (transport, _) = StubSearchTransport::with_body(200, r#"{"status":"ok"}"#);
    let client = GdeltClient::with_transport(Box::new(transport), None);
    let result = client
        .search(NewsQuery {
            queries: vec!["quiet topic".to_string()],
            ..NewsQuery::default()
        })
        .await
        .expect("search");
    assert_eq!(result, "No results found");
}

#[tokio::test]
async fn news_search_wraps_unparseable_bodies() {
    let (transport, _) = StubSearchTransport::with_body(200, "rate limit exceeded, slow down");
    let client = GdeltClient::with_transport(Box::new(transport), None);
    let result = client
        .search(NewsQuery {
            queries: vec!["ukraine".to_string()],
            ..NewsQuery::default()
        })
        .await
        .expect("search");
    assert_eq!(result, "Error(rate limit exceeded, slow down)");
}

#[tokio::test]
async fn news_search_fails_hard_on_non_success_status() {
    let (transport, _) = StubSearchTransport::with_body(429, "too many requests");
    let client = GdeltClient::with_transport(Box::new(transport), None);
    let err = client
        .search(NewsQuery {
            queries: vec!["ukraine".to_string()],
            ..NewsQuery::default()
        })
        .await
        .expect_err("non-2xx must fail");
    assert!(err.to_string().contains("HTTP 429"));
}

// --- document caches ---

#[tokio::test]
async fn kv_store_round_trips_and_clears() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("store.db");
    let store = KvStore::open(&path.to_string_lossy()).await.expect("open");

    assert!(!store.contains("k").await.expect("contains"));
    store.put("k", "v1").await.expect("put");
    store.put("k", "v2").await.expect("overwrite");
    assert_eq!(store.get("k").await.expect("get"), Some("v2".to_string()));

    store.put("other", "x").await.expect("put");
    assert_eq!(store.clear().await.expect("clear"), 2);
    assert!(!store.contains("k").await.expect("contains after clear"));
}

#[tokio::test]
async fn wiki_page_fetches_once_then_serves_from_cache() {
    let dir = tempdir().expect("tempdir");
    let pages = HashMap::from([(
        "Kyiv".to_string(),
        "<p>Capital of <b>Ukraine</b></p>".to_string(),
    )]);
    let (wiki, calls) = test_wiki(&dir, pages).await;

    let first = wiki.get_page("Kyiv").await.expect("first fetch");
    let second = wiki.get_page("Kyiv").await.expect("cached fetch");
    assert!(first.contains("Capital of"));
    assert_eq!(first, second);
    assert_eq!(calls.pages.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wiki_page_errors_become_text_and_are_not_cached() {
    let dir = tempdir().expect("tempdir");
    let (wiki, calls) = test_wiki(&dir, HashMap::new()).await;

    let first = wiki.get_page("Missing").await.expect("error as text");
    assert!(first.contains("no such page 'Missing'"));

    // Still not cached: a retry goes back to the transport.
    wiki.get_page("Missing").await.expect("second attempt");
    assert_eq!(calls.pages.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn wiki_search_cache_key_carries_result_count() {
    let dir = tempdir().expect("tempdir");
    let (wiki, calls) = test_wiki(&dir, HashMap::new()).await;

    wiki.search("ceasefire", 2).await.expect("first search");
    wiki.search("ceasefire", 2).await.expect("cached search");
    assert_eq!(calls.searches.load(Ordering::SeqCst), 1);

    // Same term, different count: a distinct cache entry.
    wiki.search("ceasefire", 3).await.expect("larger search");
    assert_eq!(calls.searches.load(Ordering::SeqCst), 2);

    assert_eq!(search_cache_key("ceasefire", 2), "ceasefire\u{1f}2");
}

#[tokio::test]
async fn wiki_clear_empties_both_caches() {
    let dir = tempdir().expect("tempdir");
    let pages = HashMap::from([("Kyiv".to_string(), "<p>city</p>".to_string())]);
    let (wiki, _) = test_wiki(&dir, pages).await;

    wiki.get_page("Kyiv").await.expect("page");
    wiki.search("ceasefire", 2).await.expect("search");
    assert_eq!(wiki.clear().await.expect("clear"), 2);
}

// --- tools ---

#[tokio::test]
async fn toolbox_dispatch_never_errors() {
    let dir = tempdir().expect("tempdir");
    let toolbox = test_toolbox(&dir).await;

    let reflection = toolbox
        .dispatch(THINK_TOOL_NAME, &json!({"reflection": "need newer coverage"}))
        .await;
    assert_eq!(reflection, "Reflection recorded: need newer coverage");

    let unknown = toolbox.dispatch("bogus", &json!({})).await;
    assert_eq!(unknown, "unknown tool 'bogus'");

    let invalid = toolbox.dispatch(THINK_TOOL_NAME, &json!({})).await;
    assert!(invalid.starts_with("invalid tool arguments"));
}

#[test]
fn tool_specs_declare_the_closed_toolset() {
    let specs = tool_specs();
    let names = specs.iter().map(|spec| spec.name.as_str()).collect::<Vec<&str>>();
    assert_eq!(
        names,
        vec![
            GET_WIKIPEDIA_PAGE_TOOL_NAME,
            SEARCH_WIKIPEDIA_PAGES_TOOL_NAME,
            NEWS_SEARCH_TOOL_NAME,
            FETCH_WEBPAGE_TOOL_NAME,
            THINK_TOOL_NAME,
        ]
    );
    assert!(specs.iter().all(|spec| spec.parameters.is_object()));
}

#[tokio::test]
async fn fetch_webpage_reports_failures_as_text() {
    let http = reqwest::Client::new();
    let result = fetch_webpage_content(&http, "not a url", Duration::from_secs(1)).await;
    assert!(result.starts_with("Error fetching content from not a url:"));
}

// --- research loop ---

#[tokio::test]
async fn research_loop_feeds_tool_results_back_and_stops_on_text() {
    let dir = tempdir().expect("tempdir");
    let toolbox = test_toolbox(&dir).await;
    let model = ScriptedModel::new(vec![
        Reply::Tool(THINK_TOOL_NAME, json!({"reflection": "checking coverage"})),
        Reply::Text("2024: it began. 2025: it ended."),
    ]);

    let research = ResearchLoop::new(&model, "openrouter/a/one", &toolbox, 5);
    let result = research
        .run(&Objective::Broad {
            topic: "ceasefire talks".to_string(),
            time_until: "2025-12-02".to_string(),
        })
        .await
        .expect("loop run");

    assert_eq!(result.status, LoopStatus::Answered);
    assert_eq!(result.rounds, 2);
    assert_eq!(result.timeline, "2024: it began. 2025: it ended.");

    // The second request must carry the tool result back to the model.
    let requests = model.recorded_requests();
    assert_eq!(requests.len(), 2);
    let saw_tool_result = requests[1].messages.iter().any(|message| {
        matches!(message, ChatMessage::Tool { content, .. }
            if content == "Reflection recorded: checking coverage")
    });
    assert!(saw_tool_result);
}

#[tokio::test]
async fn research_loop_nudges_after_an_empty_reply() {
    let dir = tempdir().expect("tempdir");
    let toolbox = test_toolbox(&dir).await;
    let model = ScriptedModel::new(vec![Reply::Empty, Reply::Text("done")]);

    let research = ResearchLoop::new(&model, "openrouter/a/one", &toolbox, 5);
    let result = research
        .run(&Objective::Broad {
            topic: "topic".to_string(),
            time_until: "2025-01-01".to_string(),
        })
        .await
        .expect("loop run");

    assert_eq!(result.status, LoopStatus::Answered);
    assert_eq!(result.rounds, 2);
}

#[tokio::test]
async fn research_loop_exhaustion_falls_back_to_a_final_completion() {
    let dir = tempdir().expect("tempdir");
    let toolbox = test_toolbox(&dir).await;
    let model = ScriptedModel::new(vec![
        Reply::Tool(THINK_TOOL_NAME, json!({"reflection": "round one"})),
        Reply::Tool(THINK_TOOL_NAME, json!({"reflection": "round two"})),
        Reply::Text("best effort from gathered evidence"),
    ]);

    let research = ResearchLoop::new(&model, "openrouter/a/one", &toolbox, 2);
    let result = research
        .run(&Objective::Event {
            topic: "topic".to_string(),
            subtopic: "sub-event".to_string(),
            date: "2025-03-01".to_string(),
        })
        .await
        .expect("loop run");

    assert_eq!(result.status, LoopStatus::Exhausted);
    assert_eq!(result.rounds, 2);
    assert_eq!(result.timeline, "best effort from gathered evidence");

    // The closing completion must not offer tools again.
    let requests = model.recorded_requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[2].tools.is_empty());
    assert!(!requests[0].tools.is_empty());
}

// --- extraction ---

#[tokio::test]
async fn extract_events_parses_fenced_json_and_sorts_chronologically() {
    let model = ScriptedModel::new(vec![Reply::Text(
        "Here are the events:\n```json\n{\"events\":[\
         {\"date\":\"2025-03-01\",\"description\":\"second\"},\
         {\"date\":\"someday\",\"description\":\"undated\"},\
         {\"date\":\"January 5, 2024\",\"description\":\"first\",\"source\":\"wire report\"}\
         ]}\n```",
    )]);

    let events = extract_events(&model, "openrouter/a/one", "topic", "timeline text")
        .await
        .expect("extraction");

    assert_eq!(events.len(), 3);
    assert_eq!(events[0].description, "first");
    assert_eq!(events[0].source.as_deref(), Some("wire report"));
    assert_eq!(events[1].description, "second");
    // Unparseable dates sort after every dated event.
    assert_eq!(events[2].description, "undated");
}

fn ymd(year: i32, month: u32, day: u32) -> Option<chrono::NaiveDate> {
    chrono::NaiveDate::from_ymd_opt(year, month, day)
}

#[test]
fn event_date_parser_handles_common_shapes() {
    assert_eq!(parse_event_date("2024-03-12"), ymd(2024, 3, 12));
    assert_eq!(parse_event_date("12 March 2024"), ymd(2024, 3, 12));
    assert_eq!(parse_event_date("March 12, 2024"), ymd(2024, 3, 12));
    assert_eq!(parse_event_date("March 2024"), ymd(2024, 3, 1));
    assert_eq!(parse_event_date("2024-03"), ymd(2024, 3, 1));
    assert_eq!(parse_event_date("2024"), ymd(2024, 1, 1));
    assert_eq!(parse_event_date("early 2024"), ymd(2024, 1, 1));
    assert_eq!(parse_event_date("May 5, 2024 – June 2024"), ymd(2024, 5, 5));
    assert_eq!(parse_event_date("sometime soon"), None);
}

// --- pipeline ---

#[tokio::test]
async fn subtimeline_research_isolates_failed_runs() {
    let dir = tempdir().expect("tempdir");
    let toolbox = test_toolbox(&dir).await;
    let model = ScriptedModel::failing();
    let events = vec![
        Event {
            date: "2024-01-05".to_string(),
            description: "first incident".to_string(),
            source: None,
        },
        Event {
            date: "2025-03-01".to_string(),
            description: "second incident".to_string(),
            source: None,
        },
    ];

    let subtimelines =
        research_subtimelines(&model, "openrouter/a/one", &toolbox, "topic", &events, 2).await;

    assert_eq!(subtimelines.len(), 2);
    assert_eq!(subtimelines[0].subtopic, "first incident");
    assert_eq!(subtimelines[1].subtopic, "second incident");
    assert!(subtimelines[0].narrative.starts_with("sub-research failed:"));
    assert!(subtimelines[1].narrative.starts_with("sub-research failed:"));
}

#[tokio::test]
async fn merge_prompt_contains_every_subtimeline() {
    let model = ScriptedModel::new(vec![Reply::Text("one merged narrative")]);
    let subtimelines = vec![
        Subtimeline {
            subtopic: "first incident".to_string(),
            date: "2024-01-05".to_string(),
            narrative: "narrative alpha".to_string(),
        },
        Subtimeline {
            subtopic: "second incident".to_string(),
            date: "2025-03-01".to_string(),
            narrative: "narrative beta".to_string(),
        },
    ];

    let merged = merge_timelines(&model, "openrouter/a/one", "topic", &subtimelines)
        .await
        .expect("merge");
    assert_eq!(merged, "one merged narrative");

    let requests = model.recorded_requests();
    let prompt = requests[0]
        .messages
        .iter()
        .find_map(user_content)
        .expect("user turn");
    assert!(prompt.contains("### 1. first incident (2024-01-05)"));
    assert!(prompt.contains("narrative alpha"));
    assert!(prompt.contains("### 2. second incident (2025-03-01)"));
    assert!(prompt.contains("narrative beta"));
}

#[test]
fn json_reports_create_parent_directories() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("reports").join("timeline.json");
    let path = path.to_string_lossy();
    write_json_report(&path, &json!({"topic": "x"})).expect("write report");

    let written = std::fs::read_to_string(path.as_ref()).expect("read back");
    let parsed = serde_json::from_str::<Value>(&written).expect("valid json");
    assert_eq!(parsed["topic"], "x");
}

// --- forecasting ---

#[tokio::test]
async fn ensemble_emits_a_record_for_every_model_and_temperature() {
    let model: Arc<dyn LanguageModel> = Arc::new(ScriptedModel::failing());
    let models = vec!["openrouter/a/one".to_string(), "openrouter/b/two".to_string()];
    let inputs = ForecastInputs {
        scenario: "scenario".to_string(),
        contexts: Vec::new(),
        current_date: "2025-12-02".to_string(),
        question: "will it happen?".to_string(),
    };

    let records = run_ensemble(model, &models, inputs, &test_telemetry()).await;

    assert_eq!(records.len(), models.len() * ROLLOUT_TEMPERATURES.len());
    for (index, record) in records.iter().enumerate() {
        let expected_model = &models[index / ROLLOUT_TEMPERATURES.len()];
        let expected_temp = ROLLOUT_TEMPERATURES[index % ROLLOUT_TEMPERATURES.len()];
        assert_eq!(&record.model, expected_model);
        assert_eq!(record.temp, expected_temp);
        assert_eq!(record.rollout_id, index % ROLLOUT_TEMPERATURES.len());
        assert_eq!(record.error, Some(true));
        assert!(record.choice.is_none());
    }
}

#[tokio::test]
async fn forecast_contexts_are_title_prefixed_pages() {
    let dir = tempdir().expect("tempdir");
    let pages = HashMap::from([("Kyiv".to_string(), "<p>city page</p>".to_string())]);
    let (wiki, _) = test_wiki(&dir, pages).await;

    let contexts = gather_contexts(&wiki, &["Kyiv".to_string()])
        .await
        .expect("contexts");
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].starts_with("Kyiv\n"));
    assert!(contexts[0].contains("city page"));
}

// --- model boundary helpers ---

#[test]
fn wire_model_ids_strip_the_routing_prefix() {
    assert_eq!(wire_model_id("openrouter/x-ai/grok-4.1-fast:free"), "x-ai/grok-4.1-fast:free");
    assert_eq!(wire_model_id("x-ai/grok-4.1-fast:free"), "x-ai/grok-4.1-fast:free");
}

#[test]
fn json_payload_extraction_tolerates_fences_and_prose() {
    assert_eq!(
        extract_json_payload("Sure: ```json\n{\"a\": 1}\n``` hope that helps"),
        Some("{\"a\": 1}")
    );
    assert_eq!(extract_json_payload("[1, 2]"), Some("[1, 2]"));
    assert_eq!(extract_json_payload("no json here"), None);
}

// --- config ---

#[test]
fn config_defaults_apply_without_a_profile_file() {
    let cli = base_cli();
    let cfg = resolve_runtime_config(&cli, &ProfilesFile::default()).expect("resolve");
    assert_eq!(cfg.model, DEFAULT_PIPELINE_MODEL);
    assert_eq!(cfg.models, default_ensemble_models());
    assert_eq!(cfg.max_iters, 5);
    assert_eq!(cfg.news_rate_limit_per_minute, Some(60.0));
    assert_eq!(cfg.fetch_timeout_secs, 10);
    assert!(cfg.telemetry_enabled);
}

#[test]
fn config_layers_cli_over_profile_over_defaults() {
    let dir = tempdir().expect("tempdir");
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
[profiles.fast]
model = "openrouter/x/profile-model"
models = ["openrouter/x/ensemble-a"]
max_iters = 2
news_rate_limit_per_minute = 0.0
"#,
    )
    .expect("write config");

    let mut cli = base_cli();
    cli.profile = "fast".to_string();
    cli.config_path = config_path.to_string_lossy().into_owned();
    cli.max_iters = Some(7);

    let profiles = load_profiles(&cli.config_path).expect("load profiles");
    let cfg = resolve_runtime_config(&cli, &profiles).expect("resolve");

    assert_eq!(cfg.model, "openrouter/x/profile-model");
    assert_eq!(cfg.models, vec!["openrouter/x/ensemble-a".to_string()]);
    // CLI wins over the profile.
    assert_eq!(cfg.max_iters, 7);
    // A zero rate disables limiting entirely.
    assert_eq!(cfg.news_rate_limit_per_minute, None);
}

#[test]
fn unknown_profiles_list_the_available_names() {
    let dir = tempdir().expect("tempdir");
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, "[profiles.alpha]\n[profiles.beta]\n").expect("write config");

    let mut cli = base_cli();
    cli.profile = "gamma".to_string();
    cli.config_path = config_path.to_string_lossy().into_owned();

    let profiles = load_profiles(&cli.config_path).expect("load profiles");
    let err = resolve_runtime_config(&cli, &profiles).expect_err("unknown profile");
    let message = err.to_string();
    assert!(message.contains("gamma"));
    assert!(message.contains("alpha, beta"));
}

// --- errors and telemetry ---

#[test]
fn errors_map_to_actionable_categories() {
    let model_err = anyhow::anyhow!("OPENROUTER_API_KEY is required for the model boundary");
    assert_eq!(categorize_error(&model_err), ErrorCategory::Model);

    let search_err = anyhow::anyhow!("news search returned HTTP 429");
    assert_eq!(categorize_error(&search_err), ErrorCategory::Search);

    let cache_err = anyhow::anyhow!("cache read failed");
    assert_eq!(categorize_error(&cache_err), ErrorCategory::Cache);

    let input_err = anyhow::anyhow!("profile 'x' not found in 'config.toml'");
    assert_eq!(categorize_error(&input_err), ErrorCategory::Input);

    let rendered = format_cli_error(&model_err);
    assert!(rendered.starts_with("[MODEL]"));
    assert!(rendered.contains("Hint:"));
}

#[test]
fn telemetry_appends_jsonl_records_with_run_fields() {
    let dir = tempdir().expect("tempdir");
    let mut cfg = base_cfg();
    cfg.telemetry_enabled = true;
    cfg.telemetry_path = dir
        .path()
        .join("telemetry")
        .join("events.jsonl")
        .to_string_lossy()
        .into_owned();
    let sink = TelemetrySink::new(&cfg, "timeline".to_string());

    sink.emit("timeline.completed", json!({"merged_chars": 42}));
    sink.emit("timeline.completed", json!({"merged_chars": 7}));

    let content = std::fs::read_to_string(&cfg.telemetry_path).expect("read telemetry");
    let lines = content.lines().collect::<Vec<&str>>();
    assert_eq!(lines.len(), 2);

    let record = serde_json::from_str::<Value>(lines[0]).expect("valid json line");
    assert_eq!(record["event"], "timeline.completed");
    assert_eq!(record["command"], "timeline");
    assert_eq!(record["merged_chars"], 42);
    assert!(record["run_id"].as_str().unwrap().starts_with("run-"));
}

#[test]
fn command_labels_cover_every_subcommand() {
    let mut cli = base_cli();
    assert_eq!(command_label(&cli.command), "doctor");

    cli.command = Commands::Cache {
        command: CacheCommands::Clear,
    };
    assert_eq!(command_label(&cli.command), "cache.clear");

    cli.command = Commands::Profiles {
        command: ProfileCommands::Show,
    };
    assert_eq!(command_label(&cli.command), "profiles.show");
}

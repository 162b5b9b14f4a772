//! End-to-end tests for the retrieval pipeline against a mock upstream API.
//!
//! These tests spin up a local HTTP server that mimics the statistics API's
//! three endpoints and prove that pagination, result shaping, search parsing,
//! coverage lookup, and the agent loop behave correctly over real HTTP.

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use datascope::agent::run_agent;
use datascope::client::{StatApiClient, FETCH_CEILING};
use datascope::completion::{ChatMessage, ChatTurn, CompletionOptions, CompletionProvider};
use datascope::config::{ApiConfig, Config};
use datascope::coverage::get_temporal_coverage;
use datascope::models::DataQuery;
use datascope::orchestrate::NullExtractor;
use datascope::retrieve::{retrieve_data, ShapeOptions};
use datascope::search::search_datasets;

// ─── Mock Upstream ──────────────────────────────────────────────────

#[derive(Clone)]
struct MockUpstream {
    records: Arc<Vec<Value>>,
    page_size: usize,
    reported_total: usize,
    data_requests: Arc<AtomicUsize>,
    search_body: Arc<Value>,
    metadata_body: Arc<Value>,
}

impl MockUpstream {
    fn new(records: Vec<Value>, page_size: usize, reported_total: usize) -> Self {
        Self {
            records: Arc::new(records),
            page_size,
            reported_total,
            data_requests: Arc::new(AtomicUsize::new(0)),
            search_body: Arc::new(json!({ "value": [] })),
            metadata_body: Arc::new(json!({ "value": [] })),
        }
    }

    fn with_search_body(mut self, body: Value) -> Self {
        self.search_body = Arc::new(body);
        self
    }

    fn with_metadata_body(mut self, body: Value) -> Self {
        self.metadata_body = Arc::new(body);
        self
    }
}

async fn handle_data(
    State(state): State<MockUpstream>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    state.data_requests.fetch_add(1, Ordering::SeqCst);

    let skip: usize = params
        .get("skip")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let end = (skip + state.page_size).min(state.records.len());
    let page: Vec<Value> = if skip < state.records.len() {
        state.records[skip..end].to_vec()
    } else {
        Vec::new()
    };

    Json(json!({ "value": page, "count": state.reported_total }))
}

async fn handle_search(State(state): State<MockUpstream>) -> Json<Value> {
    Json((*state.search_body).clone())
}

async fn handle_metadata(State(state): State<MockUpstream>) -> Json<Value> {
    Json((*state.metadata_body).clone())
}

/// Bind the mock on an ephemeral port and return its base URL.
async fn spawn_mock(state: MockUpstream) -> String {
    let app = Router::new()
        .route("/data360/data", get(handle_data))
        .route("/data360/searchv2", post(handle_search))
        .route("/data360/metadata", post(handle_metadata))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    format!("http://{}", addr)
}

fn client_for(base_url: &str) -> StatApiClient {
    StatApiClient::new(&ApiConfig {
        base_url: base_url.to_string(),
        timeout_secs: 5,
    })
    .unwrap()
}

fn observation(area: &str, label: &str, year: &str, value: Value) -> Value {
    json!({
        "REF_AREA": area,
        "REF_AREA_label": label,
        "TIME_PERIOD": year,
        "OBS_VALUE": value,
    })
}

fn population_query() -> DataQuery {
    DataQuery {
        indicator: "WB_WDI_SP_POP_TOTL".to_string(),
        database: "WB_WDI".to_string(),
        ..DataQuery::default()
    }
}

// ─── Pagination ─────────────────────────────────────────────────────

/// 35 records at page size 10 take exactly four requests and come back whole.
#[tokio::test]
async fn test_pagination_follows_pages_to_reported_total() {
    let records: Vec<Value> = (0..35)
        .map(|i| observation(&format!("C{:02}", i), "Country", "2023", json!(i)))
        .collect();
    let state = MockUpstream::new(records, 10, 35);
    let requests = state.data_requests.clone();
    let base = spawn_mock(state).await;

    let client = client_for(&base);
    let fetched = client.fetch_observations(&population_query()).await.unwrap();

    assert_eq!(fetched.len(), 35);
    assert_eq!(requests.load(Ordering::SeqCst), 4);
}

/// A server that keeps promising more records cannot push the fetch past
/// the hard ceiling; the final page is truncated to land exactly on it.
#[tokio::test]
async fn test_pagination_truncates_at_record_ceiling() {
    let records: Vec<Value> = (0..12_000)
        .map(|i| observation(&format!("C{}", i), "Country", "2023", json!(i)))
        .collect();
    let state = MockUpstream::new(records, 3000, 50_000);
    let requests = state.data_requests.clone();
    let base = spawn_mock(state).await;

    let client = client_for(&base);
    let fetched = client.fetch_observations(&population_query()).await.unwrap();

    assert_eq!(fetched.len(), FETCH_CEILING);
    assert_eq!(requests.load(Ordering::SeqCst), 4);
}

/// An empty first page yields an empty result, not an error.
#[tokio::test]
async fn test_pagination_empty_result() {
    let base = spawn_mock(MockUpstream::new(Vec::new(), 10, 0)).await;
    let client = client_for(&base);
    let fetched = client.fetch_observations(&population_query()).await.unwrap();
    assert!(fetched.is_empty());
}

// ─── Retrieval pipeline ─────────────────────────────────────────────

/// Full pipeline over HTTP: aggregates dropped, values sorted descending,
/// limit applied, records compacted, summary consistent with the output.
#[tokio::test]
async fn test_retrieve_shapes_fetched_records() {
    let records = vec![
        observation("WLD", "World", "2023", json!(8_000_000_000i64)),
        observation("KEN", "Kenya", "2023", json!(54.0)),
        observation("UGA", "Uganda", "2023", json!(47.0)),
        observation("HIC", "High income", "2023", json!(1_200_000_000i64)),
        observation("TZA", "Tanzania", "2023", json!(65.0)),
        observation("NGA", "Nigeria", "2023", json!(213.0)),
        observation("ETH", "Ethiopia", "2023", json!(120.0)),
        observation("RWA", "Rwanda", "2023", Value::Null),
    ];
    let base = spawn_mock(MockUpstream::new(records, 100, 8)).await;
    let client = client_for(&base);

    let opts = ShapeOptions {
        limit: Some(5),
        sort_order: Some("desc".to_string()),
        exclude_aggregates: true,
        compact: true,
    };
    let outcome = retrieve_data(&client, &population_query(), &opts).await;

    assert!(outcome.success, "unexpected failure: {:?}", outcome.error);
    // 8 fetched, 2 aggregates dropped
    assert_eq!(outcome.total_available, 6);
    assert_eq!(outcome.record_count, 5);

    // Descending by value; the null-valued record falls past the limit.
    let countries: Vec<&str> = outcome
        .data
        .iter()
        .map(|r| r["country"].as_str().unwrap())
        .collect();
    assert_eq!(countries, vec!["NGA", "ETH", "TZA", "KEN", "UGA"]);

    // Compact records carry exactly the four display fields.
    let first = outcome.data[0].as_object().unwrap();
    assert_eq!(first.len(), 4);
    assert_eq!(first["country_name"], "Nigeria");
    assert_eq!(first["year"], "2023");
    assert_eq!(first["value"], 213.0);

    let summary = outcome.summary.unwrap();
    assert_eq!(summary.countries, 5);
    assert_eq!(summary.years, vec!["2023".to_string()]);
}

/// An upstream 404 surfaces as a failed envelope, never a panic.
#[tokio::test]
async fn test_retrieve_upstream_error_becomes_failure_envelope() {
    // No routes registered beyond the mock's; point at a bogus base path.
    let base = spawn_mock(MockUpstream::new(Vec::new(), 10, 0)).await;
    let client = StatApiClient::new(&ApiConfig {
        base_url: format!("{}/missing", base),
        timeout_secs: 5,
    })
    .unwrap();

    let outcome = retrieve_data(&client, &population_query(), &ShapeOptions::default()).await;
    assert!(!outcome.success);
    assert!(outcome.error.is_some());
    assert_eq!(outcome.record_count, 0);
}

// ─── Search and coverage ────────────────────────────────────────────

#[tokio::test]
async fn test_search_datasets_end_to_end() {
    let body = json!({
        "@odata.count": 212,
        "value": [
            {
                "@search.score": 13.4173,
                "series_description": {
                    "idno": "WB_WDI_SP_POP_TOTL",
                    "name": "Population, total",
                    "database_id": "WB_WDI"
                }
            },
            {
                "@search.score": 9.2,
                "series_description": {
                    "idno": "WB_HNP_SP_POP_GROW",
                    "name": "Population growth (annual %)",
                    "database_id": "WB_HNP"
                }
            }
        ]
    });
    let base = spawn_mock(MockUpstream::new(Vec::new(), 10, 0).with_search_body(body)).await;
    let client = client_for(&base);

    let outcome = search_datasets(&client, "population total", 20).await;
    assert!(outcome.success);
    assert_eq!(outcome.total_count, 212);
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].indicator, "WB_WDI_SP_POP_TOTL");
    assert_eq!(outcome.results[0].search_score, 13.42);
}

#[tokio::test]
async fn test_temporal_coverage_end_to_end() {
    let body = json!({
        "value": [{
            "series_description": {
                "idno": "WB_WDI_SP_POP_TOTL",
                "time_periods": [{ "start": 1990, "end": 1995 }]
            }
        }]
    });
    let base = spawn_mock(MockUpstream::new(Vec::new(), 10, 0).with_metadata_body(body)).await;
    let client = client_for(&base);

    let outcome = get_temporal_coverage(&client, "WB_WDI_SP_POP_TOTL", "WB_WDI").await;
    assert!(outcome.success);
    assert_eq!(outcome.start_year, Some(1990));
    assert_eq!(outcome.latest_year, Some(1995));
    assert_eq!(outcome.available_years, vec![1990, 1991, 1992, 1993, 1994, 1995]);
}

// ─── Agent loop ─────────────────────────────────────────────────────

/// Provider that replays a fixed script of chat turns.
struct ScriptedProvider {
    turns: Mutex<Vec<ChatTurn>>,
}

impl ScriptedProvider {
    fn new(mut turns: Vec<ChatTurn>) -> Self {
        turns.reverse();
        Self {
            turns: Mutex::new(turns),
        }
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str, _opts: &CompletionOptions) -> Result<String> {
        bail!("not used by the agent loop")
    }

    async fn chat(&self, _messages: &[ChatMessage], _tools: &[Value]) -> Result<ChatTurn> {
        match self.turns.lock().unwrap().pop() {
            Some(turn) => Ok(turn),
            None => bail!("script exhausted"),
        }
    }
}

fn tool_call(id: &str, name: &str, arguments: Value) -> ChatTurn {
    let arguments = arguments.to_string();
    ChatTurn::ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.clone(),
        raw: json!([{
            "id": id,
            "type": "function",
            "function": { "name": name, "arguments": arguments }
        }]),
    }
}

fn agent_config(base_url: &str, max_iterations: u32) -> Config {
    let mut cfg = Config::default();
    cfg.api.base_url = base_url.to_string();
    cfg.api.timeout_secs = 5;
    cfg.agent.max_iterations = max_iterations;
    cfg
}

fn search_fixture() -> Value {
    json!({
        "@odata.count": 1,
        "value": [{
            "@search.score": 11.5,
            "series_description": {
                "idno": "WB_WDI_SP_POP_TOTL",
                "name": "Population, total",
                "database_id": "WB_WDI"
            }
        }]
    })
}

/// One search, then a text answer: the loop terminates, the transcript
/// records the tool call, and the search envelope is retained.
#[tokio::test]
async fn test_agent_searches_then_answers() {
    let base =
        spawn_mock(MockUpstream::new(Vec::new(), 10, 0).with_search_body(search_fixture())).await;
    let cfg = agent_config(&base, 10);
    let client = client_for(&base);

    let provider = ScriptedProvider::new(vec![
        tool_call(
            "call_1",
            "simple_search",
            json!({ "reasoning": "look up population", "search_query": "population total" }),
        ),
        ChatTurn::Text("Use WB_WDI_SP_POP_TOTL from WB_WDI.".to_string()),
    ]);

    let outcome = run_agent(&client, &provider, &NullExtractor, &cfg, "population of Kenya").await;

    assert!(outcome.success);
    assert_eq!(
        outcome.answer.as_deref(),
        Some("Use WB_WDI_SP_POP_TOTL from WB_WDI.")
    );
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.transcript.len(), 1);
    assert_eq!(outcome.transcript[0].tool, "simple_search");
    assert_eq!(outcome.transcript[0].reasoning, "look up population");
    assert!(outcome.transcript[0].error.is_none());

    let last = outcome.last_search.unwrap();
    assert!(last.success);
    assert_eq!(last.results[0].indicator, "WB_WDI_SP_POP_TOTL");
}

/// An unknown tool name becomes a transcript error and the loop continues.
#[tokio::test]
async fn test_agent_survives_unknown_tool() {
    let base =
        spawn_mock(MockUpstream::new(Vec::new(), 10, 0).with_search_body(search_fixture())).await;
    let cfg = agent_config(&base, 10);
    let client = client_for(&base);

    let provider = ScriptedProvider::new(vec![
        tool_call("call_1", "fetch_everything", json!({})),
        tool_call(
            "call_2",
            "simple_search",
            json!({ "reasoning": "retry properly", "search_query": "population total" }),
        ),
        ChatTurn::Text("Found it.".to_string()),
    ]);

    let outcome = run_agent(&client, &provider, &NullExtractor, &cfg, "population").await;

    assert!(outcome.success);
    assert_eq!(outcome.answer.as_deref(), Some("Found it."));
    assert_eq!(outcome.transcript.len(), 2);
    assert!(outcome.transcript[0]
        .error
        .as_deref()
        .unwrap()
        .contains("Unknown tool"));
    assert!(outcome.transcript[1].error.is_none());
}

/// The loop stops at max_iterations even if the model never answers.
#[tokio::test]
async fn test_agent_respects_iteration_cap() {
    let base =
        spawn_mock(MockUpstream::new(Vec::new(), 10, 0).with_search_body(search_fixture())).await;
    let cfg = agent_config(&base, 2);
    let client = client_for(&base);

    let calls: Vec<ChatTurn> = (0..5)
        .map(|i| {
            tool_call(
                &format!("call_{}", i),
                "simple_search",
                json!({ "reasoning": "again", "search_query": "population total" }),
            )
        })
        .collect();
    let provider = ScriptedProvider::new(calls);

    let outcome = run_agent(&client, &provider, &NullExtractor, &cfg, "population").await;

    assert!(outcome.success);
    assert!(outcome.answer.is_none());
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.transcript.len(), 2);
}

/// get_search_summary needs no network and is reported in the transcript.
#[tokio::test]
async fn test_agent_search_summary_tool() {
    let base = spawn_mock(MockUpstream::new(Vec::new(), 10, 0)).await;
    let cfg = agent_config(&base, 10);
    let client = client_for(&base);

    let provider = ScriptedProvider::new(vec![
        tool_call(
            "call_1",
            "get_search_summary",
            json!({ "reasoning": "learn the capabilities" }),
        ),
        ChatTurn::Text("The API supports keyword search and filters.".to_string()),
    ]);

    let outcome = run_agent(&client, &provider, &NullExtractor, &cfg, "what can you search?").await;

    assert!(outcome.success);
    assert_eq!(outcome.transcript[0].tool, "get_search_summary");
    // No search ran, so no envelope was retained.
    assert!(outcome.last_search.is_none());
}

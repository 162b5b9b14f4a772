//! Remote dataset search operations.
//!
//! Wraps the full-text search endpoint in typed operations: a simple
//! keyword search, an advanced search with OData filtering and field
//! selection, and a static capability summary that needs no network.
//!
//! All operations return a [`SearchOutcome`] envelope; transport and
//! status failures are folded in with `success: false` rather than
//! propagated as errors.

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};

use crate::client::StatApiClient;
use crate::models::{ExtractedParams, RankedCandidate, SearchCandidate};

/// Default field selection for dataset searches.
pub const DEFAULT_SELECT: &str =
    "series_description/idno, series_description/name, series_description/database_id";

/// Envelope returned by the search operations.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub success: bool,
    /// Total matches reported by the endpoint (pre-truncation).
    pub total_count: u64,
    pub results: Vec<SearchCandidate>,
    /// The query actually sent, when the enhancement layer rewrote it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_query: Option<String>,
    /// Candidate chosen by the selection layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_match: Option<RankedCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_reasoning: Option<String>,
    /// Filter parameters extracted from the original request text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_params: Option<ExtractedParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            total_count: 0,
            results: Vec::new(),
            enhanced_query: None,
            best_match: None,
            selection_reasoning: None,
            extracted_params: None,
            error: Some(message.into()),
        }
    }
}

/// Search for datasets matching a keyword query.
pub async fn search_datasets(client: &StatApiClient, query: &str, top: i64) -> SearchOutcome {
    let payload = json!({
        "count": true,
        "select": DEFAULT_SELECT,
        "search": query,
        "top": top,
    });

    run_search(client, &payload).await
}

/// Search with an OData filter expression and caller-chosen projection.
pub async fn advanced_search(
    client: &StatApiClient,
    query: &str,
    select: &str,
    filter_query: Option<&str>,
    top: i64,
    count: bool,
) -> SearchOutcome {
    let mut payload = json!({
        "count": count,
        "select": select,
        "search": query,
        "top": top,
    });
    if let Some(filter) = filter_query {
        payload["filter"] = json!(filter);
    }

    run_search(client, &payload).await
}

async fn run_search(client: &StatApiClient, payload: &Value) -> SearchOutcome {
    let body = match client.search(payload).await {
        Ok(body) => body,
        Err(e) => return SearchOutcome::failure(format!("{:#}", e)),
    };

    let results = match parse_candidates(&body) {
        Ok(results) => results,
        Err(e) => return SearchOutcome::failure(format!("{:#}", e)),
    };

    let total_count = body
        .get("@odata.count")
        .and_then(|c| c.as_u64())
        .unwrap_or(results.len() as u64);

    tracing::debug!(total_count, returned = results.len(), "dataset search");

    SearchOutcome {
        success: true,
        total_count,
        results,
        enhanced_query: None,
        best_match: None,
        selection_reasoning: None,
        extracted_params: None,
        error: None,
    }
}

/// Map the endpoint's `value` array onto [`SearchCandidate`]s.
///
/// Each entry nests its identity under `series_description`; the
/// relevance score sits beside it as `@search.score` and is rounded to
/// two decimals for presentation.
pub fn parse_candidates(body: &Value) -> Result<Vec<SearchCandidate>> {
    let values = body
        .get("value")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("Search response missing 'value' array"))?;

    let candidates = values
        .iter()
        .map(|item| {
            let series = item.get("series_description").cloned().unwrap_or(json!({}));
            let field = |key: &str| {
                series
                    .get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            let score = item
                .get("@search.score")
                .and_then(|s| s.as_f64())
                .unwrap_or(0.0);

            SearchCandidate {
                indicator: field("idno"),
                name: field("name"),
                database: field("database_id"),
                search_score: round2(score),
            }
        })
        .collect();

    Ok(candidates)
}

/// Round a score to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Static description of the search endpoint's capabilities.
///
/// No network access; useful for agents deciding how to search.
pub fn search_summary(base_url: &str) -> Value {
    json!({
        "api_endpoint": format!("{}/data360/searchv2", base_url.trim_end_matches('/')),
        "common_databases": {
            "WB_WDI": "World Development Indicators - Key development data",
            "WB_HNP": "Health Nutrition and Population Statistics",
            "WB_GDF": "Global Development Finance",
            "WB_IDS": "International Debt Statistics",
        },
        "search_capabilities": [
            "Keyword search across all metadata fields",
            "Filter by database_id, topic, region, or other fields",
            "Select specific fields to return",
            "Paginate through results",
            "Get total result counts",
        ],
        "example_filters": [
            "database_id eq 'WB_WDI'",
            "database_id eq 'WB_HNP' and topic eq 'Health'",
        ],
        "tips": [
            "Use specific keywords for better results",
            "Start broad, then narrow with filters",
            "Check the idno field for unique indicator codes",
        ],
    })
}

//! Temporal coverage lookup.
//!
//! Queries the metadata endpoint for a single indicator and reports the
//! year range its observations cover. Agents call this between searching
//! for a dataset and retrieving its data, so they can ask for a year that
//! actually exists.

use serde::Serialize;
use serde_json::{json, Value};

use crate::client::StatApiClient;

/// Envelope returned by [`get_temporal_coverage`].
#[derive(Debug, Clone, Serialize)]
pub struct CoverageOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_year: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub available_years: Vec<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CoverageOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            start_year: None,
            end_year: None,
            latest_year: None,
            available_years: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// Look up the years covered by an indicator's observations.
///
/// Never returns an error: transport failures and missing metadata are
/// folded into the envelope with `success: false`.
pub async fn get_temporal_coverage(
    client: &StatApiClient,
    indicator: &str,
    _database: &str,
) -> CoverageOutcome {
    let payload = json!({
        "query": format!("&$filter=series_description/idno eq '{}'", indicator),
    });

    let body = match client.metadata(&payload).await {
        Ok(body) => body,
        Err(e) => return CoverageOutcome::failure(format!("{:#}", e)),
    };

    parse_coverage(&body)
}

/// Extract the first matching entry's time-period bounds.
fn parse_coverage(body: &Value) -> CoverageOutcome {
    let first = match body
        .get("value")
        .and_then(|v| v.as_array())
        .and_then(|v| v.first())
    {
        Some(entry) => entry,
        None => return CoverageOutcome::failure("No metadata found"),
    };

    let period = match first
        .get("series_description")
        .and_then(|s| s.get("time_periods"))
        .and_then(|p| p.as_array())
        .and_then(|p| p.first())
    {
        Some(period) => period,
        None => return CoverageOutcome::failure("No temporal data available"),
    };

    let start_year = year_field(period, "start");
    let end_year = year_field(period, "end");

    let (start, end) = match (start_year, end_year) {
        (Some(start), Some(end)) if start <= end => (start, end),
        _ => return CoverageOutcome::failure("No temporal data available"),
    };

    CoverageOutcome {
        success: true,
        start_year: Some(start),
        end_year: Some(end),
        latest_year: Some(end),
        available_years: (start..=end).collect(),
        error: None,
    }
}

/// Years arrive as numbers or numeric strings depending on the series.
fn year_field(period: &Value, key: &str) -> Option<i32> {
    match period.get(key) {
        Some(Value::Number(n)) => n.as_i64().map(|y| y as i32),
        Some(Value::String(s)) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

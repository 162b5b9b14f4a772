//! HTTP client for the statistics API.
//!
//! Wraps the three upstream endpoints behind [`StatApiClient`]:
//! - `POST {base}/data360/searchv2` — full-text dataset search
//! - `POST {base}/data360/metadata` — series metadata queries
//! - `GET  {base}/data360/data` — paginated observation data
//!
//! Observation fetches accumulate pages until the server-reported total is
//! reached, an empty page arrives, or the hard record ceiling is hit. A
//! transport or status failure aborts the whole fetch; callers surface it
//! as a failed envelope rather than returning partial data.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::time::Duration;

use crate::config::ApiConfig;
use crate::models::{DataQuery, Observation};

/// Hard ceiling on accumulated records per fetch. The pagination loop
/// truncates the final page so the result never exceeds this count.
pub const FETCH_CEILING: usize = 10_000;

/// Client for the statistics search, metadata, and data endpoints.
#[derive(Clone)]
pub struct StatApiClient {
    http: reqwest::Client,
    search_url: String,
    metadata_url: String,
    data_url: String,
}

impl StatApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let base = config.base_url.trim_end_matches('/');

        Ok(Self {
            http,
            search_url: format!("{}/data360/searchv2", base),
            metadata_url: format!("{}/data360/metadata", base),
            data_url: format!("{}/data360/data", base),
        })
    }

    /// POST a search payload and return the raw response body.
    pub async fn search(&self, payload: &Value) -> Result<Value> {
        self.post_json(&self.search_url, payload).await
    }

    /// POST a metadata query and return the raw response body.
    pub async fn metadata(&self, payload: &Value) -> Result<Value> {
        self.post_json(&self.metadata_url, payload).await
    }

    async fn post_json(&self, url: &str, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("API error {} from {}: {}", status, url, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Invalid JSON from {}", url))
    }

    /// GET a single data page. Exposed separately so the pagination loop
    /// and tests can drive individual requests.
    pub async fn data_page(&self, params: &[(String, String)]) -> Result<Value> {
        let response = self
            .http
            .get(&self.data_url)
            .header("Accept", "application/json")
            .query(params)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.data_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("API error {} from {}: {}", status, self.data_url, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Invalid JSON from {}", self.data_url))
    }

    /// Fetch all observations for a query, following pagination.
    ///
    /// Each page carries `value` (the records) and `count` (the reported
    /// total). The loop stops on an empty page, when the accumulated set
    /// covers the reported total, or at [`FETCH_CEILING`] records exactly.
    pub async fn fetch_observations(&self, query: &DataQuery) -> Result<Vec<Observation>> {
        let base_params = query_params(query);
        let mut all: Vec<Observation> = Vec::new();

        loop {
            let mut params = base_params.clone();
            params.push(("skip".to_string(), all.len().to_string()));

            let body = self.data_page(&params).await?;

            let values = match body.get("value").and_then(|v| v.as_array()) {
                Some(v) if !v.is_empty() => v,
                _ => break,
            };

            for v in values {
                if let Value::Object(record) = v {
                    all.push(record.clone());
                }
            }

            if all.len() >= FETCH_CEILING {
                all.truncate(FETCH_CEILING);
                tracing::warn!(
                    indicator = %query.indicator,
                    "record ceiling reached, truncating fetch at {}",
                    FETCH_CEILING
                );
                break;
            }

            let total = body.get("count").and_then(|c| c.as_u64()).unwrap_or(0) as usize;
            tracing::debug!(
                fetched = all.len(),
                total,
                indicator = %query.indicator,
                "fetched data page"
            );
            if all.len() >= total {
                break;
            }
        }

        Ok(all)
    }
}

/// Build the query parameter list for the data endpoint.
fn query_params(query: &DataQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("DATABASE_ID".to_string(), query.database.clone()),
        ("INDICATOR".to_string(), query.indicator.clone()),
    ];

    // A single year filter maps to an inclusive from/to range.
    if let Some(year) = &query.year {
        params.push(("timePeriodFrom".to_string(), year.clone()));
        params.push(("timePeriodTo".to_string(), year.clone()));
    }
    if let Some(countries) = &query.countries {
        params.push(("REF_AREA".to_string(), countries.clone()));
    }
    if let Some(sex) = &query.sex {
        params.push(("SEX".to_string(), sex.clone()));
    }
    if let Some(age) = &query.age {
        params.push(("AGE".to_string(), age.clone()));
    }

    params
}

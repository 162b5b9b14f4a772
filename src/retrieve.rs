//! Observation retrieval and result shaping.
//!
//! [`retrieve_data`] fetches observations through the paginated client and
//! shapes them for downstream consumption. Shaping always runs in the same
//! order:
//!
//! 1. drop aggregate regions (income groups, regional rollups)
//! 2. sort by observation value, null-valued records last
//! 3. truncate to the record limit
//! 4. compact each record to its four essential fields
//!
//! The summary (country count, years covered, applied filters) is computed
//! after the limit but before compaction, so it reflects exactly the records
//! returned. Compaction is idempotent: field reads fall back to the compact
//! names, so re-shaping already-compact records is a no-op.

use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use crate::aggregates::is_aggregate;
use crate::client::StatApiClient;
use crate::models::{DataQuery, Observation};

/// Envelope returned by [`retrieve_data`].
#[derive(Debug, Clone, Serialize)]
pub struct RetrieveOutcome {
    pub success: bool,
    pub record_count: usize,
    pub total_available: usize,
    pub data: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<DataSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RetrieveOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            record_count: 0,
            total_available: 0,
            data: Vec::new(),
            summary: None,
            error: Some(message.into()),
        }
    }
}

/// Summary of a shaped result set.
#[derive(Debug, Clone, Serialize)]
pub struct DataSummary {
    /// Number of distinct regions in the returned records.
    pub countries: usize,
    /// Sorted distinct time periods in the returned records.
    pub years: Vec<String>,
    pub applied_filters: AppliedFilters,
}

/// Echo of the filters the caller requested.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedFilters {
    pub year: Option<String>,
    pub countries: Option<String>,
    pub sex: Option<String>,
    pub age: Option<String>,
}

impl AppliedFilters {
    fn from_query(query: &DataQuery) -> Self {
        Self {
            year: query.year.clone(),
            countries: query.countries.clone(),
            sex: query.sex.clone(),
            age: query.age.clone(),
        }
    }
}

/// Shaping controls, fixed before the pipeline runs.
#[derive(Debug, Clone)]
pub struct ShapeOptions {
    /// Maximum records to return. `None` or `Some(0)` returns everything.
    pub limit: Option<usize>,
    /// `"desc"` or `"asc"`. `None` keeps fetch order.
    pub sort_order: Option<String>,
    pub exclude_aggregates: bool,
    pub compact: bool,
}

impl Default for ShapeOptions {
    fn default() -> Self {
        Self {
            limit: Some(20),
            sort_order: Some("desc".to_string()),
            exclude_aggregates: true,
            compact: true,
        }
    }
}

/// Fetch observations for `query` and shape them per `opts`.
///
/// Never returns an error: fetch and shaping failures are folded into the
/// envelope with `success: false`.
pub async fn retrieve_data(
    client: &StatApiClient,
    query: &DataQuery,
    opts: &ShapeOptions,
) -> RetrieveOutcome {
    let records = match client.fetch_observations(query).await {
        Ok(records) => records,
        Err(e) => return RetrieveOutcome::failure(format!("{:#}", e)),
    };

    shape_records(records, query, opts)
}

/// Run the shaping pipeline over already-fetched records.
pub fn shape_records(
    records: Vec<Observation>,
    query: &DataQuery,
    opts: &ShapeOptions,
) -> RetrieveOutcome {
    let mut records = records;

    if opts.exclude_aggregates {
        records.retain(|r| !region_is_aggregate(r));
    }

    let order = opts.sort_order.as_deref().filter(|s| !s.is_empty());
    if let Some(order) = order {
        records = match sort_by_value(records, order) {
            Ok(sorted) => sorted,
            Err(message) => return RetrieveOutcome::failure(message),
        };
    }

    let total_available = records.len();

    let mut display: Vec<Observation> = records;
    if let Some(limit) = opts.limit {
        if limit > 0 {
            display.truncate(limit);
        }
    }

    let summary = summarize(&display, query);

    let data: Vec<Value> = if opts.compact {
        display.iter().map(compact_record).collect()
    } else {
        display.into_iter().map(Value::Object).collect()
    };

    RetrieveOutcome {
        success: true,
        record_count: data.len(),
        total_available,
        data,
        summary: Some(summary),
        error: None,
    }
}

// ============ Field access ============

/// Read a field by its raw name, falling back to the compact name. This is
/// what makes the pipeline idempotent over already-compact records.
fn field<'a>(record: &'a Observation, raw: &str, compact: &str) -> Option<&'a Value> {
    record.get(raw).or_else(|| record.get(compact))
}

fn region_code(record: &Observation) -> Option<&str> {
    field(record, "REF_AREA", "country").and_then(|v| v.as_str())
}

fn region_is_aggregate(record: &Observation) -> bool {
    region_code(record).map(is_aggregate).unwrap_or(false)
}

// ============ Sorting ============

/// Sort records by observation value. Records whose value is null or absent
/// are appended after the sorted block in their original order. Equal values
/// keep fetch order (the sort is stable).
///
/// A present but non-numeric value fails the whole operation.
fn sort_by_value(records: Vec<Observation>, order: &str) -> Result<Vec<Observation>, String> {
    let mut valued: Vec<(f64, Observation)> = Vec::new();
    let mut unvalued: Vec<Observation> = Vec::new();

    for record in records {
        match observation_value(&record) {
            Ok(Some(v)) => valued.push((v, record)),
            Ok(None) => unvalued.push(record),
            Err(raw) => {
                return Err(format!("Sorting failed: OBS_VALUE '{}' is not numeric", raw));
            }
        }
    }

    let descending = order.eq_ignore_ascii_case("desc");
    valued.sort_by(|a, b| {
        let cmp = a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal);
        if descending {
            cmp.reverse()
        } else {
            cmp
        }
    });

    let mut sorted: Vec<Observation> = valued.into_iter().map(|(_, r)| r).collect();
    sorted.extend(unvalued);
    Ok(sorted)
}

/// Parse a record's observation value.
///
/// `Ok(None)` for null or absent, `Ok(Some(v))` for numbers and numeric
/// strings, `Err(raw_text)` for anything else.
fn observation_value(record: &Observation) -> Result<Option<f64>, String> {
    match field(record, "OBS_VALUE", "value") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) => Ok(Some(v)),
            Err(_) => Err(s.clone()),
        },
        Some(other) => Err(other.to_string()),
    }
}

// ============ Summary ============

fn summarize(display: &[Observation], query: &DataQuery) -> DataSummary {
    let countries: HashSet<&str> = display
        .iter()
        .filter_map(|r| region_code(r))
        .filter(|c| !c.is_empty())
        .collect();

    let years: BTreeSet<String> = display
        .iter()
        .filter_map(|r| field(r, "TIME_PERIOD", "year"))
        .filter_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect();

    DataSummary {
        countries: countries.len(),
        years: years.into_iter().collect(),
        applied_filters: AppliedFilters::from_query(query),
    }
}

// ============ Compaction ============

/// Project a record down to its four essential fields.
fn compact_record(record: &Observation) -> Value {
    json!({
        "country": field(record, "REF_AREA", "country").cloned().unwrap_or(Value::Null),
        "country_name": field(record, "REF_AREA_label", "country_name").cloned().unwrap_or(Value::Null),
        "year": field(record, "TIME_PERIOD", "year").cloned().unwrap_or(Value::Null),
        "value": field(record, "OBS_VALUE", "value").cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(country: &str, year: &str, value: Value) -> Observation {
        let mut record = Observation::new();
        record.insert("REF_AREA".to_string(), json!(country));
        record.insert("REF_AREA_label".to_string(), json!(format!("{} label", country)));
        record.insert("TIME_PERIOD".to_string(), json!(year));
        record.insert("OBS_VALUE".to_string(), value);
        record.insert("UNIT_MEASURE".to_string(), json!("PT"));
        record
    }

    fn query() -> DataQuery {
        DataQuery {
            indicator: "WB_WDI_SP_POP_TOTL".to_string(),
            database: "WB_WDI".to_string(),
            ..DataQuery::default()
        }
    }

    fn options() -> ShapeOptions {
        ShapeOptions::default()
    }

    #[test]
    fn test_aggregates_are_filtered() {
        let records = vec![
            obs("USA", "2023", json!(1.0)),
            obs("WLD", "2023", json!(8.0)),
            obs("KEN", "2023", json!(2.0)),
            obs("EUU", "2023", json!(4.0)),
        ];
        let outcome = shape_records(records, &query(), &options());
        assert!(outcome.success);
        assert_eq!(outcome.total_available, 2);
        for record in &outcome.data {
            let code = record["country"].as_str().unwrap();
            assert!(!is_aggregate(code), "aggregate {} leaked through", code);
        }
    }

    #[test]
    fn test_sort_desc_with_nulls_last() {
        let records = vec![
            obs("AAA", "2023", json!(5.0)),
            obs("BBB", "2023", Value::Null),
            obs("CCC", "2023", json!(9.0)),
            obs("DDD", "2023", json!(1.0)),
        ];
        let mut opts = options();
        opts.compact = false;
        let outcome = shape_records(records, &query(), &opts);
        let order: Vec<&str> = outcome
            .data
            .iter()
            .map(|r| r["REF_AREA"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["CCC", "AAA", "DDD", "BBB"]);
    }

    #[test]
    fn test_sort_asc() {
        let records = vec![
            obs("AAA", "2023", json!(5.0)),
            obs("BBB", "2023", json!(1.0)),
            obs("CCC", "2023", json!(9.0)),
        ];
        let mut opts = options();
        opts.sort_order = Some("asc".to_string());
        let outcome = shape_records(records, &query(), &opts);
        let order: Vec<&str> = outcome
            .data
            .iter()
            .map(|r| r["country"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["BBB", "AAA", "CCC"]);
    }

    #[test]
    fn test_sort_ties_keep_fetch_order() {
        let records = vec![
            obs("AAA", "2023", json!(3.0)),
            obs("BBB", "2023", json!(3.0)),
            obs("CCC", "2023", json!(3.0)),
        ];
        let outcome = shape_records(records, &query(), &options());
        let order: Vec<&str> = outcome
            .data
            .iter()
            .map(|r| r["country"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["AAA", "BBB", "CCC"]);
    }

    #[test]
    fn test_numeric_strings_sort_numerically() {
        let records = vec![
            obs("AAA", "2023", json!("9.5")),
            obs("BBB", "2023", json!("100")),
            obs("CCC", "2023", json!("20.25")),
        ];
        let outcome = shape_records(records, &query(), &options());
        let order: Vec<&str> = outcome
            .data
            .iter()
            .map(|r| r["country"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["BBB", "CCC", "AAA"]);
    }

    #[test]
    fn test_non_numeric_value_fails_with_field_name() {
        let records = vec![
            obs("AAA", "2023", json!(1.0)),
            obs("BBB", "2023", json!("n/a")),
        ];
        let outcome = shape_records(records, &query(), &options());
        assert!(!outcome.success);
        let error = outcome.error.unwrap();
        assert!(error.contains("OBS_VALUE"), "error was: {}", error);
        assert!(error.contains("n/a"), "error was: {}", error);
        assert!(outcome.data.is_empty());
    }

    #[test]
    fn test_no_sort_keeps_fetch_order() {
        let records = vec![
            obs("AAA", "2023", json!(1.0)),
            obs("BBB", "2023", json!(9.0)),
        ];
        let mut opts = options();
        opts.sort_order = None;
        let outcome = shape_records(records, &query(), &opts);
        let order: Vec<&str> = outcome
            .data
            .iter()
            .map(|r| r["country"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["AAA", "BBB"]);
    }

    #[test]
    fn test_limit_applies_after_sort() {
        let records = vec![
            obs("AAA", "2023", json!(1.0)),
            obs("BBB", "2023", json!(9.0)),
            obs("CCC", "2023", json!(5.0)),
        ];
        let mut opts = options();
        opts.limit = Some(2);
        let outcome = shape_records(records, &query(), &opts);
        assert_eq!(outcome.record_count, 2);
        assert_eq!(outcome.total_available, 3);
        assert_eq!(outcome.data[0]["country"], json!("BBB"));
        assert_eq!(outcome.data[1]["country"], json!("CCC"));
    }

    #[test]
    fn test_limit_zero_returns_everything() {
        let records = vec![
            obs("AAA", "2023", json!(1.0)),
            obs("BBB", "2023", json!(2.0)),
        ];
        let mut opts = options();
        opts.limit = Some(0);
        let outcome = shape_records(records, &query(), &opts);
        assert_eq!(outcome.record_count, 2);
    }

    #[test]
    fn test_compaction_projects_four_fields() {
        let records = vec![obs("USA", "2023", json!(42.0))];
        let outcome = shape_records(records, &query(), &options());
        let record = outcome.data[0].as_object().unwrap();
        assert_eq!(record.len(), 4);
        assert_eq!(record["country"], json!("USA"));
        assert_eq!(record["country_name"], json!("USA label"));
        assert_eq!(record["year"], json!("2023"));
        assert_eq!(record["value"], json!(42.0));
    }

    #[test]
    fn test_compaction_is_idempotent() {
        let records = vec![
            obs("USA", "2023", json!(42.0)),
            obs("KEN", "2022", Value::Null),
        ];
        let first = shape_records(records, &query(), &options());

        // Feed the compacted output back through the same pipeline.
        let compact_records: Vec<Observation> = first
            .data
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect();
        let second = shape_records(compact_records, &query(), &options());

        assert_eq!(
            serde_json::to_value(&first.data).unwrap(),
            serde_json::to_value(&second.data).unwrap()
        );
        assert_eq!(first.record_count, second.record_count);
        let s1 = first.summary.unwrap();
        let s2 = second.summary.unwrap();
        assert_eq!(s1.countries, s2.countries);
        assert_eq!(s1.years, s2.years);
    }

    #[test]
    fn test_empty_input_yields_empty_success() {
        let outcome = shape_records(Vec::new(), &query(), &options());
        assert!(outcome.success);
        assert_eq!(outcome.record_count, 0);
        assert_eq!(outcome.total_available, 0);
        assert!(outcome.data.is_empty());
        let summary = outcome.summary.unwrap();
        assert_eq!(summary.countries, 0);
        assert!(summary.years.is_empty());
    }

    #[test]
    fn test_fully_filtered_input_yields_empty_success() {
        let records = vec![obs("WLD", "2023", json!(8.0)), obs("HIC", "2023", json!(2.0))];
        let outcome = shape_records(records, &query(), &options());
        assert!(outcome.success);
        assert_eq!(outcome.record_count, 0);
        assert_eq!(outcome.total_available, 0);
    }

    #[test]
    fn test_summary_reflects_returned_records_only() {
        let records = vec![
            obs("AAA", "2020", json!(9.0)),
            obs("BBB", "2021", json!(5.0)),
            obs("CCC", "2022", json!(1.0)),
        ];
        let mut opts = options();
        opts.limit = Some(2);
        let outcome = shape_records(records, &query(), &opts);
        let summary = outcome.summary.unwrap();
        // CCC was truncated away, so 2022 must not appear.
        assert_eq!(summary.countries, 2);
        assert_eq!(summary.years, vec!["2020".to_string(), "2021".to_string()]);
    }

    #[test]
    fn test_applied_filters_echo_query() {
        let mut q = query();
        q.year = Some("2023".to_string());
        q.countries = Some("USA,KEN".to_string());
        q.sex = Some("F".to_string());
        let outcome = shape_records(vec![obs("USA", "2023", json!(1.0))], &q, &options());
        let filters = outcome.summary.unwrap().applied_filters;
        assert_eq!(filters.year.as_deref(), Some("2023"));
        assert_eq!(filters.countries.as_deref(), Some("USA,KEN"));
        assert_eq!(filters.sex.as_deref(), Some("F"));
        assert_eq!(filters.age, None);
    }

    #[test]
    fn test_full_pipeline_shape() {
        // Eight records: two aggregates, one null value.
        let records = vec![
            obs("WLD", "2023", json!(8000.0)),
            obs("USA", "2023", json!(330.0)),
            obs("IDN", "2023", json!(270.0)),
            obs("EUU", "2023", json!(450.0)),
            obs("KEN", "2023", json!(54.0)),
            obs("BRA", "2023", json!(214.0)),
            obs("NGA", "2023", Value::Null),
            obs("JPN", "2023", json!(125.0)),
        ];
        let mut opts = options();
        opts.limit = Some(5);
        let outcome = shape_records(records, &query(), &opts);

        assert!(outcome.success);
        assert_eq!(outcome.record_count, 5);
        assert_eq!(outcome.total_available, 6);

        let order: Vec<&str> = outcome
            .data
            .iter()
            .map(|r| r["country"].as_str().unwrap())
            .collect();
        // Descending values, the null-valued record truncated away.
        assert_eq!(order, vec!["USA", "IDN", "BRA", "JPN", "KEN"]);

        let summary = outcome.summary.unwrap();
        assert_eq!(summary.countries, 5);
        assert_eq!(summary.years, vec!["2023".to_string()]);
    }

    #[test]
    fn test_null_value_survives_within_limit() {
        let records = vec![
            obs("AAA", "2023", json!(2.0)),
            obs("BBB", "2023", Value::Null),
            obs("CCC", "2023", json!(7.0)),
        ];
        let outcome = shape_records(records, &query(), &options());
        let order: Vec<&str> = outcome
            .data
            .iter()
            .map(|r| r["country"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["CCC", "AAA", "BBB"]);
        assert_eq!(outcome.data[2]["value"], Value::Null);
    }

    #[test]
    fn test_summary_with_numeric_time_periods() {
        let mut record = obs("USA", "2023", json!(1.0));
        record.insert("TIME_PERIOD".to_string(), json!(2023));
        let outcome = shape_records(vec![record], &query(), &options());
        let summary = outcome.summary.unwrap();
        assert_eq!(summary.years, vec!["2023".to_string()]);
    }
}

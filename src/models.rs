//! Core data models shared across the retrieval pipeline.
//!
//! These types represent the observations, dataset candidates, and query
//! parameters that flow between the API client, the result shaper, and the
//! AI selection layers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Raw observation record as returned by the data endpoint.
///
/// Records are schemaless JSON objects. The pipeline reads `REF_AREA`,
/// `REF_AREA_label`, `TIME_PERIOD`, and `OBS_VALUE` when present and carries
/// everything else through untouched.
pub type Observation = Map<String, Value>;

/// Parameters for a data retrieval request.
#[derive(Debug, Clone, Default)]
pub struct DataQuery {
    pub indicator: String,
    pub database: String,
    pub year: Option<String>,
    pub countries: Option<String>,
    pub sex: Option<String>,
    pub age: Option<String>,
}

/// A dataset candidate returned by the remote search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub indicator: String,
    pub name: String,
    pub database: String,
    pub search_score: f64,
}

/// A candidate formatted for AI review, carrying its 1-based rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub rank: usize,
    pub name: String,
    pub indicator: String,
    pub database: String,
    pub score: f64,
}

impl RankedCandidate {
    pub fn from_candidate(rank: usize, c: &SearchCandidate) -> Self {
        Self {
            rank,
            name: c.name.clone(),
            indicator: c.indicator.clone(),
            database: c.database.clone(),
            score: c.search_score,
        }
    }
}

/// Filter parameters extracted from free-form user text.
///
/// Keys follow the data endpoint's parameter names (`REF_AREA`, `SEX`,
/// `AGE`, `timePeriodFrom`, ...). A `BTreeMap` keeps serialization order
/// deterministic.
pub type ExtractedParams = BTreeMap<String, String>;

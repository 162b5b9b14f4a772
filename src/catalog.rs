//! Static indicator catalogs and offline search.
//!
//! Two JSON catalogs ship with the application: a searchable metadata
//! catalog and a curated list of popular indicators. Both are loaded
//! lazily on first access and cached for the process lifetime, never
//! invalidated. [`CatalogCache::preloaded`] lets tests inject entries
//! without touching the filesystem.
//!
//! Local search scores each entry against the lowercased query in tiers:
//!
//! | Match | Score |
//! |-------|-------|
//! | exact code | 100 |
//! | code fragment (query contains a separator) | 90 |
//! | whole word of the name | 80 |
//! | substring of the name | 70 |
//! | substring of the description | 40 |
//!
//! A word is a maximal alphanumeric run, so punctuation inside names does
//! not defeat whole-word matches. Bare words are never scored against the
//! code body: short English words occur inside unrelated indicator codes
//! too often, so only separator-carrying queries count as code fragments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::CatalogConfig;

const DESCRIPTION_BUDGET: usize = 200;
const SOURCE_BUDGET: usize = 100;
const POPULAR_DESCRIPTION_BUDGET: usize = 150;

/// One catalog entry as stored on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    indicators: Vec<CatalogEntry>,
}

/// Lazily-populated, read-only catalog store.
pub struct CatalogCache {
    metadata_path: PathBuf,
    popular_path: PathBuf,
    metadata: OnceLock<Vec<CatalogEntry>>,
    popular: OnceLock<Vec<CatalogEntry>>,
}

impl CatalogCache {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            metadata_path: config.metadata_path.clone(),
            popular_path: config.popular_path.clone(),
            metadata: OnceLock::new(),
            popular: OnceLock::new(),
        }
    }

    /// Build a cache with entries already in place. The filesystem is never
    /// consulted.
    pub fn preloaded(metadata: Vec<CatalogEntry>, popular: Vec<CatalogEntry>) -> Self {
        let cache = Self {
            metadata_path: PathBuf::new(),
            popular_path: PathBuf::new(),
            metadata: OnceLock::new(),
            popular: OnceLock::new(),
        };
        let _ = cache.metadata.set(metadata);
        let _ = cache.popular.set(popular);
        cache
    }

    pub fn metadata(&self) -> &[CatalogEntry] {
        self.metadata.get_or_init(|| load_entries(&self.metadata_path))
    }

    pub fn popular(&self) -> &[CatalogEntry] {
        self.popular.get_or_init(|| load_entries(&self.popular_path))
    }
}

/// Read a catalog file. A missing or unparseable file yields an empty
/// catalog; the operations report that as a failure envelope.
fn load_entries(path: &Path) -> Vec<CatalogEntry> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("could not read catalog {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    match serde_json::from_str::<CatalogFile>(&content) {
        Ok(file) => file.indicators,
        Err(e) => {
            tracing::warn!("could not parse catalog {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

// ============ Local search ============

/// A scored catalog match with display-truncated text fields.
#[derive(Debug, Clone, Serialize)]
pub struct LocalMatch {
    pub indicator: String,
    pub name: String,
    pub description: String,
    pub source: String,
    pub relevance_score: u32,
}

/// Envelope returned by [`search_local_indicators`].
#[derive(Debug, Clone, Serialize)]
pub struct LocalSearchOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub total_matches: usize,
    pub results: Vec<LocalMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LocalSearchOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            query: None,
            total_matches: 0,
            results: Vec::new(),
            note: None,
            error: Some(message.into()),
        }
    }
}

/// Search the metadata catalog offline.
///
/// Entries are scored in tiers (see the module docs), sorted descending by
/// score with catalog order breaking ties, and truncated to `limit`.
pub fn search_local_indicators(cache: &CatalogCache, query: &str, limit: usize) -> LocalSearchOutcome {
    let entries = cache.metadata();

    if entries.is_empty() {
        return LocalSearchOutcome::failure(
            "Metadata file not found. Please ensure metadata_indicators.json exists.",
        );
    }

    let query_lower = query.to_lowercase();

    let mut results: Vec<LocalMatch> = entries
        .iter()
        .filter_map(|entry| {
            score_entry(entry, &query_lower).map(|score| LocalMatch {
                indicator: entry.code.clone(),
                name: entry.name.clone(),
                description: truncate_display(&entry.description, DESCRIPTION_BUDGET),
                source: truncate_display(&entry.source, SOURCE_BUDGET),
                relevance_score: score,
            })
        })
        .collect();

    // Stable sort keeps catalog order for equal scores.
    results.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
    results.truncate(limit);

    LocalSearchOutcome {
        success: true,
        query: Some(query.to_string()),
        total_matches: results.len(),
        results,
        note: Some("Local search - instant results from cached metadata".to_string()),
        error: None,
    }
}

/// Score one entry against a lowercased query. `None` excludes the entry.
pub fn score_entry(entry: &CatalogEntry, query_lower: &str) -> Option<u32> {
    let code_lower = entry.code.to_lowercase();

    if query_lower == code_lower {
        return Some(100);
    }
    if is_code_fragment(query_lower) && code_lower.contains(query_lower) {
        return Some(90);
    }

    let name_lower = entry.name.to_lowercase();
    if name_has_word(&name_lower, query_lower) {
        return Some(80);
    }
    if name_lower.contains(query_lower) {
        return Some(70);
    }
    if entry.description.to_lowercase().contains(query_lower) {
        return Some(40);
    }

    None
}

/// Code fragments carry at least one separator (`sp.pop`, `ny_gdp`).
fn is_code_fragment(query: &str) -> bool {
    !query.is_empty() && query.chars().any(|c| !c.is_alphanumeric())
}

fn name_has_word(name_lower: &str, query: &str) -> bool {
    name_lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| !word.is_empty() && word == query)
}

fn truncate_display(text: &str, budget: usize) -> String {
    if text.chars().count() > budget {
        let truncated: String = text.chars().take(budget).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    }
}

// ============ Popular indicators ============

/// A curated entry as presented in the grouped listing.
#[derive(Debug, Clone, Serialize)]
pub struct PopularEntry {
    pub code: String,
    pub name: String,
    pub description: String,
}

/// Envelope returned by [`list_popular_indicators`].
#[derive(Debug, Clone, Serialize)]
pub struct PopularOutcome {
    pub success: bool,
    pub total_indicators: usize,
    pub categories: Vec<String>,
    pub indicators_by_category: BTreeMap<String, Vec<PopularEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PopularOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            total_indicators: 0,
            categories: Vec::new(),
            indicators_by_category: BTreeMap::new(),
            note: None,
            error: Some(message.into()),
        }
    }
}

/// List the curated popular indicators grouped by category.
pub fn list_popular_indicators(cache: &CatalogCache) -> PopularOutcome {
    let entries = cache.popular();

    if entries.is_empty() {
        return PopularOutcome::failure(
            "Popular indicators file not found. Please ensure popular_indicators.json exists.",
        );
    }

    let mut by_category: BTreeMap<String, Vec<PopularEntry>> = BTreeMap::new();
    for entry in entries {
        let category = entry
            .category
            .clone()
            .unwrap_or_else(|| "Other".to_string());
        by_category.entry(category).or_default().push(PopularEntry {
            code: entry.code.clone(),
            name: entry.name.clone(),
            description: truncate_display(&entry.description, POPULAR_DESCRIPTION_BUDGET),
        });
    }

    PopularOutcome {
        success: true,
        total_indicators: entries.len(),
        categories: by_category.keys().cloned().collect(),
        indicators_by_category: by_category,
        note: Some(
            "These are the most commonly requested indicators. \
             Use search_local_indicators for more specific searches."
                .to_string(),
        ),
        error: None,
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://data360api.worldbank.org".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_ai_provider")]
    pub provider: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_ai_provider(),
            model: default_ai_model(),
            base_url: default_ai_base_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AiConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_ai_provider() -> String {
    "disabled".to_string()
}
fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Default number of search results requested from the search endpoint.
    #[serde(default = "default_top")]
    pub default_top: i64,
    /// Default record limit applied after filtering and sorting.
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_sort_order")]
    pub sort_order: String,
    #[serde(default = "default_true")]
    pub exclude_aggregates: bool,
    #[serde(default = "default_true")]
    pub compact_response: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top: default_top(),
            default_limit: default_limit(),
            sort_order: default_sort_order(),
            exclude_aggregates: true,
            compact_response: true,
        }
    }
}

fn default_top() -> i64 {
    20
}
fn default_limit() -> i64 {
    20
}
fn default_sort_order() -> String {
    "desc".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_metadata_path")]
    pub metadata_path: PathBuf,
    #[serde(default = "default_popular_path")]
    pub popular_path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            metadata_path: default_metadata_path(),
            popular_path: default_popular_path(),
        }
    }
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("./catalog/metadata_indicators.json")
}
fn default_popular_path() -> PathBuf {
    PathBuf::from("./catalog/popular_indicators.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Result count the agent is nudged to request per search.
    #[serde(default = "default_recommended_top")]
    pub recommended_top: i64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            recommended_top: default_recommended_top(),
        }
    }
}

fn default_max_iterations() -> u32 {
    10
}
fn default_recommended_top() -> i64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8799".to_string()
}

/// Load configuration from a TOML file.
///
/// A missing file yields the built-in defaults, so the CLI works out of the
/// box against the public API. A file that exists but fails to parse or
/// validate is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate api
    if config.api.base_url.trim().is_empty() {
        anyhow::bail!("api.base_url must not be empty");
    }
    if config.api.timeout_secs == 0 {
        anyhow::bail!("api.timeout_secs must be > 0");
    }

    // Validate ai
    match config.ai.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown ai provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.ai.is_enabled() && config.ai.model.trim().is_empty() {
        anyhow::bail!(
            "ai.model must be specified when provider is '{}'",
            config.ai.provider
        );
    }

    // Validate retrieval
    if !(1..=100).contains(&config.retrieval.default_top) {
        anyhow::bail!("retrieval.default_top must be in [1, 100]");
    }
    if config.retrieval.default_limit < 0 {
        anyhow::bail!("retrieval.default_limit must be >= 0");
    }
    match config.retrieval.sort_order.as_str() {
        "asc" | "desc" => {}
        other => anyhow::bail!("retrieval.sort_order must be asc or desc, got '{}'", other),
    }

    // Validate agent
    if config.agent.max_iterations == 0 {
        anyhow::bail!("agent.max_iterations must be >= 1");
    }
    if !(1..=100).contains(&config.agent.recommended_top) {
        anyhow::bail!("agent.recommended_top must be in [1, 100]");
    }

    // Validate server
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(config)
}

//! Tool trait, registry, and the built-in tool set.
//!
//! Tools are the server-facing surface of the pipeline. Each tool
//! publishes an OpenAI function-calling schema; the server validates
//! incoming parameters against it before dispatching to
//! [`Tool::execute`]. Results are envelopes serialized to JSON, so a
//! failed operation still returns HTTP 200 with `success: false`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::catalog::{list_popular_indicators, search_local_indicators, CatalogCache};
use crate::client::StatApiClient;
use crate::config::Config;
use crate::coverage::get_temporal_coverage;
use crate::models::DataQuery;
use crate::retrieve::{retrieve_data, ShapeOptions};
use crate::search::search_datasets;

/// An operation exposed over the tool server.
///
/// Registered at startup; listed via `GET /tools/list` and invoked via
/// `POST /tools/{name}`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores; doubles as the route path.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// Whether this tool ships with the server. Defaults to `false`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// OpenAI function-calling JSON Schema for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with parameters already validated against the schema.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Shared state handed to every tool execution.
pub struct ToolContext {
    pub config: Arc<Config>,
    pub client: StatApiClient,
    pub catalogs: Arc<CatalogCache>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = StatApiClient::new(&config.api)?;
        let catalogs = Arc::new(CatalogCache::new(&config.catalog));
        Ok(Self {
            config,
            client,
            catalogs,
        })
    }
}

/// Tool metadata as serialized in `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

/// Validate incoming JSON parameters against a tool's schema.
///
/// Checks required fields, type compatibility, and enum constraints.
/// Injects default values for missing optional fields. Properties
/// without a `type` accept any JSON value. Returns the validated (and
/// potentially enriched) parameters.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = params.as_object().cloned().unwrap_or_default();

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<String> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let mut result = params_obj.clone();

    for req_field in &required {
        if !params_obj.contains_key(req_field) {
            bail!("missing required parameter: {}", req_field);
        }
    }

    for (prop_name, prop_schema) in &properties {
        if let Some(value) = params_obj.get(prop_name) {
            if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                let type_ok = match expected_type {
                    "string" => value.is_string(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "number" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !type_ok {
                    bail!(
                        "parameter '{}' must be of type '{}', got {}",
                        prop_name,
                        expected_type,
                        json_type_name(value)
                    );
                }
            }

            if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                if !enum_values.contains(value) {
                    let allowed: Vec<String> = enum_values.iter().map(|v| v.to_string()).collect();
                    bail!(
                        "parameter '{}' must be one of [{}], got {}",
                        prop_name,
                        allowed.join(", "),
                        value
                    );
                }
            }
        } else if let Some(default) = prop_schema.get("default") {
            result.insert(prop_name.clone(), default.clone());
        }
    }

    Ok(Value::Object(result))
}

/// Return a human-readable name for a JSON value's type.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn str_param(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tools
// ═══════════════════════════════════════════════════════════════════════

/// Remote dataset search.
pub struct SearchDatasetsTool;

#[async_trait]
impl Tool for SearchDatasetsTool {
    fn name(&self) -> &str {
        "search_datasets"
    }

    fn description(&self) -> &str {
        "Search the statistical catalog for datasets matching a keyword query"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "search_query": { "type": "string", "description": "Keyword query, e.g. 'population total'" },
                "top": { "type": "integer", "description": "Max results", "default": 20 }
            },
            "required": ["search_query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["search_query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            bail!("search_query must not be empty");
        }
        let top = params["top"].as_i64().unwrap_or(20);

        let outcome = search_datasets(&ctx.client, query, top).await;
        Ok(serde_json::to_value(&outcome)?)
    }
}

/// Year-range lookup for one indicator.
pub struct TemporalCoverageTool;

#[async_trait]
impl Tool for TemporalCoverageTool {
    fn name(&self) -> &str {
        "get_temporal_coverage"
    }

    fn description(&self) -> &str {
        "Report the year range an indicator's observations cover"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "indicator": { "type": "string", "description": "Indicator code, e.g. 'WB_WDI_SP_POP_TOTL'" },
                "database": { "type": "string", "description": "Database id, e.g. 'WB_WDI'" }
            },
            "required": ["indicator", "database"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let indicator = params["indicator"].as_str().unwrap_or("");
        let database = params["database"].as_str().unwrap_or("");
        if indicator.trim().is_empty() || database.trim().is_empty() {
            bail!("indicator and database must not be empty");
        }

        let outcome = get_temporal_coverage(&ctx.client, indicator, database).await;
        Ok(serde_json::to_value(&outcome)?)
    }
}

/// Full retrieval pipeline: paginated fetch, then shaping.
pub struct RetrieveDataTool;

#[async_trait]
impl Tool for RetrieveDataTool {
    fn name(&self) -> &str {
        "retrieve_data"
    }

    fn description(&self) -> &str {
        "Fetch observations for an indicator with filtering, sorting, and compaction"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        // `year` deliberately carries no type: callers send 2023 or "2023"
        // and both are normalized to a string.
        serde_json::json!({
            "type": "object",
            "properties": {
                "indicator": { "type": "string", "description": "Indicator code" },
                "database": { "type": "string", "description": "Database id" },
                "year": { "description": "Year or year range start, as number or string" },
                "countries": { "type": "string", "description": "Comma-separated country codes, e.g. 'KEN,UGA'" },
                "sex": { "type": "string", "description": "Sex dimension code, e.g. 'F'" },
                "age": { "type": "string", "description": "Age dimension code, e.g. 'Y0T14'" },
                "limit": { "type": "integer", "description": "Max records to return", "default": 20 },
                "sort_order": { "type": "string", "enum": ["desc", "asc"], "default": "desc" },
                "exclude_aggregates": { "type": "boolean", "description": "Drop regional and income aggregates", "default": true },
                "compact_response": { "type": "boolean", "description": "Reduce records to country/year/value", "default": true }
            },
            "required": ["indicator", "database"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let indicator = params["indicator"].as_str().unwrap_or("");
        let database = params["database"].as_str().unwrap_or("");
        if indicator.trim().is_empty() || database.trim().is_empty() {
            bail!("indicator and database must not be empty");
        }

        let year = match params.get("year") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let query = DataQuery {
            indicator: indicator.to_string(),
            database: database.to_string(),
            year,
            countries: str_param(&params, "countries"),
            sex: str_param(&params, "sex"),
            age: str_param(&params, "age"),
        };

        let opts = ShapeOptions {
            limit: params["limit"].as_u64().map(|l| l as usize),
            sort_order: str_param(&params, "sort_order"),
            exclude_aggregates: params["exclude_aggregates"].as_bool().unwrap_or(true),
            compact: params["compact_response"].as_bool().unwrap_or(true),
        };

        let outcome = retrieve_data(&ctx.client, &query, &opts).await;
        Ok(serde_json::to_value(&outcome)?)
    }
}

/// Curated popular-indicator listing. No network access.
pub struct PopularIndicatorsTool;

#[async_trait]
impl Tool for PopularIndicatorsTool {
    fn name(&self) -> &str {
        "list_popular_indicators"
    }

    fn description(&self) -> &str {
        "List commonly requested indicators grouped by category"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let outcome = list_popular_indicators(&ctx.catalogs);
        Ok(serde_json::to_value(&outcome)?)
    }
}

/// Offline metadata search over the bundled catalog.
pub struct LocalSearchTool;

#[async_trait]
impl Tool for LocalSearchTool {
    fn name(&self) -> &str {
        "search_local_indicators"
    }

    fn description(&self) -> &str {
        "Search the bundled indicator metadata without network access"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Code fragment or keyword" },
                "limit": { "type": "integer", "description": "Max results", "default": 20 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        let limit = params["limit"].as_u64().unwrap_or(20) as usize;

        let outcome = search_local_indicators(&ctx.catalogs, query, limit);
        Ok(serde_json::to_value(&outcome)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of tools exposed by the server.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty tool registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Create a registry pre-loaded with the built-in tool set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchDatasetsTool));
        registry.register(Box::new(TemporalCoverageTool));
        registry.register(Box::new(RetrieveDataTool));
        registry.register(Box::new(PopularIndicatorsTool));
        registry.register(Box::new(LocalSearchTool));
        registry
    }

    /// Register a tool.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Get all registered tools.
    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Find a tool by name.
    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Metadata for every registered tool, in registration order.
    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                builtin: t.is_builtin(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

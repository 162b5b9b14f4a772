//! Bounded tool-calling agent loop.
//!
//! Runs a chat conversation in which the model can invoke the search
//! operations as tools. Each iteration executes at most one tool call,
//! feeds the JSON result back into the transcript, and continues until
//! the model replies with text or the iteration cap is hit. Unknown
//! tool names and malformed arguments become error results in the
//! transcript rather than aborting the loop.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::StatApiClient;
use crate::completion::{ChatMessage, ChatTurn, CompletionProvider};
use crate::config::Config;
use crate::orchestrate::ParamExtractor;
use crate::search::{advanced_search, search_datasets, search_summary, SearchOutcome, DEFAULT_SELECT};

const DEFAULT_TOP: i64 = 10;
const MAX_TOP: i64 = 100;

/// A tool invocation the model asked for, decoded and validated.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentRequest {
    SimpleSearch {
        reasoning: String,
        search_query: String,
        top: i64,
    },
    AdvancedSearch {
        reasoning: String,
        search_query: String,
        select: String,
        filter_query: Option<String>,
        top: i64,
        count: bool,
    },
    SearchSummary {
        reasoning: String,
    },
}

#[derive(Debug, Deserialize)]
struct SimpleSearchArgs {
    #[serde(default)]
    reasoning: String,
    search_query: String,
    top: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AdvancedSearchArgs {
    #[serde(default)]
    reasoning: String,
    search_query: String,
    select: Option<String>,
    filter_query: Option<String>,
    top: Option<i64>,
    count: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SearchSummaryArgs {
    #[serde(default)]
    reasoning: String,
}

impl AgentRequest {
    /// Decode a tool call by name. Fails on unknown names, missing
    /// required arguments, or a `top` outside 1..=100.
    pub fn parse(name: &str, arguments: &str) -> Result<Self> {
        match name {
            "simple_search" => {
                let args: SimpleSearchArgs = serde_json::from_str(arguments)
                    .map_err(|e| anyhow!("Invalid simple_search arguments: {}", e))?;
                Ok(Self::SimpleSearch {
                    reasoning: args.reasoning,
                    search_query: args.search_query,
                    top: validate_top(args.top)?,
                })
            }
            "advanced_search" => {
                let args: AdvancedSearchArgs = serde_json::from_str(arguments)
                    .map_err(|e| anyhow!("Invalid advanced_search arguments: {}", e))?;
                Ok(Self::AdvancedSearch {
                    reasoning: args.reasoning,
                    search_query: args.search_query,
                    select: args.select.unwrap_or_else(|| DEFAULT_SELECT.to_string()),
                    filter_query: args.filter_query,
                    top: validate_top(args.top)?,
                    count: args.count.unwrap_or(true),
                })
            }
            "get_search_summary" => {
                let args: SearchSummaryArgs = serde_json::from_str(arguments)
                    .map_err(|e| anyhow!("Invalid get_search_summary arguments: {}", e))?;
                Ok(Self::SearchSummary {
                    reasoning: args.reasoning,
                })
            }
            other => bail!("Unknown tool: {}", other),
        }
    }

    fn reasoning(&self) -> &str {
        match self {
            Self::SimpleSearch { reasoning, .. } => reasoning,
            Self::AdvancedSearch { reasoning, .. } => reasoning,
            Self::SearchSummary { reasoning } => reasoning,
        }
    }
}

fn validate_top(top: Option<i64>) -> Result<i64> {
    let top = top.unwrap_or(DEFAULT_TOP);
    if !(1..=MAX_TOP).contains(&top) {
        bail!("top must be between 1 and {}, got {}", MAX_TOP, top);
    }
    Ok(top)
}

/// One iteration's record: which tool ran, why, and how it went.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub iteration: usize,
    pub tool: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Envelope returned by [`run_agent`].
#[derive(Debug, Serialize)]
pub struct AgentOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// The most recent search envelope produced during the loop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_search: Option<SearchOutcome>,
    pub iterations: usize,
    pub transcript: Vec<TranscriptEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// OpenAI function schemas for the three agent tools.
pub fn agent_tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "simple_search",
                "description": "Search the statistical catalog with a keyword query. Use this first for most questions.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "reasoning": {
                            "type": "string",
                            "description": "Why this search helps answer the question"
                        },
                        "search_query": {
                            "type": "string",
                            "description": "Keyword query, e.g. 'population total'"
                        },
                        "top": {
                            "type": "integer",
                            "description": "Number of results to return (1-100, default 10)"
                        }
                    },
                    "required": ["reasoning", "search_query"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "advanced_search",
                "description": "Search with an OData filter expression and a custom field selection. Use when results must be narrowed to a specific database or topic.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "reasoning": {
                            "type": "string",
                            "description": "Why a filtered search is needed"
                        },
                        "search_query": { "type": "string" },
                        "select": {
                            "type": "string",
                            "description": "Comma-separated fields to return"
                        },
                        "filter_query": {
                            "type": "string",
                            "description": "OData filter, e.g. \"database_id eq 'WB_WDI'\""
                        },
                        "top": { "type": "integer" },
                        "count": {
                            "type": "boolean",
                            "description": "Include the total match count"
                        }
                    },
                    "required": ["reasoning", "search_query"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "get_search_summary",
                "description": "Describe the search endpoint's capabilities, common databases, and filter examples. No network access.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "reasoning": { "type": "string" }
                    },
                    "required": ["reasoning"]
                }
            }
        }),
    ]
}

fn opening_prompt(question: &str, recommended_top: i64) -> String {
    format!(
        r#"You are a research assistant for a statistical indicator catalog.

Answer the user's question by searching the catalog with the tools
provided. Guidance:
- Start with simple_search; use top={recommended_top} so you see enough candidates.
- Use advanced_search with an OData filter when results need narrowing.
- Call get_search_summary if you are unsure what the search supports.
- Prefer aggregate ("total") indicators unless the user asked for a
  demographic breakdown.
- When you have enough information, reply with a concise text answer
  naming the best indicator code, its name, and its database.

User Question: {question}"#
    )
}

/// Run the bounded agent loop for one question.
///
/// Returns after the model's first text reply, or after
/// `config.agent.max_iterations` tool executions, whichever comes
/// first. A provider failure ends the loop with `success: false`.
pub async fn run_agent(
    client: &StatApiClient,
    provider: &dyn CompletionProvider,
    extractor: &dyn ParamExtractor,
    config: &Config,
    question: &str,
) -> AgentOutcome {
    let schemas = agent_tool_schemas();
    let mut messages = vec![ChatMessage::user(opening_prompt(
        question,
        config.agent.recommended_top,
    ))];

    let mut transcript = Vec::new();
    let mut last_search: Option<SearchOutcome> = None;
    let mut answer = None;
    let mut iterations = 0usize;

    for iteration in 1..=config.agent.max_iterations {
        let turn = match provider.chat(&messages, &schemas).await {
            Ok(turn) => turn,
            Err(e) => {
                return AgentOutcome {
                    success: false,
                    answer: None,
                    last_search: finish_search(last_search, extractor, question),
                    iterations,
                    transcript,
                    error: Some(format!("{:#}", e)),
                };
            }
        };

        match turn {
            ChatTurn::Text(text) => {
                answer = Some(text);
                break;
            }
            ChatTurn::ToolCall {
                id,
                name,
                arguments,
                raw,
            } => {
                iterations = iteration as usize;
                messages.push(ChatMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(raw),
                    tool_call_id: None,
                });

                let (result, entry) = match AgentRequest::parse(&name, &arguments) {
                    Ok(request) => {
                        tracing::debug!(iteration, tool = %name, "agent tool call");
                        let result = execute(client, config, &request).await;
                        if let Some(outcome) = result.1 {
                            last_search = Some(outcome);
                        }
                        (
                            result.0,
                            TranscriptEntry {
                                iteration: iterations,
                                tool: name.clone(),
                                reasoning: request.reasoning().to_string(),
                                error: None,
                            },
                        )
                    }
                    Err(e) => {
                        tracing::warn!(iteration, tool = %name, "bad agent tool call: {:#}", e);
                        (
                            json!({ "success": false, "error": format!("{:#}", e) }),
                            TranscriptEntry {
                                iteration: iterations,
                                tool: name.clone(),
                                reasoning: String::new(),
                                error: Some(format!("{:#}", e)),
                            },
                        )
                    }
                };

                transcript.push(entry);
                let payload = serde_json::to_string(&result)
                    .unwrap_or_else(|_| r#"{"success":false,"error":"serialization failed"}"#.into());
                messages.push(ChatMessage::tool_result(id, payload));
            }
        }
    }

    AgentOutcome {
        success: true,
        answer,
        last_search: finish_search(last_search, extractor, question),
        iterations,
        transcript,
        error: None,
    }
}

/// Execute one validated request. Returns the JSON fed back to the
/// model and, for search requests, the envelope retained as
/// `last_search`.
async fn execute(
    client: &StatApiClient,
    config: &Config,
    request: &AgentRequest,
) -> (Value, Option<SearchOutcome>) {
    match request {
        AgentRequest::SimpleSearch {
            search_query, top, ..
        } => {
            let outcome = search_datasets(client, search_query, *top).await;
            let value = serde_json::to_value(&outcome).unwrap_or_else(|_| json!({ "success": false }));
            (value, Some(outcome))
        }
        AgentRequest::AdvancedSearch {
            search_query,
            select,
            filter_query,
            top,
            count,
            ..
        } => {
            let outcome = advanced_search(
                client,
                search_query,
                select,
                filter_query.as_deref(),
                *top,
                *count,
            )
            .await;
            let value = serde_json::to_value(&outcome).unwrap_or_else(|_| json!({ "success": false }));
            (value, Some(outcome))
        }
        AgentRequest::SearchSummary { .. } => (search_summary(&config.api.base_url), None),
    }
}

/// Attach extracted parameters to the retained search envelope.
fn finish_search(
    last_search: Option<SearchOutcome>,
    extractor: &dyn ParamExtractor,
    question: &str,
) -> Option<SearchOutcome> {
    last_search.map(|mut outcome| {
        let params = extractor.extract(question);
        if !params.is_empty() {
            outcome.extracted_params = Some(params);
        }
        outcome
    })
}

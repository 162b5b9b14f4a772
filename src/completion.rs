//! Completion provider abstraction and implementations.
//!
//! Defines the [`CompletionProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns errors; used when AI is not configured.
//!   Callers that treat AI as best-effort (query enhancement, result
//!   selection) degrade to their deterministic fallbacks.
//! - **[`OpenAIProvider`]** — calls an OpenAI-compatible chat-completions
//!   endpoint with retry and backoff.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust,no_run
//! # use datascope::config::AiConfig;
//! # use datascope::completion::create_provider;
//! let config = AiConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! The OpenAI provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::AiConfig;

/// One message in a chat conversation, in OpenAI wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Present on assistant messages that requested a tool call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    /// Present on tool-result messages, echoing the call being answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Options for a single-prompt completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Request `response_format: json_object` so the reply parses as JSON.
    pub json_object: bool,
}

/// What the model did with one chat turn.
#[derive(Debug, Clone)]
pub enum ChatTurn {
    /// A plain text reply — the conversation is done.
    Text(String),
    /// The model requested a tool invocation.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
        /// The raw `tool_calls` array, echoed back into the transcript.
        raw: Value,
    },
}

/// Trait for chat-completion providers.
///
/// Both methods go through the same backend; [`complete`] is the
/// single-prompt path used by the enhancement and selection layers,
/// [`chat`] is the tool-call-aware path used by the agent loop.
///
/// [`complete`]: CompletionProvider::complete
/// [`chat`]: CompletionProvider::chat
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Complete a single user prompt and return the reply text.
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> Result<String>;

    /// Run one conversation turn, offering `tools` (OpenAI function
    /// schemas) to the model.
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ChatTurn>;
}

// ============ Disabled Provider ============

/// A no-op completion provider that always returns errors.
///
/// Used when `ai.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl CompletionProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str, _opts: &CompletionOptions) -> Result<String> {
        bail!("AI provider is disabled")
    }

    async fn chat(&self, _messages: &[ChatMessage], _tools: &[Value]) -> Result<ChatTurn> {
        bail!("AI provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Completion provider for OpenAI-compatible chat-completions endpoints.
///
/// Calls `POST {base_url}/chat/completions` with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    model: String,
    endpoint: String,
    max_retries: u32,
    http: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &AiConfig) -> Result<Self> {
        // Verify API key is available
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let base = config.base_url.trim_end_matches('/');

        Ok(Self {
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", base),
            max_retries: config.max_retries,
            http,
        })
    }

    /// POST a chat-completions body with retry/backoff and return the
    /// first choice's `message` object.
    ///
    /// Retry strategy:
    /// - HTTP 429 or 5xx → retry with exponential backoff
    /// - HTTP 4xx (not 429) → fail immediately
    /// - Network error → retry
    async fn request_message(&self, body: &Value) -> Result<Value> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return extract_message(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Completion API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Completion API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Completion failed after retries")))
    }
}

/// Pull `choices[0].message` out of a chat-completions response.
fn extract_message(json: &Value) -> Result<Value> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices"))
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(t) = opts.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(m) = opts.max_tokens {
            body["max_tokens"] = serde_json::json!(m);
        }
        if opts.json_object {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let message = self.request_message(&body).await?;
        message
            .get("content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Completion reply carried no content"))
    }

    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ChatTurn> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }

        let message = self.request_message(&body).await?;

        // A tool call takes precedence over any accompanying content.
        if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
            if let Some(call) = calls.first() {
                let id = call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let function = call
                    .get("function")
                    .ok_or_else(|| anyhow::anyhow!("Tool call missing function block"))?;
                let name = function
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("Tool call missing function name"))?
                    .to_string();
                let arguments = function
                    .get("arguments")
                    .and_then(|v| v.as_str())
                    .unwrap_or("{}")
                    .to_string();
                return Ok(ChatTurn::ToolCall {
                    id,
                    name,
                    arguments,
                    raw: Value::Array(calls.clone()),
                });
            }
        }

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(ChatTurn::Text(text))
    }
}

/// Create the appropriate [`CompletionProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
///
/// # Errors
///
/// Returns an error for unknown provider names or if the OpenAI provider
/// cannot be initialized (missing API key).
pub fn create_provider(config: &AiConfig) -> Result<Box<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown AI provider: {}", other),
    }
}

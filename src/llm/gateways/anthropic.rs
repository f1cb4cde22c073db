//! Anthropic Gateway for LLM interactions.
//!
//! Talks to the Anthropic Messages API, buffered and streamed, with tool use.

use crate::error::{QuartoChatError, Result};
use crate::llm::gateway::{CompletionConfig, LlmGateway, StreamChunk};
use crate::llm::gateways::sse::SseLineBuffer;
use crate::llm::gateways::anthropic_messages_adapter::{
    adapt_messages_to_anthropic, adapt_tools_to_anthropic, parse_content_blocks,
};
use crate::llm::models::{LlmGatewayResponse, LlmMessage, LlmToolCall};
use crate::llm::tools::LlmTool;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::pin::Pin;
use tracing::{debug, info, warn};

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Required Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for connecting to the Anthropic API.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Option<std::time::Duration>,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            timeout: None,
        }
    }
}

/// Gateway for Anthropic Claude models.
pub struct AnthropicGateway {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicGateway {
    /// Create a new Anthropic gateway with custom configuration.
    pub fn with_config(config: AnthropicConfig) -> Self {
        let mut client_builder = Client::builder();

        if let Some(timeout) = config.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let client = client_builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build configured HTTP client, using defaults");
            Client::new()
        });

        Self { client, config }
    }

    /// Create gateway with custom API key and base URL.
    pub fn with_api_key_and_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self::with_config(AnthropicConfig {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    fn build_body(
        &self,
        model: &str,
        messages: &[LlmMessage],
        tools: Option<&[Box<dyn LlmTool>]>,
        config: &CompletionConfig,
        stream: bool,
    ) -> Value {
        let adapted = adapt_messages_to_anthropic(messages);

        let mut body = json!({
            "model": model,
            "messages": adapted.messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
        });

        if let Some(system) = adapted.system {
            body["system"] = json!(system);
        }

        if let Some(top_p) = config.top_p {
            body["top_p"] = json!(top_p);
        }

        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = json!(adapt_tools_to_anthropic(tools));
            }
        }

        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    async fn post_messages(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(QuartoChatError::GatewayError(format!(
                "Anthropic API error: {} - {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmGateway for AnthropicGateway {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[LlmMessage],
        tools: Option<&[Box<dyn LlmTool>]>,
        config: &CompletionConfig,
    ) -> Result<LlmGatewayResponse> {
        info!("Delegating to Anthropic for completion");
        debug!("Model: {}, Message count: {}", model, messages.len());

        let body = self.build_body(model, messages, tools, config, false);
        let response = self.post_messages(&body).await?;
        let response_body: Value = response.json().await?;

        let blocks = response_body["content"].as_array().ok_or_else(|| {
            QuartoChatError::GatewayError("No content blocks in Anthropic response".to_string())
        })?;

        debug!(stop_reason = ?response_body["stop_reason"].as_str(), "Anthropic completion finished");

        Ok(parse_content_blocks(blocks))
    }

    fn complete_stream<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [LlmMessage],
        tools: Option<&'a [Box<dyn LlmTool>]>,
        config: &'a CompletionConfig,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>> {
        Box::pin(async_stream::stream! {
            info!("Starting Anthropic streaming completion");
            debug!("Model: {}, Message count: {}", model, messages.len());

            let body = self.build_body(model, messages, tools, config, true);
            let response = match self.post_messages(&body).await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut lines = SseLineBuffer::new();
            let mut state = StreamState::default();

            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(e.into());
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    // Every data payload repeats its event name in `type`, so `event:` lines
                    // carry nothing extra.
                    let Some(data) = SseLineBuffer::data(&line) else {
                        continue;
                    };

                    let event = match serde_json::from_str::<Value>(data) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Failed to parse streaming event: {}", e);
                            continue;
                        }
                    };

                    match state.process(&event) {
                        Ok(chunks) => {
                            for chunk in chunks {
                                yield Ok(chunk);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        })
    }
}

/// A `tool_use` block whose input JSON is still arriving.
#[derive(Debug, Default)]
struct ToolUseAccumulator {
    id: Option<String>,
    name: String,
    input_json: String,
}

/// Folds Messages API stream events into [`StreamChunk`]s.
#[derive(Debug, Default)]
struct StreamState {
    tool_uses: BTreeMap<u64, ToolUseAccumulator>,
}

impl StreamState {
    fn process(&mut self, event: &Value) -> Result<Vec<StreamChunk>> {
        let mut chunks = Vec::new();
        let index = event["index"].as_u64().unwrap_or_default();

        match event["type"].as_str().unwrap_or_default() {
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"] == "tool_use" {
                    self.tool_uses.insert(
                        index,
                        ToolUseAccumulator {
                            id: block["id"].as_str().map(String::from),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            input_json: String::new(),
                        },
                    );
                } else if let Some(text) = block["text"].as_str() {
                    if !text.is_empty() {
                        chunks.push(StreamChunk::Content(text.to_string()));
                    }
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str() {
                            if !text.is_empty() {
                                chunks.push(StreamChunk::Content(text.to_string()));
                            }
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(acc) = self.tool_uses.get_mut(&index) {
                            acc.input_json
                                .push_str(delta["partial_json"].as_str().unwrap_or_default());
                        }
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                debug!(stop_reason = ?event["delta"]["stop_reason"].as_str(), "Anthropic stream stopping");
            }
            "message_stop" => {
                let tool_calls = self.take_tool_calls();
                if !tool_calls.is_empty() {
                    chunks.push(StreamChunk::ToolCalls(tool_calls));
                }
            }
            "error" => {
                let message = event["error"]["message"].as_str().unwrap_or("unknown error");
                return Err(QuartoChatError::GatewayError(format!(
                    "Anthropic stream error: {}",
                    message
                )));
            }
            _ => {}
        }

        Ok(chunks)
    }

    fn take_tool_calls(&mut self) -> Vec<LlmToolCall> {
        std::mem::take(&mut self.tool_uses)
            .into_values()
            .filter(|acc| !acc.name.is_empty())
            .map(|acc| {
                let arguments: HashMap<String, Value> = if acc.input_json.trim().is_empty() {
                    HashMap::new()
                } else {
                    serde_json::from_str(&acc.input_json).unwrap_or_else(|e| {
                        warn!(tool = %acc.name, "Discarding malformed tool input: {}", e);
                        HashMap::new()
                    })
                };
                LlmToolCall {
                    id: acc.id,
                    name: acc.name,
                    arguments,
                }
            })
            .collect()
    }
}

//! OpenAI Gateway for LLM interactions.
//!
//! This module provides a gateway for interacting with OpenAI's chat completions API,
//! buffered and streamed, with tool calling.

use crate::error::{QuartoChatError, Result};
use crate::llm::gateway::{CompletionConfig, LlmGateway, StreamChunk};
use crate::llm::gateways::sse::SseLineBuffer;
use crate::llm::gateways::openai_messages_adapter::{
    adapt_messages_to_openai, adapt_tools_to_openai, convert_tool_calls,
};
use crate::llm::models::{LlmGatewayResponse, LlmMessage, LlmToolCall};
use crate::llm::tools::LlmTool;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::pin::Pin;
use tracing::{debug, info, warn};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for connecting to OpenAI API.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Option<std::time::Duration>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            timeout: None,
        }
    }
}

/// Gateway for OpenAI LLM service.
pub struct OpenAIGateway {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIGateway {
    /// Create a new OpenAI gateway with custom configuration.
    pub fn with_config(config: OpenAIConfig) -> Self {
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
        Self::with_config(OpenAIConfig {
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
        let mut body = json!({
            "model": model,
            "messages": adapt_messages_to_openai(messages),
            "max_completion_tokens": config.max_tokens,
            "temperature": config.temperature,
        });

        if let Some(top_p) = config.top_p {
            body["top_p"] = json!(top_p);
        }

        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = json!(adapt_tools_to_openai(tools));
            }
        }

        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    async fn post_chat_completion(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(QuartoChatError::GatewayError(format!(
                "OpenAI API error: {} - {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmGateway for OpenAIGateway {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[LlmMessage],
        tools: Option<&[Box<dyn LlmTool>]>,
        config: &CompletionConfig,
    ) -> Result<LlmGatewayResponse> {
        info!("Delegating to OpenAI for completion");
        debug!("Model: {}, Message count: {}", model, messages.len());

        let body = self.build_body(model, messages, tools, config, false);
        let response = self.post_chat_completion(&body).await?;
        let response_body: Value = response.json().await?;

        let message = &response_body["choices"][0]["message"];
        let content = message["content"].as_str().map(String::from);
        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| convert_tool_calls(calls))
            .unwrap_or_default();

        Ok(LlmGatewayResponse {
            content,
            tool_calls,
        })
    }

    fn complete_stream<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [LlmMessage],
        tools: Option<&'a [Box<dyn LlmTool>]>,
        config: &'a CompletionConfig,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>> {
        Box::pin(async_stream::stream! {
            info!("Starting OpenAI streaming completion");
            debug!("Model: {}, Message count: {}", model, messages.len());

            let body = self.build_body(model, messages, tools, config, true);
            let response = match self.post_chat_completion(&body).await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut lines = SseLineBuffer::new();
            let mut tool_calls_accumulator: HashMap<usize, ToolCallAccumulator> = HashMap::new();

            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(e.into());
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    let Some(data) = SseLineBuffer::data(&line) else {
                        continue;
                    };

                    if data == "[DONE]" {
                        if !tool_calls_accumulator.is_empty() {
                            let complete_tool_calls = build_complete_tool_calls(&tool_calls_accumulator);
                            tool_calls_accumulator.clear();
                            if !complete_tool_calls.is_empty() {
                                yield Ok(StreamChunk::ToolCalls(complete_tool_calls));
                            }
                        }
                        continue;
                    }

                    let json = match serde_json::from_str::<Value>(data) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to parse streaming chunk: {}", e);
                            continue;
                        }
                    };

                    let Some(choice) = json["choices"].as_array().and_then(|c| c.first()) else {
                        continue;
                    };
                    let delta = &choice["delta"];

                    if let Some(content) = delta["content"].as_str() {
                        if !content.is_empty() {
                            yield Ok(StreamChunk::Content(content.to_string()));
                        }
                    }

                    if let Some(tool_calls) = delta["tool_calls"].as_array() {
                        accumulate_tool_call_deltas(&mut tool_calls_accumulator, tool_calls);
                    }

                    if choice["finish_reason"].as_str() == Some("tool_calls")
                        && !tool_calls_accumulator.is_empty()
                    {
                        let complete_tool_calls = build_complete_tool_calls(&tool_calls_accumulator);
                        tool_calls_accumulator.clear();
                        if !complete_tool_calls.is_empty() {
                            yield Ok(StreamChunk::ToolCalls(complete_tool_calls));
                        }
                    }
                }
            }
        })
    }
}

/// Accumulator for streaming tool calls.
#[derive(Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Fold one delta's tool call fragments into the per-index accumulators.
fn accumulate_tool_call_deltas(
    accumulators: &mut HashMap<usize, ToolCallAccumulator>,
    tool_calls: &[Value],
) {
    for tc in tool_calls {
        let Some(index) = tc["index"].as_u64() else {
            continue;
        };
        let acc = accumulators.entry(index as usize).or_default();

        if let Some(id) = tc["id"].as_str() {
            acc.id = Some(id.to_string());
        }
        if let Some(name) = tc["function"]["name"].as_str() {
            acc.name = Some(name.to_string());
        }
        if let Some(args) = tc["function"]["arguments"].as_str() {
            acc.arguments.push_str(args);
        }
    }
}

/// Build complete tool calls from accumulators.
fn build_complete_tool_calls(
    accumulators: &HashMap<usize, ToolCallAccumulator>,
) -> Vec<LlmToolCall> {
    let mut indices: Vec<_> = accumulators.keys().collect();
    indices.sort();

    indices
        .iter()
        .filter_map(|&&index| {
            let acc = accumulators.get(&index)?;
            let name = acc.name.clone()?;

            let arguments: HashMap<String, Value> =
                serde_json::from_str(&acc.arguments).unwrap_or_default();

            Some(LlmToolCall {
                id: acc.id.clone(),
                name,
                arguments,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_config_default() {
        let config = OpenAIConfig::default();
        assert_eq!(config.api_key, "");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_gateway_with_api_key_and_base_url() {
        let gateway = OpenAIGateway::with_api_key_and_base_url("key", "https://custom.com");
        assert_eq!(gateway.config.api_key, "key");
        assert_eq!(gateway.config.base_url, "https://custom.com");
        assert_eq!(gateway.name(), "openai");
        assert!(gateway.supports_streaming());
    }

    #[test]
    fn test_build_body() {
        let gateway = OpenAIGateway::with_config(OpenAIConfig::default());
        let config = CompletionConfig {
            temperature: 0.5,
            max_tokens: 1000,
            top_p: Some(0.9),
        };
        let messages = vec![LlmMessage::user("Hi")];

        let body = gateway.build_body("gpt-4o", &messages, None, &config, true);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_completion_tokens"], 1000);
        assert_eq!(body["temperature"], 0.5);
        assert!(body["top_p"].is_number());
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_accumulate_and_build_tool_calls() {
        let mut accumulators = HashMap::new();
        accumulate_tool_call_deltas(
            &mut accumulators,
            &[json!({"index": 0, "id": "call_1", "function": {"name": "show_answer", "arguments": "{\"filename\":"}})],
        );
        accumulate_tool_call_deltas(
            &mut accumulators,
            &[json!({"index": 0, "function": {"arguments": " \"x\"}"}})],
        );

        let result = build_complete_tool_calls(&accumulators);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, Some("call_1".to_string()));
        assert_eq!(result[0].name, "show_answer");
        assert_eq!(result[0].arguments.get("filename"), Some(&json!("x")));
    }

    #[test]
    fn test_build_complete_tool_calls_missing_name() {
        let mut accumulators = HashMap::new();
        accumulators.insert(
            0,
            ToolCallAccumulator {
                id: Some("call_123".to_string()),
                name: None,
                arguments: r#"{}"#.to_string(),
            },
        );

        let result = build_complete_tool_calls(&accumulators);
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_complete_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"}}]}"#)
            .create_async()
            .await;

        let gateway = OpenAIGateway::with_api_key_and_base_url("test-key", server.url());
        let messages = vec![LlmMessage::user("Hi")];
        let config = CompletionConfig::default();

        let response = gateway.complete("gpt-4o", &messages, None, &config).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, Some("Hello!".to_string()));
        assert!(response.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_complete_with_tool_calls() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r##"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[{"id":"call_1","type":"function","function":{"name":"show_answer","arguments":"{\"filename\": \"x.qmd\", \"answer\": \"# X\"}"}}]}}]}"##)
            .create_async()
            .await;

        let gateway = OpenAIGateway::with_api_key_and_base_url("test-key", server.url());
        let messages = vec![LlmMessage::user("Explain X")];
        let config = CompletionConfig::default();

        let response = gateway.complete("gpt-4o", &messages, None, &config).await.unwrap();

        mock.assert_async().await;
        assert!(response.content.is_none());
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "show_answer");
        assert_eq!(response.tool_calls[0].arguments.get("answer"), Some(&json!("# X")));
    }

    #[tokio::test]
    async fn test_complete_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("Unauthorized")
            .create_async()
            .await;

        let gateway = OpenAIGateway::with_api_key_and_base_url("bad-key", server.url());
        let messages = vec![LlmMessage::user("Hi")];
        let config = CompletionConfig::default();

        let err = gateway.complete("gpt-4o", &messages, None, &config).await.unwrap_err();

        mock.assert_async().await;
        match err {
            QuartoChatError::GatewayError(msg) => {
                assert!(msg.contains("401"));
                assert!(msg.contains("Unauthorized"));
            }
            other => panic!("Expected GatewayError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_stream_content_and_tool_calls() {
        let body = [
            r#"data: {"choices":[{"delta":{"content":"Writing "},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"delta":{"content":"answer"},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"show_answer","arguments":"{\"filename\":\"a\","}}]},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"answer\":\"b\"}"}}]},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]
        .join("\n\n")
            + "\n\n";

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({"stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let gateway = OpenAIGateway::with_api_key_and_base_url("test-key", server.url());
        let messages = vec![LlmMessage::user("Hi")];
        let config = CompletionConfig::default();

        let chunks: Vec<StreamChunk> = gateway
            .complete_stream("gpt-4o", &messages, None, &config)
            .map(|c| c.unwrap())
            .collect()
            .await;

        mock.assert_async().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], StreamChunk::Content("Writing ".to_string()));
        assert_eq!(chunks[1], StreamChunk::Content("answer".to_string()));
        match &chunks[2] {
            StreamChunk::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "show_answer");
                assert_eq!(calls[0].arguments.get("filename"), Some(&json!("a")));
                assert_eq!(calls[0].arguments.get("answer"), Some(&json!("b")));
            }
            other => panic!("Expected tool calls, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_stream_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let gateway = OpenAIGateway::with_api_key_and_base_url("test-key", server.url());
        let messages = vec![LlmMessage::user("Hi")];
        let config = CompletionConfig::default();

        let results: Vec<Result<StreamChunk>> =
            gateway.complete_stream("gpt-4o", &messages, None, &config).collect().await;

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(QuartoChatError::GatewayError(_))));
    }
}

//! Adapter for converting LLM messages to and from the Anthropic Messages format.

use crate::llm::models::{LlmGatewayResponse, LlmMessage, LlmToolCall, MessageRole};
use crate::llm::tools::LlmTool;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Messages ready for the Anthropic API.
///
/// System prompts are not part of the message list; they travel in the top-level
/// `system` field.
#[derive(Debug, Clone, Default)]
pub struct AnthropicMessages {
    pub system: Option<String>,
    pub messages: Vec<Value>,
}

/// Adapt LLM messages to Anthropic format.
///
/// Tool results become `tool_result` blocks in a user turn and consecutive turns of the
/// same role are merged, since the API requires strict user/assistant alternation.
pub fn adapt_messages_to_anthropic(messages: &[LlmMessage]) -> AnthropicMessages {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for msg in messages {
        let (role, blocks) = match msg.role {
            MessageRole::System => {
                if let Some(content) = msg.content.as_deref() {
                    if !content.is_empty() {
                        system_parts.push(content);
                    }
                }
                continue;
            }
            MessageRole::User => ("user", text_blocks(msg.content.as_deref())),
            MessageRole::Assistant => {
                let mut blocks = text_blocks(msg.content.as_deref());
                for tc in msg.tool_calls.iter().flatten() {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id.as_deref().unwrap_or_default(),
                        "name": tc.name,
                        "input": tc.arguments,
                    }));
                }
                ("assistant", blocks)
            }
            MessageRole::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id().unwrap_or_default(),
                    "content": msg.content.as_deref().unwrap_or_default(),
                })],
            ),
        };

        if blocks.is_empty() {
            continue;
        }

        if let Some((last_role, last_blocks)) = turns.last_mut() {
            if *last_role == role {
                last_blocks.extend(blocks);
                continue;
            }
        }
        turns.push((role, blocks));
    }

    AnthropicMessages {
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        },
        messages: turns
            .into_iter()
            .map(|(role, content)| json!({ "role": role, "content": content }))
            .collect(),
    }
}

fn text_blocks(content: Option<&str>) -> Vec<Value> {
    match content {
        Some(text) if !text.is_empty() => vec![json!({ "type": "text", "text": text })],
        _ => Vec::new(),
    }
}

/// Describe tools the way the Messages API expects them.
pub fn adapt_tools_to_anthropic(tools: &[Box<dyn LlmTool>]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            let descriptor = t.descriptor();
            json!({
                "name": descriptor.function.name,
                "description": descriptor.function.description,
                "input_schema": descriptor.function.parameters,
            })
        })
        .collect()
}

/// Parse the `content` blocks of a Messages API response.
pub fn parse_content_blocks(blocks: &[Value]) -> LlmGatewayResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block["type"].as_str() {
            Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
            Some("tool_use") => {
                let Some(name) = block["name"].as_str() else {
                    continue;
                };
                let arguments: HashMap<String, Value> =
                    serde_json::from_value(block["input"].clone()).unwrap_or_default();
                tool_calls.push(LlmToolCall {
                    id: block["id"].as_str().map(String::from),
                    name: name.to_string(),
                    arguments,
                });
            }
            _ => {}
        }
    }

    LlmGatewayResponse {
        content: if text.is_empty() { None } else { Some(text) },
        tool_calls,
    }
}

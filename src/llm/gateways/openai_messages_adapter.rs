//! Adapter for converting LLM messages to OpenAI format.

use crate::llm::models::{LlmMessage, LlmToolCall, MessageRole};
use crate::llm::tools::LlmTool;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Adapt LLM messages to OpenAI chat completion format.
pub fn adapt_messages_to_openai(messages: &[LlmMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            MessageRole::System => json!({
                "role": "system",
                "content": msg.content.as_deref().unwrap_or("")
            }),
            MessageRole::User => json!({
                "role": "user",
                "content": msg.content.as_deref().unwrap_or("")
            }),
            MessageRole::Assistant => {
                let mut assistant_msg = json!({ "role": "assistant" });

                if let Some(ref content) = msg.content {
                    assistant_msg["content"] = json!(content);
                }

                if let Some(ref tool_calls) = msg.tool_calls {
                    let formatted_calls: Vec<Value> = tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id.as_deref().unwrap_or(""),
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": serde_json::to_string(&tc.arguments).unwrap_or_default()
                                }
                            })
                        })
                        .collect();
                    assistant_msg["tool_calls"] = json!(formatted_calls);
                }

                assistant_msg
            }
            MessageRole::Tool => json!({
                "role": "tool",
                "content": msg.content.as_deref().unwrap_or(""),
                "tool_call_id": msg.tool_call_id().unwrap_or_default()
            }),
        })
        .collect()
}

/// Describe tools the way the chat completions API expects them.
pub fn adapt_tools_to_openai(tools: &[Box<dyn LlmTool>]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| serde_json::to_value(t.descriptor()).unwrap_or(Value::Null))
        .filter(|v| !v.is_null())
        .collect()
}

/// Convert tool calls from OpenAI format to internal format.
pub fn convert_tool_calls(tool_calls: &[Value]) -> Vec<LlmToolCall> {
    tool_calls
        .iter()
        .filter_map(|tc| {
            let id = tc["id"].as_str().map(String::from);
            let name = tc["function"]["name"].as_str()?.to_string();
            let args_str = tc["function"]["arguments"].as_str().unwrap_or("{}");

            // Parse arguments as JSON object
            let arguments: HashMap<String, Value> =
                serde_json::from_str(args_str).unwrap_or_default();

            Some(LlmToolCall {
                id,
                name,
                arguments,
            })
        })
        .collect()
}

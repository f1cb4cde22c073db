use crate::error::Result;
use crate::llm::gateway::{CompletionConfig, LlmGateway, StreamChunk};
use crate::llm::models::{LlmMessage, LlmToolCall};
use crate::llm::tools::LlmTool;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{info, warn};

/// Sends conversations to a gateway and runs the tool loop
pub struct LlmBroker {
    model: String,
    gateway: Arc<dyn LlmGateway>,
}

impl LlmBroker {
    pub fn new(model: impl Into<String>, gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            model: model.into(),
            gateway,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a reply, executing any requested tools until the model answers in text.
    pub async fn generate(
        &self,
        messages: &[LlmMessage],
        tools: Option<&[Box<dyn LlmTool>]>,
        config: &CompletionConfig,
    ) -> Result<String> {
        let response = self.gateway.complete(&self.model, messages, tools, config).await?;

        if response.tool_calls.is_empty() {
            return Ok(response.content.unwrap_or_default());
        }

        match tools {
            Some(tools) => {
                let mut next = messages.to_vec();
                next.push(LlmMessage::assistant_tool_calls(
                    response.content,
                    response.tool_calls.clone(),
                ));
                next.extend(run_tool_calls(&response.tool_calls, tools)?);

                self.generate_boxed(next, tools, config).await
            }
            None => {
                warn!("Model requested tool calls but no tools were provided");
                Ok(response.content.unwrap_or_default())
            }
        }
    }

    fn generate_boxed<'a>(
        &'a self,
        messages: Vec<LlmMessage>,
        tools: &'a [Box<dyn LlmTool>],
        config: &'a CompletionConfig,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move { self.generate(&messages, Some(tools), config).await })
    }

    /// Stream a reply as text chunks.
    ///
    /// Tool calls arrive after the text of a round; the broker executes them and
    /// continues streaming the model's follow-up.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use futures::stream::StreamExt;
    ///
    /// let broker = LlmBroker::new("gpt-4o", gateway);
    /// let messages = vec![LlmMessage::user("Summarize the iris dataset")];
    ///
    /// let mut stream = broker.generate_stream(&messages, Some(&tools), &config);
    /// while let Some(chunk) = stream.next().await {
    ///     print!("{}", chunk?);
    /// }
    /// ```
    pub fn generate_stream<'a>(
        &'a self,
        messages: &'a [LlmMessage],
        tools: Option<&'a [Box<dyn LlmTool>]>,
        config: &'a CompletionConfig,
    ) -> Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>> {
        Box::pin(async_stream::stream! {
            let mut content = String::new();
            let mut tool_calls = Vec::new();

            let mut stream = self.gateway.complete_stream(&self.model, messages, tools, config);

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(StreamChunk::Content(text)) => {
                        content.push_str(&text);
                        yield Ok(text);
                    }
                    Ok(StreamChunk::ToolCalls(calls)) => tool_calls.extend(calls),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            drop(stream);

            if tool_calls.is_empty() {
                return;
            }

            let Some(tools) = tools else {
                warn!("Model requested tool calls but no tools were provided");
                return;
            };

            info!("Processing {} tool call(s) in stream", tool_calls.len());

            let mut next = messages.to_vec();
            let content = if content.is_empty() { None } else { Some(content) };
            next.push(LlmMessage::assistant_tool_calls(content, tool_calls.clone()));

            match run_tool_calls(&tool_calls, tools) {
                Ok(results) => next.extend(results),
                Err(e) => {
                    warn!("Tool execution failed: {}", e);
                    yield Err(e);
                    return;
                }
            }

            let mut follow_up = self.generate_stream(&next, Some(tools), config);
            while let Some(item) = follow_up.next().await {
                yield item;
            }
        })
    }
}

/// Execute each call against the matching tool, producing one tool result message per call.
fn run_tool_calls(calls: &[LlmToolCall], tools: &[Box<dyn LlmTool>]) -> Result<Vec<LlmMessage>> {
    info!("Tool calls requested: {}", calls.len());

    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        match tools.iter().find(|t| t.matches(&call.name)) {
            Some(tool) => {
                info!("Executing tool: {}", call.name);
                let output = tool.run(&call.arguments)?;
                results.push(LlmMessage::tool_result(call, render_tool_output(&output)?));
            }
            None => {
                warn!("Tool not found: {}", call.name);
                results.push(LlmMessage::tool_result(call, format!("Unknown tool: {}", call.name)));
            }
        }
    }

    Ok(results)
}

fn render_tool_output(output: &Value) -> Result<String> {
    match output {
        Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

use crate::error::Result;
use crate::llm::models::{LlmGatewayResponse, LlmMessage, LlmToolCall};
use crate::llm::tools::LlmTool;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Configuration for LLM completion
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub temperature: f32,
    pub max_tokens: usize,
    pub top_p: Option<f32>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: 8192,
            top_p: None,
        }
    }
}

/// A piece of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Content(String),
    /// Fully assembled tool calls, emitted once their arguments are complete.
    ToolCalls(Vec<LlmToolCall>),
}

/// Abstract interface for LLM providers
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Complete an LLM request, returning text and/or requested tool calls
    async fn complete(
        &self,
        model: &str,
        messages: &[LlmMessage],
        tools: Option<&[Box<dyn LlmTool>]>,
        config: &CompletionConfig,
    ) -> Result<LlmGatewayResponse>;

    /// Stream an LLM request as content chunks followed by any tool calls
    fn complete_stream<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [LlmMessage],
        tools: Option<&'a [Box<dyn LlmTool>]>,
        config: &'a CompletionConfig,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>>;

    /// Whether `complete_stream` is usable with this provider
    fn supports_streaming(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_config_default() {
        let config = CompletionConfig::default();

        assert_eq!(config.temperature, 1.0);
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.top_p, None);
    }

    #[test]
    fn test_completion_config_clone() {
        let config1 = CompletionConfig {
            temperature: 0.7,
            max_tokens: 2048,
            top_p: Some(0.9),
        };

        let config2 = config1.clone();

        assert_eq!(config1.temperature, config2.temperature);
        assert_eq!(config1.max_tokens, config2.max_tokens);
        assert_eq!(config1.top_p, config2.top_p);
    }

    #[test]
    fn test_stream_chunk_equality() {
        assert_eq!(
            StreamChunk::Content("a".to_string()),
            StreamChunk::Content("a".to_string())
        );
        assert_ne!(StreamChunk::Content("a".to_string()), StreamChunk::ToolCalls(vec![]));
    }
}

pub mod anthropic;
pub mod anthropic_messages_adapter;
pub mod openai;
pub mod openai_messages_adapter;
pub mod sse;
pub mod tokenizer_gateway;

pub use anthropic::{AnthropicConfig, AnthropicGateway};
pub use openai::{OpenAIConfig, OpenAIGateway};
pub use tokenizer_gateway::TokenizerGateway;

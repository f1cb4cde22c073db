pub mod broker;
pub mod chat_session;
pub mod gateway;
pub mod gateways;
pub mod models;
pub mod provider;
pub mod tools;

pub use broker::LlmBroker;
pub use chat_session::{ChatSession, ChatSessionBuilder, SizedLlmMessage};
pub use gateway::{CompletionConfig, LlmGateway, StreamChunk};
pub use models::{LlmGatewayResponse, LlmMessage, LlmToolCall, MessageRole};
pub use provider::ProviderKind;
pub use tools::{FunctionDescriptor, LlmTool, ShowAnswerTool, ToolDescriptor};

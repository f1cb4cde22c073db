pub mod config;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod writer;

pub use error::{QuartoChatError, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::error::{QuartoChatError, Result};
    pub use crate::llm::tools::{LlmTool, ShowAnswerTool};
    pub use crate::llm::{ChatSession, LlmBroker, LlmGateway, LlmMessage, ProviderKind};
    pub use crate::writer::{write_unique, UniqueWriter};
}

//! Token counting for context window management, backed by tiktoken.

use crate::error::{QuartoChatError, Result};
use tiktoken_rs::CoreBPE;

/// Counts tokens the way the chat session sizes its history.
///
/// Neither provider exposes its exact tokenizer offline, so a tiktoken encoding serves as
/// an estimate for both.
///
/// # Examples
///
/// ```
/// use quarto_chat::llm::gateways::TokenizerGateway;
///
/// let tokenizer = TokenizerGateway::default();
/// assert!(tokenizer.count_tokens("Hello, world!") > 0);
/// ```
pub struct TokenizerGateway {
    tokenizer: CoreBPE,
}

impl TokenizerGateway {
    /// Creates a tokenizer for one of `cl100k_base`, `p50k_base` or `r50k_base`.
    pub fn new(encoding: &str) -> Result<Self> {
        let tokenizer = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "r50k_base" => tiktoken_rs::r50k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            _ => {
                return Err(QuartoChatError::ConfigError(format!(
                    "Unsupported encoding model: {}",
                    encoding
                )))
            }
        }
        .map_err(|e| QuartoChatError::ConfigError(format!("Failed to load {}: {}", encoding, e)))?;

        Ok(Self { tokenizer })
    }

    /// Encodes text into token ids.
    pub fn encode(&self, text: &str) -> Vec<usize> {
        self.tokenizer.encode_with_special_tokens(text)
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

impl Default for TokenizerGateway {
    fn default() -> Self {
        Self::new("cl100k_base").expect("cl100k_base is bundled with tiktoken-rs")
    }
}

//! Application configuration, read once at startup.
//!
//! Values come from the process environment (after loading a `.env` file if present) and
//! are carried around as an explicit [`AppConfig`]. Nothing below this layer reads the
//! environment.

use crate::error::{QuartoChatError, Result};
use crate::llm::gateways::anthropic::DEFAULT_ANTHROPIC_BASE_URL;
use crate::llm::gateways::openai::DEFAULT_OPENAI_BASE_URL;
use crate::llm::gateways::{AnthropicConfig, OpenAIConfig};
use crate::llm::provider::ProviderKind;
use crate::writer::UniqueWriter;
use std::path::PathBuf;
use tracing::debug;

pub const PROVIDER_VAR: &str = "QUARTO_DS_CHATBOT_PROVIDER";
pub const MODEL_VAR: &str = "QUARTO_DS_CHATBOT_MODEL";
pub const OUTPUT_DIR_VAR: &str = "QUARTO_DS_CHATBOT_OUTPUT_DIR";
pub const MAX_WRITE_ATTEMPTS_VAR: &str = "QUARTO_DS_CHATBOT_MAX_WRITE_ATTEMPTS";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: ProviderKind,
    /// Explicit model; `None` means the provider's default.
    pub model: Option<String>,
    pub output_dir: PathBuf,
    /// Bound on filename attempts per document; `None` keeps trying.
    pub max_write_attempts: Option<u32>,
    pub anthropic: AnthropicConfig,
    pub openai: OpenAIConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            output_dir: PathBuf::from("."),
            max_write_attempts: None,
            anthropic: AnthropicConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!(path = %path.display(), "Loaded environment file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get(PROVIDER_VAR) {
            Some(p) => p.parse()?,
            None => ProviderKind::default(),
        };

        let max_write_attempts = match get(MAX_WRITE_ATTEMPTS_VAR) {
            Some(raw) => Some(parse_max_write_attempts(&raw)?),
            None => None,
        };

        Ok(Self {
            provider,
            model: get(MODEL_VAR),
            output_dir: get(OUTPUT_DIR_VAR).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            max_write_attempts,
            anthropic: AnthropicConfig {
                api_key: get("ANTHROPIC_API_KEY").unwrap_or_default(),
                base_url: get("ANTHROPIC_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
                timeout: None,
            },
            openai: OpenAIConfig {
                api_key: get("OPENAI_API_KEY").unwrap_or_default(),
                base_url: get("OPENAI_API_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                timeout: None,
            },
        })
    }

    /// The configured model, or the provider default.
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or_else(|| self.provider.default_model())
    }

    /// The document writer for the configured output directory.
    pub fn writer(&self) -> UniqueWriter {
        let writer = UniqueWriter::new(&self.output_dir);
        match self.max_write_attempts {
            Some(max) => writer.with_max_attempts(max),
            None => writer,
        }
    }
}

/// Parse a positive attempt bound.
pub fn parse_max_write_attempts(raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(QuartoChatError::ConfigError(format!(
            "{} must be a positive integer, got {:?}",
            MAX_WRITE_ATTEMPTS_VAR, raw
        ))),
    }
}

//! The closed set of model providers and how each one is wired up.

use crate::config::AppConfig;
use crate::error::{QuartoChatError, Result};
use crate::llm::gateway::LlmGateway;
use crate::llm::gateways::{AnthropicGateway, OpenAIGateway};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Supported model providers. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    Anthropic,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
        }
    }

    /// Model used when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            // dated release, not the -latest alias
            ProviderKind::Anthropic => "claude-3-5-sonnet-20240620",
            ProviderKind::OpenAi => "gpt-4o",
        }
    }

    /// Name of the environment variable holding this provider's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// Construct the gateway for this provider from `config`.
    ///
    /// Fails with [`QuartoChatError::ConfigError`] when the provider's API key is missing.
    pub fn build_gateway(&self, config: &AppConfig) -> Result<Arc<dyn LlmGateway>> {
        debug!(provider = self.as_str(), "Building gateway");

        let gateway: Arc<dyn LlmGateway> = match self {
            ProviderKind::Anthropic => {
                if config.anthropic.api_key.is_empty() {
                    return Err(self.missing_key());
                }
                Arc::new(AnthropicGateway::with_config(config.anthropic.clone()))
            }
            ProviderKind::OpenAi => {
                if config.openai.api_key.is_empty() {
                    return Err(self.missing_key());
                }
                Arc::new(OpenAIGateway::with_config(config.openai.clone()))
            }
        };

        Ok(gateway)
    }

    fn missing_key(&self) -> QuartoChatError {
        QuartoChatError::ConfigError(format!(
            "{} must be set to use the {} provider",
            self.api_key_var(),
            self.as_str()
        ))
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = QuartoChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            _ => Err(QuartoChatError::UnsupportedProvider(s.to_string())),
        }
    }
}

//! Error types and result aliases for quarto-chat.
//!
//! This module defines the core error type [`QuartoChatError`] and the [`Result`] type alias
//! used throughout the library. All public APIs that can fail return `Result<T>` for
//! consistent error handling.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuartoChatError {
    #[error("LLM gateway error: {0}")]
    GatewayError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Every disambiguated name tried by a bounded writer was already taken.
    #[error("No free filename for {filename:?} after {attempts} attempts")]
    WriteExhausted { filename: PathBuf, attempts: u32 },
}

pub type Result<T> = std::result::Result<T, QuartoChatError>;

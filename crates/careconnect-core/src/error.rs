//! Error types for the Care Connect core

use thiserror::Error;

/// Result type alias for configuration and storage operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while loading configuration or touching the credential store
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Unknown credential: {0}")]
    UnknownCredential(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

/// Why a dialogue turn produced no assistant reply.
///
/// Cloneable so it can travel inside call events; every variant is recoverable and ends up
/// as the session's error string plus a fallback reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialogueError {
    #[error("Please enter your Google Gemini API Key first.")]
    MissingCredential,

    #[error("Dialogue request failed: {0}")]
    Transport(String),

    #[error("Dialogue backend error {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("Dialogue backend returned no text")]
    EmptyResponse,
}

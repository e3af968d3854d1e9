//! Error types for the dashboard

use thiserror::Error;

/// Dashboard-wide error type
#[derive(Error, Debug)]
pub enum MuraError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Protocol error ({code}): {message}")]
    Protocol { code: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MuraError {
    pub fn network(msg: impl Into<String>) -> Self {
        MuraError::Network(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        MuraError::Auth(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        MuraError::Parse(msg.into())
    }

    pub fn protocol(code: impl Into<String>, message: impl Into<String>) -> Self {
        MuraError::Protocol {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        MuraError::InvalidRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        MuraError::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        MuraError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        MuraError::Internal(msg.into())
    }
}

/// Result type alias for dashboard operations
pub type MuraResult<T> = Result<T, MuraError>;

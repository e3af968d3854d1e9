//! Classification of server `error` envelopes
//!
//! The policy only looks at the code: benign codes are swallowed as
//! confirmations, everything else is fatal to the features that receive it.
//! Which features receive an error is the router's and session's business.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use mura_core::{ApiError, ALREADY_SUBSCRIBED};

/// The token was rejected
pub const INVALID_TOKEN: &str = "InvalidToken";

/// A call needed an authorized stream
pub const AUTHORIZATION_REQUIRED: &str = "AuthorizationRequired";

/// Reconnect attempts exhausted
pub const CONNECTION_LOST: &str = "ConnectionLost";

/// User-visible feature error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureError {
    pub code: String,
    pub message: String,
}

impl FeatureError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn connection_lost() -> Self {
        Self::new(CONNECTION_LOST, "Connection to the trading server was lost")
    }

    pub fn authorization_required() -> Self {
        Self::new(AUTHORIZATION_REQUIRED, "No API token configured")
    }
}

impl From<&ApiError> for FeatureError {
    fn from(error: &ApiError) -> Self {
        Self::new(error.code.clone(), error.message.clone())
    }
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Outcome of classifying an error envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Informational; passed through as a confirmation
    Benign,
    /// Moves receiving features to their error state
    Fatal(FeatureError),
}

/// Error classification rules
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    benign: HashSet<String>,
    auth_resetting: HashSet<String>,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            benign: HashSet::from([ALREADY_SUBSCRIBED.to_string()]),
            auth_resetting: HashSet::from([
                INVALID_TOKEN.to_string(),
                AUTHORIZATION_REQUIRED.to_string(),
            ]),
        }
    }
}

impl ErrorPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat another code as benign
    pub fn with_benign(mut self, code: impl Into<String>) -> Self {
        self.benign.insert(code.into());
        self
    }

    pub fn classify(&self, error: &ApiError) -> Verdict {
        if self.benign.contains(&error.code) {
            Verdict::Benign
        } else {
            Verdict::Fatal(FeatureError::from(error))
        }
    }

    /// Whether the error invalidates the stream's authorization
    pub fn resets_auth(&self, error: &ApiError) -> bool {
        self.auth_resetting.contains(&error.code)
    }
}

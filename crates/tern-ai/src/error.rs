//! Error types for tern-ai

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Result type alias using tern-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a completion service
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error ({status}): {message} (type: {error_type})")]
    Api {
        status: u16,
        error_type: String,
        message: String,
    },

    /// The service refused an optional request field
    #[error("Unsupported parameter{}: {message}", param.as_deref().map(|p| format!(" '{p}'")).unwrap_or_default())]
    UnsupportedParameter {
        param: Option<String>,
        message: String,
    },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Coarse classification of a failed attempt, as seen by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// An optional field was rejected; retry the same budget with fewer fields.
    UnsupportedParameter,
    /// Anything else: network, server, auth, malformed payload.
    Transport,
}

/// Wording used by OpenAI-compatible servers (and their SDK shims) when an
/// optional request field is not accepted by the model or endpoint.
static PARAMETER_REJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)unsupported.?parameter",
        r"(?i)unsupported.?value",
        r"(?i)unrecognized.?request.?argument",
        r"(?i)unknown.?parameter",
        r"(?i)unexpected.?keyword.?argument",
        r"(?i)extra.?inputs?.?are.?not.?permitted",
        r"(?i)(is|are) not supported (with|by|for|on) this model",
        r"(?i)unrecognized.?field",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Check whether an error message reads like a rejected optional parameter
pub fn is_parameter_rejection_message(message: &str) -> bool {
    PARAMETER_REJECTION_PATTERNS
        .iter()
        .any(|re| re.is_match(message))
}

impl Error {
    /// Create an API error from status, type and message
    pub fn api(status: u16, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Create a parameter rejection error
    pub fn unsupported_parameter(param: Option<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedParameter {
            param,
            message: message.into(),
        }
    }

    /// Check if the service rejected an optional field of the request
    pub fn is_parameter_rejection(&self) -> bool {
        match self {
            Error::UnsupportedParameter { .. } => true,
            Error::Api {
                status, message, ..
            } => (400..500).contains(status) && is_parameter_rejection_message(message),
            _ => false,
        }
    }

    /// Classify this error for the retry policy
    pub fn fault_kind(&self) -> FaultKind {
        if self.is_parameter_rejection() {
            FaultKind::UnsupportedParameter
        } else {
            FaultKind::Transport
        }
    }
}

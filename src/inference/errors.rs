//! Provider error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility: these types carry the context needed to
//! build meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to a remote AI provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Credentials or endpoint missing; detected before any network call.
    #[error("{provider} is not configured: {reason}")]
    NotConfigured { provider: String, reason: String },

    /// TCP/HTTP connection to the endpoint failed.
    #[error("request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    /// The endpoint did not respond within the fixed timeout.
    #[error("provider timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// The provider answered but produced no text.
    #[error("empty response")]
    EmptyResponse,

    /// Non-2xx HTTP response.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The provider reported an error inside a well-formed payload.
    #[error("{message}")]
    ApiError { message: String },

    /// The response body did not have the expected shape.
    #[error("unparsable response: {reason}")]
    ParseError { reason: String },

    /// Reading or writing the audio payload failed.
    #[error("audio error: {reason}")]
    AudioError { reason: String },
}

impl ProviderError {
    /// Map a `reqwest` error, distinguishing timeouts from other failures.
    pub fn from_reqwest(endpoint: &str, duration_secs: u64, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout { duration_secs }
        } else {
            ProviderError::RequestFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        ProviderError::AudioError {
            reason: e.to_string(),
        }
    }
}

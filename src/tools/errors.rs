//! Tool error types.
//!
//! A `ToolError` is a business-rule failure. It never becomes a JSON-RPC
//! error: the registry reports it as `isError` content inside a successful
//! response.

use thiserror::Error;

use crate::bridge::BridgeError;
use crate::document::DocumentError;
use crate::inference::ProviderError;
use crate::transcription::AudioError;

#[derive(Debug, Error)]
pub enum ToolError {
    /// Missing, mistyped or inconsistent arguments.
    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    /// A referenced resource (line, audio, file) does not exist.
    #[error("{reason}")]
    NotFound { reason: String },

    /// Credentials or endpoint missing.
    #[error("{reason}")]
    NotConfigured { reason: String },

    /// The multimodal LLM answered with a failure.
    #[error("LLM call failed: {reason}")]
    LlmFailed { reason: String },

    /// A caller-thread handler panicked.
    #[error("tool panicked: {message}")]
    Panicked { message: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Owner(#[from] BridgeError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

impl ToolError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ToolError::InvalidArguments {
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        ToolError::NotFound {
            reason: reason.into(),
        }
    }
}

//! MCP server error types.

use thiserror::Error;

use super::types::error_codes;

/// Protocol-level failures, reported through the JSON-RPC `error` field.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The body was not valid JSON.
    #[error("Parse error: {reason}")]
    ParseError { reason: String },

    /// Malformed envelope.
    #[error("Invalid Request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    /// A method handler failed.
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            RpcError::ParseError { .. } => error_codes::PARSE_ERROR,
            RpcError::InvalidRequest { .. } => error_codes::INVALID_REQUEST,
            RpcError::MethodNotFound { .. } => error_codes::METHOD_NOT_FOUND,
            RpcError::Internal { .. } => error_codes::INTERNAL_ERROR,
        }
    }
}

/// HTTP listener lifecycle failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server is already running on port {port}")]
    AlreadyRunning { port: u16 },

    #[error("failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("failed to start server runtime: {reason}")]
    RuntimeFailed { reason: String },
}

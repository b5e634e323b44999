//! MCP server: JSON-RPC 2.0 over HTTP.
//!
//! - [`types`]: envelope types and protocol constants
//! - [`dispatcher`]: method routing, batching and notification handling
//! - [`transport`]: the axum listener and its lifecycle

pub mod dispatcher;
pub mod errors;
pub mod transport;
pub mod types;

pub use dispatcher::Dispatcher;
pub use errors::{RpcError, TransportError};
pub use transport::McpServer;
pub use types::{HttpReply, JsonRpcResponse, RpcRequest, PROTOCOL_VERSION, SERVER_NAME};

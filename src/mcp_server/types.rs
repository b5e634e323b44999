//! Shared types for the MCP server.
//!
//! JSON-RPC 2.0 message types and MCP protocol constants.

use serde::Serialize;
use serde_json::Value;

use super::errors::RpcError;

/// MCP protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "subbridge";

/// The only accepted `jsonrpc` marker.
pub const JSONRPC_VERSION: &str = "2.0";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// A validated request envelope.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    /// `None` marks a notification. An explicit `null` id is a request.
    pub id: Option<Value>,
    pub method: String,
    /// Defaults to an empty object.
    pub params: Value,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Validate one envelope from a request body.
    pub fn parse(message: &Value) -> Result<Self, RpcError> {
        let Some(object) = message.as_object() else {
            return Err(RpcError::InvalidRequest {
                reason: "message must be an object".into(),
            });
        };
        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(RpcError::InvalidRequest {
                reason: format!("'jsonrpc' must be \"{JSONRPC_VERSION}\""),
            });
        }
        let Some(method) = object.get("method").and_then(Value::as_str) else {
            return Err(RpcError::InvalidRequest {
                reason: "'method' must be a string".into(),
            });
        };
        let id = match object.get("id") {
            None => None,
            Some(id @ (Value::String(_) | Value::Number(_) | Value::Null)) => Some(id.clone()),
            Some(_) => {
                return Err(RpcError::InvalidRequest {
                    reason: "'id' must be a string, number or null".into(),
                })
            }
        };
        let params = match object.get("params") {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(p @ (Value::Object(_) | Value::Array(_))) => p.clone(),
            Some(_) => {
                return Err(RpcError::InvalidRequest {
                    reason: "'params' must be an object or array".into(),
                })
            }
        };
        Ok(Self {
            id,
            method: method.to_string(),
            params,
        })
    }
}

/// JSON-RPC 2.0 response message. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(JsonRpcError {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// What the HTTP layer should send back for one POST body.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpReply {
    /// Nothing to answer (only notifications): 202, empty body.
    Accepted,
    /// 200 with a single response object or a batch array.
    Json(Value),
}

// ─── Standard Error Codes ───────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_defaults_params() {
        let req = RpcRequest::parse(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap();
        assert_eq!(req.id, Some(json!(1)));
        assert_eq!(req.params, json!({}));
        assert!(!req.is_notification());
    }

    #[test]
    fn test_absent_id_is_notification_null_id_is_not() {
        let note = RpcRequest::parse(&json!({"jsonrpc": "2.0", "method": "x"})).unwrap();
        assert!(note.is_notification());
        let null_id =
            RpcRequest::parse(&json!({"jsonrpc": "2.0", "id": null, "method": "x"})).unwrap();
        assert!(!null_id.is_notification());
    }

    #[test]
    fn test_invalid_envelopes() {
        for bad in [
            json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}),
            json!({"id": 1, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "id": 1, "method": 7}),
            json!({"jsonrpc": "2.0", "id": {"nested": true}, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping", "params": "str"}),
            json!(42),
        ] {
            let err = RpcRequest::parse(&bad).unwrap_err();
            assert_eq!(err.code(), error_codes::INVALID_REQUEST, "{bad}");
        }
    }

    #[test]
    fn test_response_never_has_both_fields() {
        let ok = JsonRpcResponse::success(json!(1), json!({})).to_value();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));

        let err = JsonRpcResponse::failure(
            Value::Null,
            &RpcError::MethodNotFound {
                method: "nope".into(),
            },
        )
        .to_value();
        assert!(err.get("result").is_none());
        assert_eq!(err["error"]["code"], -32601);
        assert_eq!(err["id"], Value::Null);
    }
}

//! JSON-RPC method routing.
//!
//! Turns one HTTP body into zero or more response objects. Runs on the
//! transport's blocking pool; tool calls that need the editor state reach it
//! through the owner bridge held in the [`ToolContext`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{json, Value};

use super::errors::RpcError;
use super::types::{HttpReply, JsonRpcResponse, RpcRequest, PROTOCOL_VERSION, SERVER_NAME};
use crate::bridge::panic_message;
use crate::tools::{ToolContext, ToolRegistry};

pub struct Dispatcher {
    registry: ToolRegistry,
    context: ToolContext,
    initialized: AtomicBool,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, context: ToolContext) -> Self {
        Self {
            registry,
            context,
            initialized: AtomicBool::new(false),
        }
    }

    /// Whether a client has sent `initialize`.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle one POST body: a single message or a batch.
    pub fn handle_body(&self, body: &[u8]) -> HttpReply {
        let parsed: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, bytes = body.len(), "unparsable request body");
                let err = RpcError::ParseError {
                    reason: e.to_string(),
                };
                return HttpReply::Json(JsonRpcResponse::failure(Value::Null, &err).to_value());
            }
        };

        match parsed {
            Value::Array(batch) => {
                if batch.is_empty() {
                    let err = RpcError::InvalidRequest {
                        reason: "empty batch".into(),
                    };
                    return HttpReply::Json(JsonRpcResponse::failure(Value::Null, &err).to_value());
                }
                let replies: Vec<Value> =
                    batch.iter().filter_map(|m| self.handle_message(m)).collect();
                if replies.is_empty() {
                    HttpReply::Accepted
                } else {
                    HttpReply::Json(Value::Array(replies))
                }
            }
            single => match self.handle_message(&single) {
                Some(reply) => HttpReply::Json(reply),
                None => HttpReply::Accepted,
            },
        }
    }

    /// Handle one envelope. Returns `None` for notifications.
    pub fn handle_message(&self, message: &Value) -> Option<Value> {
        let request = match RpcRequest::parse(message) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "rejected envelope");
                let id = message
                    .get("id")
                    .filter(|id| matches!(id, Value::String(_) | Value::Number(_)))
                    .cloned()
                    .unwrap_or(Value::Null);
                return Some(JsonRpcResponse::failure(id, &e).to_value());
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| self.route(&request)))
            .unwrap_or_else(|payload| {
                Err(RpcError::Internal {
                    reason: panic_message(payload.as_ref()),
                })
            });

        if request.is_notification() {
            if let Err(e) = outcome {
                tracing::debug!(method = %request.method, error = %e, "notification failed");
            }
            return None;
        }
        let id = request.id.unwrap_or(Value::Null);
        let response = match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                tracing::debug!(method = %request.method, error = %e, "method failed");
                JsonRpcResponse::failure(id, &e)
            }
        };
        Some(response.to_value())
    }

    fn route(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        match request.method.as_str() {
            "initialize" => Ok(self.initialize(&request.params)),
            "notifications/initialized" | "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry.list() })),
            "tools/call" => self.call_tool(&request.params),
            other => Err(RpcError::MethodNotFound {
                method: other.to_string(),
            }),
        }
    }

    fn initialize(&self, params: &Value) -> Value {
        self.initialized.store(true, Ordering::SeqCst);
        let client = params
            .pointer("/clientInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(client = %client, "client initialized session");
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    fn call_tool(&self, params: &Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Internal {
                reason: "Missing tool name".into(),
            })?;
        let empty = json!({});
        let args = match params.get("arguments") {
            None | Some(Value::Null) => &empty,
            Some(a) => a,
        };
        tracing::debug!(tool = %name, "tools/call");
        Ok(self.registry.invoke(name, args, &self.context))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::OwnerThread;
    use crate::config::{LlmSettings, SttSettings};
    use crate::tools::register_all_tools;
    use crate::tools::testing::workspace_with_lines;
    use crate::workspace::Workspace;

    struct Harness {
        owner: Option<OwnerThread<Workspace>>,
        dispatcher: Option<Dispatcher>,
    }

    impl Harness {
        fn new() -> Self {
            let ws = workspace_with_lines(2, SttSettings::default(), LlmSettings::default());
            let stt = std::sync::Arc::clone(&ws.stt);
            let owner = OwnerThread::spawn("test-owner", ws).unwrap();
            let ctx = ToolContext::new(owner.handle(), stt);
            Self {
                dispatcher: Some(Dispatcher::new(register_all_tools(), ctx)),
                owner: Some(owner),
            }
        }

        fn d(&self) -> &Dispatcher {
            self.dispatcher.as_ref().unwrap()
        }

        fn json(&self, body: &str) -> Value {
            match self.d().handle_body(body.as_bytes()) {
                HttpReply::Json(v) => v,
                HttpReply::Accepted => panic!("expected a JSON reply"),
            }
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.dispatcher.take();
            if let Some(owner) = self.owner.take() {
                let _ = owner.join();
            }
        }
    }

    #[test]
    fn test_ping() {
        let h = Harness::new();
        let reply = h.json(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
    }

    #[test]
    fn test_unknown_tool_is_success_envelope() {
        let h = Harness::new();
        let reply = h.json(
            r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"__nonexistent__"}}"#,
        );
        assert!(reply.get("error").is_none());
        assert_eq!(
            reply["result"],
            json!({
                "content": [{"type": "text", "text": "Unknown tool: __nonexistent__"}],
                "isError": true
            })
        );
    }

    #[test]
    fn test_batch_of_notifications_is_accepted() {
        let h = Harness::new();
        let body = r#"[
            {"jsonrpc":"2.0","method":"ping"},
            {"jsonrpc":"2.0","method":"notifications/initialized"},
            {"jsonrpc":"2.0","method":"initialize","params":{}}
        ]"#;
        assert_eq!(h.d().handle_body(body.as_bytes()), HttpReply::Accepted);
        // Notifications still run for their side effects.
        assert!(h.d().is_initialized());
    }

    #[test]
    fn test_parse_error() {
        let h = Harness::new();
        let reply = h.json("{not json");
        assert_eq!(reply["error"]["code"], -32700);
        assert_eq!(reply["id"], Value::Null);
    }

    #[test]
    fn test_empty_batch_and_non_object() {
        let h = Harness::new();
        assert_eq!(h.json("[]")["error"]["code"], -32600);
        assert_eq!(h.json("17")["error"]["code"], -32600);
    }

    #[test]
    fn test_invalid_version_keeps_id() {
        let h = Harness::new();
        let reply = h.json(r#"{"jsonrpc":"1.0","id":9,"method":"ping"}"#);
        assert_eq!(reply["error"]["code"], -32600);
        assert_eq!(reply["id"], 9);
    }

    #[test]
    fn test_unknown_method() {
        let h = Harness::new();
        let reply = h.json(r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#);
        assert_eq!(reply["error"]["code"], -32601);
        assert!(reply["error"]["message"]
            .as_str()
            .unwrap()
            .contains("resources/list"));
    }

    #[test]
    fn test_unknown_method_notification_is_silent() {
        let h = Harness::new();
        let reply = h
            .d()
            .handle_body(br#"{"jsonrpc":"2.0","method":"resources/list"}"#);
        assert_eq!(reply, HttpReply::Accepted);
    }

    #[test]
    fn test_failing_notification_is_silent() {
        let h = Harness::new();
        let reply = h
            .d()
            .handle_body(br#"{"jsonrpc":"2.0","method":"tools/call","params":{}}"#);
        assert_eq!(reply, HttpReply::Accepted);

        let reply = h.d().handle_body(
            br#"[{"jsonrpc":"2.0","method":"tools/call","params":{"arguments":{}}},
                 {"jsonrpc":"2.0","method":"nope"}]"#,
        );
        assert_eq!(reply, HttpReply::Accepted);
    }

    #[test]
    fn test_mixed_batch_only_answers_requests() {
        let h = Harness::new();
        let reply = h.json(
            r#"[
                {"jsonrpc":"2.0","id":1,"method":"ping"},
                {"jsonrpc":"2.0","method":"ping"},
                {"jsonrpc":"2.0","id":2,"method":"nope"}
            ]"#,
        );
        let items = reply.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], 1);
        assert_eq!(items[1]["error"]["code"], -32601);
    }

    #[test]
    fn test_initialize_metadata() {
        let h = Harness::new();
        assert!(!h.d().is_initialized());
        let reply = h.json(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#);
        assert_eq!(reply["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(reply["result"]["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(reply["result"]["capabilities"], json!({"tools": {}}));
        assert!(h.d().is_initialized());
    }

    #[test]
    fn test_tools_list_and_missing_name() {
        let h = Harness::new();
        let reply = h.json(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);
        let tools = reply["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), h.d().registry().len());
        assert!(tools.iter().all(|t| t.get("inputSchema").is_some()));

        let reply = h.json(r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{}}"#);
        assert_eq!(reply["error"]["code"], -32603);
        assert!(reply["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Missing tool name"));
    }

    #[test]
    fn test_tools_call_reaches_owner_state() {
        let h = Harness::new();
        let reply = h.json(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call",
                "params":{"name":"project","arguments":{"action":"get_info"}}}"#,
        );
        let text = reply["result"]["content"][0]["text"].as_str().unwrap();
        let info: Value = serde_json::from_str(text).unwrap();
        assert_eq!(info["line_count"], 2);
    }
}

//! Tool registry: name → schema, handler and thread affinity.
//!
//! Provides:
//! - Registration in a stable order (the order `tools/list` reports)
//! - Lookup by name
//! - Invocation with the right thread affinity, converting every failure
//!   into `isError` content

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{json, Value};

use super::errors::ToolError;
use super::ToolContext;
use crate::bridge::panic_message;
use crate::workspace::Workspace;

/// Handler that runs on the owner thread with the workspace.
pub type OwnerFn = dyn Fn(&Value, &mut Workspace) -> Result<Value, ToolError> + Send + Sync;

/// Handler that runs on the calling (transport) thread.
pub type CallerFn = dyn Fn(&Value, &ToolContext) -> Result<Value, ToolError> + Send + Sync;

/// A handler together with its thread affinity.
#[derive(Clone)]
pub enum ToolHandler {
    /// Executed through `run_sync`; the caller blocks until it finishes.
    Owner(Arc<OwnerFn>),
    /// Executed on the caller's thread. Must bracket every workspace access
    /// in its own short `run_sync` and never hold the owner thread across
    /// network I/O.
    Caller(Arc<CallerFn>),
}

/// A named, schema-described tool. Immutable once registered.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Advisory JSON Schema for the arguments; not enforced.
    pub input_schema: Value,
    pub handler: ToolHandler,
}

impl ToolDefinition {
    pub fn on_owner<F>(name: &str, description: &str, input_schema: Value, handler: F) -> Self
    where
        F: Fn(&Value, &mut Workspace) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            handler: ToolHandler::Owner(Arc::new(handler)),
        }
    }

    pub fn on_caller<F>(name: &str, description: &str, input_schema: Value, handler: F) -> Self
    where
        F: Fn(&Value, &ToolContext) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            handler: ToolHandler::Caller(Arc::new(handler)),
        }
    }

    pub fn requires_owner_thread(&self) -> bool {
        matches!(self.handler, ToolHandler::Owner(_))
    }

    /// Entry for `tools/list`.
    pub fn descriptor(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    /// `name → index into tools`.
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A second registration under the same name replaces
    /// the first.
    pub fn register(&mut self, tool: ToolDefinition) {
        match self.index.get(&tool.name) {
            Some(&i) => {
                tracing::warn!(tool = %tool.name, "tool registered twice, replacing");
                self.tools[i] = tool;
            }
            None => {
                self.index.insert(tool.name.clone(), self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Descriptors for `tools/list`, in registration order.
    pub fn list(&self) -> Vec<Value> {
        self.tools.iter().map(ToolDefinition::descriptor).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool and build its `tools/call` result.
    ///
    /// Unknown tools and handler failures are reported as
    /// `{content: [...], isError: true}`; this never fails at the protocol
    /// level.
    pub fn invoke(&self, name: &str, args: &Value, ctx: &ToolContext) -> Value {
        let Some(tool) = self.get(name) else {
            tracing::debug!(tool = %name, "unknown tool requested");
            return error_content(format!("Unknown tool: {name}"));
        };

        let outcome = match &tool.handler {
            ToolHandler::Owner(handler) => {
                let handler = Arc::clone(handler);
                let args = args.clone();
                ctx.owner
                    .run_sync(move |ws: &mut Workspace| handler(&args, ws))
                    .map_err(ToolError::from)
                    .and_then(|result| result)
            }
            ToolHandler::Caller(handler) => catch_unwind(AssertUnwindSafe(|| handler(args, ctx)))
                .unwrap_or_else(|payload| {
                    Err(ToolError::Panicked {
                        message: panic_message(payload.as_ref()),
                    })
                }),
        };

        match outcome {
            Ok(result) => wrap_content(result),
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool failed");
                error_content(format!("Error: {e}"))
            }
        }
    }
}

/// Wrap a raw handler result as text content unless it already has `content`.
pub fn wrap_content(result: Value) -> Value {
    if result.get("content").is_some() {
        return result;
    }
    json!({ "content": [{ "type": "text", "text": result.to_string() }] })
}

/// `isError` result carrying a single text message.
pub fn error_content(message: String) -> Value {
    json!({
        "content": [{ "type": "text", "text": message }],
        "isError": true,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

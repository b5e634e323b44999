//! `project` tool: document-level status and saving.

use serde_json::{json, Value};

use super::args;
use super::errors::ToolError;
use super::registry::ToolDefinition;
use crate::mcp_server::types::{PROTOCOL_VERSION, SERVER_NAME};
use crate::workspace::Workspace;

pub fn definition() -> ToolDefinition {
    ToolDefinition::on_owner(
        "project",
        "Project-level operations.\n\
         - get_info: Line count, revision, audio status and project file\n\
         - save: Write the document to its project file",
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["get_info", "save"],
                    "description": "Operation to perform"
                }
            },
            "required": ["action"]
        }),
        handle,
    )
}

fn handle(args: &Value, ws: &mut Workspace) -> Result<Value, ToolError> {
    match args::action(args)? {
        "get_info" => Ok(info(ws)),
        "save" => {
            ws.document.save()?;
            tracing::info!(path = ?ws.document.store_path(), "project saved");
            Ok(json!({
                "saved": ws.document.store_path().is_some(),
                "project_path": ws.document.store_path(),
            }))
        }
        other => Err(ToolError::invalid(format!("Unknown action: {other}"))),
    }
}

fn info(ws: &Workspace) -> Value {
    json!({
        "server": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "protocol_version": PROTOCOL_VERSION,
        "project_path": ws.document.store_path(),
        "line_count": ws.document.len(),
        "revision": ws.document.revision(),
        "has_audio": ws.audio.is_some(),
        "audio_path": ws.audio_path.as_ref().map(|p| p.display().to_string()),
        "audio_duration_ms": ws.audio.as_ref().map(|a| a.duration_ms()),
        "cached_transcripts": ws.stt.len(),
        "transcripts_in_flight": ws.stt.in_flight_count(),
    })
}

//! `lines` tool: read and edit subtitle lines by stable id.

use serde::Deserialize;
use serde_json::{json, Value};

use super::args;
use super::errors::ToolError;
use super::registry::ToolDefinition;
use crate::document::{CommitKind, Line, LineId, LinePatch, NewLine};
use crate::transcription::FEATURE_KEY;
use crate::workspace::Workspace;

pub fn definition() -> ToolDefinition {
    ToolDefinition::on_owner(
        "lines",
        "Subtitle line operations. Lines are addressed by their stable id.\n\
         - list: Lines with optional pagination (start, count) and filtering (filter_style, filter_actor)\n\
         - get: One line by id, including its cached transcript\n\
         - insert: Insert new lines (lines array required, position optional)\n\
         - update: Batch update lines (updates array with id + fields to modify)\n\
         - delete: Delete lines by ids",
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "get", "insert", "update", "delete"],
                    "description": "Operation to perform"
                },
                "start": {"type": "integer", "description": "Start position for list (0-based)"},
                "count": {"type": "integer", "description": "Number of lines for list"},
                "filter_style": {"type": "string", "description": "Filter by style (for list)"},
                "filter_actor": {"type": "string", "description": "Filter by actor (for list)"},
                "id": {"type": "integer", "description": "Line id (for get)"},
                "lines": {
                    "type": "array",
                    "items": {"type": "object"},
                    "description": "Lines to insert: start_ms, end_ms, text, style, actor"
                },
                "position": {"type": "integer", "description": "Insert position (for insert)"},
                "updates": {
                    "type": "array",
                    "items": {"type": "object"},
                    "description": "Update objects with id + fields (for update)"
                },
                "ids": {"type": "array", "items": {"type": "integer"}, "description": "Line ids (for delete)"}
            },
            "required": ["action"]
        }),
        handle,
    )
}

fn handle(args: &Value, ws: &mut Workspace) -> Result<Value, ToolError> {
    match args::action(args)? {
        "list" => list(args, ws),
        "get" => get(args, ws),
        "insert" => insert(args, ws),
        "update" => update(args, ws),
        "delete" => delete(args, ws),
        other => Err(ToolError::invalid(format!("Unknown action: {other}"))),
    }
}

pub(crate) fn line_json(line: &Line, position: usize) -> Value {
    json!({
        "id": line.id,
        "position": position,
        "start_ms": line.start_ms,
        "end_ms": line.end_ms,
        "style": line.style,
        "actor": line.actor,
        "text": line.text,
    })
}

fn list(args: &Value, ws: &Workspace) -> Result<Value, ToolError> {
    let start = args::optional_usize(args, "start")?.unwrap_or(0);
    let count = args::optional_usize(args, "count")?;
    let style = args::optional_str(args, "filter_style")?.filter(|s| !s.is_empty());
    let actor = args::optional_str(args, "filter_actor")?.filter(|s| !s.is_empty());

    let lines: Vec<Value> = ws
        .document
        .lines()
        .iter()
        .enumerate()
        .skip(start)
        .filter(|(_, l)| style.is_none_or(|s| l.style == s))
        .filter(|(_, l)| actor.is_none_or(|a| l.actor == a))
        .take(count.unwrap_or(usize::MAX))
        .map(|(pos, l)| line_json(l, pos))
        .collect();

    Ok(json!({ "lines": lines, "total": ws.document.len() }))
}

fn get(args: &Value, ws: &Workspace) -> Result<Value, ToolError> {
    let id = args::line_id(args, "id")?;
    let (line, pos) = ws
        .document
        .line(id)
        .zip(ws.document.position(id))
        .ok_or_else(|| ToolError::not_found(format!("Line {id} not found")))?;

    let mut value = line_json(line, pos);
    value["transcript"] = json!(ws.stt.cached_text(id));
    value["transcribing"] = json!(ws.stt.is_in_flight(id));
    Ok(value)
}

fn insert(args: &Value, ws: &mut Workspace) -> Result<Value, ToolError> {
    let new_lines: Vec<NewLine> = args::typed(args, "lines")?;
    if new_lines.is_empty() {
        return Err(ToolError::invalid("'lines' must not be empty"));
    }
    let mut position = args::optional_usize(args, "position")?;
    if position.is_some_and(|p| p > ws.document.len()) {
        position = None;
    }

    let mut ids = Vec::with_capacity(new_lines.len());
    for new in new_lines {
        let id = ws.document.insert_line(position, new)?;
        position = position.map(|p| p + 1);
        ids.push(id);
    }
    ws.document.commit("insert lines", CommitKind::Lines)?;

    Ok(json!({ "inserted": ids.len(), "ids": ids }))
}

#[derive(Deserialize)]
struct LineUpdate {
    id: LineId,
    #[serde(flatten)]
    patch: LinePatch,
}

fn update(args: &Value, ws: &mut Workspace) -> Result<Value, ToolError> {
    let updates: Vec<LineUpdate> = args::typed(args, "updates")?;

    let mut kind = None;
    let mut updated = 0;
    for LineUpdate { id, patch } in updates {
        if patch.is_empty() {
            continue;
        }
        let timing = patch.start_ms.is_some() || patch.end_ms.is_some();
        ws.document.update_line(id, patch)?;
        // New timing means neither the cached transcript nor a running one
        // matches the audio.
        if timing && ws.stt.forget(id) {
            ws.document.set_extradata(id, FEATURE_KEY, "")?;
        }
        kind = match (kind, timing) {
            (_, true) | (Some(CommitKind::Timing), _) => Some(CommitKind::Timing),
            _ => Some(CommitKind::Text),
        };
        updated += 1;
    }

    if let Some(kind) = kind {
        ws.document.commit("update lines", kind)?;
    }
    Ok(json!({ "updated": updated }))
}

fn delete(args: &Value, ws: &mut Workspace) -> Result<Value, ToolError> {
    let ids = args::line_ids(args, "ids")?;
    if let Some(missing) = ids.iter().find(|id| ws.document.line(**id).is_none()) {
        return Err(ToolError::not_found(format!("Line {missing} not found")));
    }

    let mut deleted = 0;
    for id in ids {
        if ws.document.remove_line(id).is_ok() {
            ws.stt.forget(id);
            deleted += 1;
        }
    }
    ws.document.commit("delete lines", CommitKind::Lines)?;
    Ok(json!({ "deleted": deleted }))
}

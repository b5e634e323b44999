//! Argument extraction for tool handlers.
//!
//! Schemas are advisory, so every handler validates what it reads here and
//! reports problems as `ToolError::InvalidArguments`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::errors::ToolError;
use crate::document::LineId;

/// The `action` selector every multi-action tool takes.
pub fn action(args: &Value) -> Result<&str, ToolError> {
    required_str(args, "action")
}

pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    match args.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(ToolError::invalid(format!("'{key}' is required")))
        }
        Some(_) => Err(ToolError::invalid(format!("'{key}' must be a string"))),
    }
}

pub fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ToolError::invalid(format!("'{key}' must be a string"))),
    }
}

pub fn required_i64(args: &Value, key: &str) -> Result<i64, ToolError> {
    optional_i64(args, key)?.ok_or_else(|| ToolError::invalid(format!("'{key}' is required")))
}

pub fn optional_i64(args: &Value, key: &str) -> Result<Option<i64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| ToolError::invalid(format!("'{key}' must be an integer"))),
    }
}

pub fn optional_usize(args: &Value, key: &str) -> Result<Option<usize>, ToolError> {
    match optional_i64(args, key)? {
        None => Ok(None),
        Some(n) if n >= 0 => Ok(Some(n as usize)),
        Some(_) => Err(ToolError::invalid(format!("'{key}' must not be negative"))),
    }
}

pub fn optional_bool(args: &Value, key: &str) -> Result<Option<bool>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ToolError::invalid(format!("'{key}' must be a boolean"))),
    }
}

pub fn line_id(args: &Value, key: &str) -> Result<LineId, ToolError> {
    match args.get(key).and_then(Value::as_u64) {
        Some(id) => Ok(LineId(id)),
        None => Err(ToolError::invalid(format!("'{key}' must be a line id"))),
    }
}

/// A non-empty array of line ids.
pub fn line_ids(args: &Value, key: &str) -> Result<Vec<LineId>, ToolError> {
    let items = args
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::invalid(format!("'{key}' must be an array of line ids")))?;
    if items.is_empty() {
        return Err(ToolError::invalid(format!("'{key}' must not be empty")));
    }
    items
        .iter()
        .map(|v| {
            v.as_u64()
                .map(LineId)
                .ok_or_else(|| ToolError::invalid(format!("'{key}' contains a non-id value: {v}")))
        })
        .collect()
}

/// Deserialize one field into a typed value.
pub fn typed<T: DeserializeOwned>(args: &Value, key: &str) -> Result<T, ToolError> {
    let raw = args
        .get(key)
        .cloned()
        .ok_or_else(|| ToolError::invalid(format!("'{key}' is required")))?;
    serde_json::from_value(raw).map_err(|e| ToolError::invalid(format!("'{key}': {e}")))
}

/// Deserialize an optional field into a typed value.
pub fn optional_typed<T: DeserializeOwned>(args: &Value, key: &str) -> Result<Option<T>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => serde_json::from_value(raw.clone())
            .map(Some)
            .map_err(|e| ToolError::invalid(format!("'{key}': {e}"))),
    }
}

/// `set_config` helper: when `key` is present, store it in `slot` and echo
/// it into `updated`.
pub fn update_setting<T>(
    args: &Value,
    key: &str,
    slot: &mut T,
    updated: &mut Map<String, Value>,
) -> Result<(), ToolError>
where
    T: DeserializeOwned + Serialize,
{
    if let Some(value) = optional_typed::<T>(args, key)? {
        updated.insert(key.to_string(), serde_json::to_value(&value).unwrap_or(Value::Null));
        *slot = value;
    }
    Ok(())
}

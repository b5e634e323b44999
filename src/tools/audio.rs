//! `audio` tool: load the audio track used for transcription.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};

use super::args;
use super::errors::ToolError;
use super::registry::ToolDefinition;
use crate::config::expand_tilde;
use crate::transcription::{AudioSource, PcmBuffer};
use crate::workspace::Workspace;

pub fn definition() -> ToolDefinition {
    ToolDefinition::on_owner(
        "audio",
        "Audio operations.\n\
         - load: Load a PCM WAV file as the project's audio (path required)\n\
         - info: Format and duration of the loaded audio",
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["load", "info"],
                    "description": "Operation to perform"
                },
                "path": {"type": "string", "description": "WAV file path (for load)"}
            },
            "required": ["action"]
        }),
        handle,
    )
}

fn handle(args: &Value, ws: &mut Workspace) -> Result<Value, ToolError> {
    match args::action(args)? {
        "load" => {
            let path = PathBuf::from(expand_tilde(args::required_str(args, "path")?));
            if !path.is_file() {
                return Err(ToolError::not_found(format!(
                    "Audio file not found: {}",
                    path.display()
                )));
            }
            let buffer = PcmBuffer::from_wav_file(&path)?;
            tracing::info!(
                path = %path.display(),
                duration_ms = buffer.duration_ms(),
                "audio loaded"
            );
            ws.set_audio(Arc::new(buffer), Some(path));
            Ok(describe(ws))
        }
        "info" => Ok(describe(ws)),
        other => Err(ToolError::invalid(format!("Unknown action: {other}"))),
    }
}

fn describe(ws: &Workspace) -> Value {
    match &ws.audio {
        Some(audio) => json!({
            "loaded": true,
            "path": ws.audio_path.as_ref().map(|p| p.display().to_string()),
            "duration_ms": audio.duration_ms(),
            "sample_rate": audio.sample_rate(),
            "channels": audio.channels(),
            "bits_per_sample": audio.bytes_per_sample() * 8,
        }),
        None => json!({ "loaded": false }),
    }
}

//! `stt` tool: speech-to-text configuration, per-line transcription through
//! the cache engine, and range transcription into new lines.
//!
//! Runs on the transport thread. Workspace access is bracketed in short
//! `run_sync` calls; provider calls and waits for background completions
//! happen outside them so the owner thread is never held across the network.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};

use super::args;
use super::errors::ToolError;
use super::registry::ToolDefinition;
use super::ToolContext;
use crate::bridge::OwnerHandle;
use crate::config::{mask_secret, SttSettings};
use crate::document::{CommitKind, LineId, NewLine};
use crate::inference::{ProviderError, SttClient, TranscriptSegment, PROVIDER_TIMEOUT};
use crate::transcription::audio::write_wav_clip;
use crate::transcription::{AudioSource, Dispatch};
use crate::workspace::Workspace;

/// How long `transcribe` waits for background results before giving up on
/// the remaining lines. The tasks keep running and still fill the cache.
const TRANSCRIBE_WAIT: Duration = Duration::from_secs(PROVIDER_TIMEOUT.as_secs() + 30);

pub fn definition() -> ToolDefinition {
    ToolDefinition::on_caller(
        "stt",
        "Speech-to-text operations.\n\
         Actions:\n\
         - get_config: Get STT configuration status and settings\n\
         - set_config: Update STT settings (all fields optional)\n\
         - transcribe: Transcribe lines by id (uses cache if available)\n\
         - transcribe_audio: Transcribe a time range and auto-generate subtitle lines with timestamps\n\
         - get_cache: Get cached transcription results\n\
         - clear_cache: Clear transcription cache",
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["get_config", "set_config", "transcribe", "transcribe_audio", "get_cache", "clear_cache"],
                    "description": "Operation to perform"
                },
                "ids": {"type": "array", "items": {"type": "integer"}, "description": "Line ids (for transcribe/get_cache/clear_cache)"},
                "lookahead": {"type": "boolean", "description": "Also warm the cache for the following lines (for transcribe, default true)"},
                "start_ms": {"type": "integer", "description": "Audio range start in ms (for transcribe_audio)"},
                "end_ms": {"type": "integer", "description": "Audio range end in ms (for transcribe_audio)"},
                "language": {"type": "string", "description": "Language code (for set_config, or override for transcribe_audio)"},
                "enabled": {"type": "boolean", "description": "Enable/disable STT (for set_config)"},
                "backend": {"type": "string", "enum": ["whisper", "audio_llm"], "description": "Transcription engine (for set_config)"},
                "base_url": {"type": "string", "description": "API base URL (for set_config)"},
                "api_key": {"type": "string", "description": "API key (for set_config)"},
                "model": {"type": "string", "description": "Model name (for set_config)"},
                "prompt": {"type": "string", "description": "Transcription prompt (for set_config)"},
                "lookahead_lines": {"type": "integer", "description": "Lookahead line count (for set_config)"},
                "max_duration_ms": {"type": "integer", "description": "Longest line sent for transcription (for set_config)"}
            },
            "required": ["action"]
        }),
        handle,
    )
}

fn handle(args: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
    match args::action(args)? {
        "get_config" => ctx.on_owner(|ws| Ok(config_json(ws))),
        "set_config" => set_config(args, ctx),
        "transcribe" => transcribe(args, ctx),
        "transcribe_audio" => transcribe_audio(args, ctx),
        "get_cache" => get_cache(args, ctx),
        "clear_cache" => clear_cache(args, ctx),
        other => Err(ToolError::invalid(format!("Unknown action: {other}"))),
    }
}

// ─── Configuration ──────────────────────────────────────────────────────────

fn config_json(ws: &Workspace) -> Value {
    let s = &ws.stt_settings;
    json!({
        "enabled": s.enabled,
        "configured": ws.stt.transcriber().is_configured(),
        "backend": s.backend,
        "transcriber": ws.stt.transcriber().name(),
        "base_url": s.base_url,
        "api_key_set": !s.api_key.is_empty(),
        "api_key": mask_secret(&s.api_key),
        "model": s.model,
        "language": s.language,
        "prompt": s.prompt,
        "lookahead_lines": s.lookahead_lines,
        "max_duration_ms": s.max_duration_ms,
        "has_audio": ws.audio.is_some(),
        "cached": ws.stt.len(),
        "in_flight": ws.stt.in_flight_count(),
    })
}

fn set_config(args: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
    let args = args.clone();
    ctx.on_owner(move |ws| {
        let mut settings = ws.stt_settings.clone();
        let mut updated = Map::new();
        args::update_setting(&args, "enabled", &mut settings.enabled, &mut updated)?;
        args::update_setting(&args, "backend", &mut settings.backend, &mut updated)?;
        args::update_setting(&args, "base_url", &mut settings.base_url, &mut updated)?;
        if let Some(key) = args::optional_str(&args, "api_key")? {
            settings.api_key = key.to_string();
            updated.insert("api_key_set".into(), json!(true));
        }
        args::update_setting(&args, "model", &mut settings.model, &mut updated)?;
        args::update_setting(&args, "language", &mut settings.language, &mut updated)?;
        args::update_setting(&args, "prompt", &mut settings.prompt, &mut updated)?;
        args::update_setting(&args, "lookahead_lines", &mut settings.lookahead_lines, &mut updated)?;
        args::update_setting(&args, "max_duration_ms", &mut settings.max_duration_ms, &mut updated)?;

        if updated.is_empty() {
            return Err(ToolError::invalid("No config fields provided"));
        }
        tracing::info!(fields = ?updated.keys().collect::<Vec<_>>(), "stt settings updated");
        ws.apply_stt_settings(settings);
        Ok(json!({ "updated": true, "fields": updated }))
    })
}

// ─── Per-line transcription ─────────────────────────────────────────────────

/// Outcome of dispatching one requested line.
enum Slot {
    Done(Value),
    Waiting {
        id: LineId,
        start_ms: i64,
        end_ms: i64,
        from_cache: bool,
    },
}

fn transcribe(args: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
    let ids = args::line_ids(args, "ids")?;
    let lookahead = args::optional_bool(args, "lookahead")?.unwrap_or(true);

    let (tx, rx) = mpsc::channel::<(usize, String)>();
    let owner = ctx.owner.clone();
    let slots = ctx.on_owner(move |ws| dispatch_lines(ws, &owner, &ids, lookahead, &tx))?;

    let mut waiting: HashSet<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| matches!(slot, Slot::Waiting { .. }))
        .map(|(i, _)| i)
        .collect();
    let mut texts: HashMap<usize, String> = HashMap::new();
    let deadline = Instant::now() + TRANSCRIBE_WAIT;

    while !waiting.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((i, text)) => {
                if waiting.remove(&i) {
                    texts.insert(i, text);
                }
            }
            Err(_) => {
                tracing::warn!(pending = waiting.len(), "gave up waiting for transcriptions");
                break;
            }
        }
    }

    let results: Vec<Value> = slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| match slot {
            Slot::Done(value) => value,
            Slot::Waiting {
                id,
                start_ms,
                end_ms,
                from_cache,
            } => match texts.remove(&i) {
                Some(text) if !text.is_empty() => json!({
                    "id": id,
                    "start_ms": start_ms,
                    "end_ms": end_ms,
                    "text": text,
                    "from_cache": from_cache,
                }),
                Some(_) => json!({ "id": id, "error": "Transcription failed" }),
                None => json!({ "id": id, "error": "Transcription timed out" }),
            },
        })
        .collect();

    Ok(json!({ "results": results }))
}

/// Owner-thread half of `transcribe`: validate each line and hand it to the
/// cache engine. Completions arrive on `tx` tagged with the slot index.
fn dispatch_lines(
    ws: &mut Workspace,
    owner: &OwnerHandle<Workspace>,
    ids: &[LineId],
    lookahead: bool,
    tx: &mpsc::Sender<(usize, String)>,
) -> Result<Vec<Slot>, ToolError> {
    if ws.audio.is_none() {
        return Err(ToolError::not_found("No audio loaded"));
    }
    let cache = Arc::clone(&ws.stt);
    let max_ms = ws.stt_settings.max_duration_ms;

    let mut slots = Vec::with_capacity(ids.len());
    for (i, &id) in ids.iter().enumerate() {
        let Some((start_ms, end_ms)) = ws.document.line(id).map(|l| (l.start_ms, l.end_ms)) else {
            slots.push(Slot::Done(json!({ "id": id, "error": "Line not found" })));
            continue;
        };
        let duration = end_ms - start_ms;
        if duration <= 0 {
            slots.push(Slot::Done(json!({ "id": id, "error": "Invalid duration" })));
            continue;
        }
        if max_ms > 0 && duration > max_ms {
            let message = format!("Duration exceeds {}s limit", max_ms / 1000);
            slots.push(Slot::Done(json!({ "id": id, "error": message })));
            continue;
        }

        let from_cache = cache.has_text(id);
        let tx = tx.clone();
        let on_complete = move |text: String| {
            let _ = tx.send((i, text));
        };
        let dispatch = if lookahead {
            cache.transcribe_with_lookahead(ws, owner, id, on_complete)
        } else {
            cache.transcribe_async(ws, owner, id, on_complete)
        };

        slots.push(match dispatch {
            Dispatch::Rejected(reason) => Slot::Done(json!({ "id": id, "error": reason })),
            Dispatch::Cached | Dispatch::Joined | Dispatch::Started => Slot::Waiting {
                id,
                start_ms,
                end_ms,
                from_cache,
            },
        });
    }
    Ok(slots)
}

// ─── Range transcription ────────────────────────────────────────────────────

fn transcribe_audio(args: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
    let (Some(start_ms), Some(end_ms)) = (
        args::optional_i64(args, "start_ms")?,
        args::optional_i64(args, "end_ms")?,
    ) else {
        return Err(ToolError::invalid(
            "'start_ms' and 'end_ms' are required for transcribe_audio",
        ));
    };
    if start_ms < 0 || start_ms >= end_ms {
        return Err(ToolError::invalid("start_ms must be < end_ms"));
    }
    let language = args::optional_str(args, "language")?.map(str::to_string);

    // Snapshot what the upload needs; the buffer is immutable and shareable.
    let (audio, settings): (Arc<dyn AudioSource>, SttSettings) = ctx.on_owner(|ws| {
        let audio = ws
            .audio
            .clone()
            .ok_or_else(|| ToolError::not_found("No audio loaded"))?;
        Ok((audio, ws.stt_settings.clone()))
    })?;
    if !settings.is_configured() {
        return Err(ToolError::NotConfigured {
            reason: "STT API key or base URL not configured".into(),
        });
    }

    let segments = {
        let clip = tempfile::Builder::new()
            .prefix("subbridge-range-")
            .suffix(".wav")
            .tempfile()
            .map_err(ProviderError::from)?;
        write_wav_clip(audio.as_ref(), start_ms, end_ms, clip.path())?;
        SttClient::new(settings).transcribe_segments(clip.path(), language.as_deref())?
    };
    tracing::info!(start_ms, end_ms, segments = segments.len(), "range transcribed");

    ctx.on_owner(move |ws| insert_segments(ws, start_ms, &segments))
}

/// Append one line per segment; segment times are relative to `offset_ms`.
fn insert_segments(
    ws: &mut Workspace,
    offset_ms: i64,
    segments: &[TranscriptSegment],
) -> Result<Value, ToolError> {
    let mut lines = Vec::new();
    for segment in segments {
        let start_ms = offset_ms + (segment.start * 1000.0).round() as i64;
        let end_ms = (offset_ms + (segment.end * 1000.0).round() as i64).max(start_ms);
        let id = ws.document.insert_line(
            None,
            NewLine {
                start_ms,
                end_ms,
                text: segment.text.clone(),
                ..Default::default()
            },
        )?;
        lines.push(json!({
            "id": id,
            "start_ms": start_ms,
            "end_ms": end_ms,
            "text": segment.text,
        }));
    }
    if !lines.is_empty() {
        ws.document.commit("transcribe audio", CommitKind::Lines)?;
    }
    Ok(json!({ "lines_created": lines.len(), "lines": lines }))
}

// ─── Cache inspection ───────────────────────────────────────────────────────

fn optional_ids(args: &Value) -> Result<Option<Vec<LineId>>, ToolError> {
    match args.get("ids") {
        None | Some(Value::Null) => Ok(None),
        Some(_) => args::line_ids(args, "ids").map(Some),
    }
}

fn get_cache(args: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
    let results: Vec<Value> = match optional_ids(args)? {
        Some(ids) => ids
            .into_iter()
            .filter_map(|id| ctx.stt.cached_text(id).map(|text| json!({ "id": id, "text": text })))
            .collect(),
        None => ctx
            .stt
            .entries()
            .into_iter()
            .map(|(id, text)| json!({ "id": id, "text": text }))
            .collect(),
    };
    Ok(json!({ "count": results.len(), "results": results }))
}

fn clear_cache(args: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
    let cleared = match optional_ids(args)? {
        Some(ids) => ids.into_iter().filter(|id| ctx.stt.invalidate(*id)).count(),
        None => {
            let count = ctx.stt.len();
            ctx.stt.clear();
            count
        }
    };
    tracing::info!(cleared, "transcript cache cleared");
    Ok(json!({ "cleared": cleared }))
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmSettings;
    use crate::test_support::FakeEndpoint;
    use crate::tools::testing::{silence, workspace_with_lines, Fixture};
    use crate::transcription::FEATURE_KEY;
    use std::thread;

    fn fixture(base_url: &str, lookahead_lines: usize) -> Fixture {
        let settings = SttSettings {
            base_url: base_url.into(),
            api_key: "stt-key".into(),
            lookahead_lines,
            ..Default::default()
        };
        let mut ws = workspace_with_lines(4, settings, LlmSettings::default());
        ws.set_audio(silence(5), None);
        Fixture::new(ws)
    }

    fn wait_idle(fx: &Fixture) {
        for _ in 0..500 {
            if fx.ctx().stt.in_flight_count() == 0 {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("transcriptions did not drain");
    }

    #[test]
    fn test_transcribe_calls_provider_once_then_serves_cache() {
        let endpoint = FakeEndpoint::serve(200, "  hello there \n");
        let fx = fixture(&endpoint.base_url, 0);

        let first = fx.call_ok("stt", json!({"action": "transcribe", "ids": [1]}));
        assert_eq!(
            first["results"][0],
            json!({"id": 1, "start_ms": 0, "end_ms": 800, "text": "hello there", "from_cache": false})
        );
        let request = endpoint.request();
        assert_eq!(request.header("authorization"), Some("Bearer stt-key"));
        assert!(request.url.ends_with("/audio/transcriptions"));
        assert!(request.body_text().contains("name=\"response_format\"\r\n\r\ntext"));

        let second = fx.call_ok("stt", json!({"action": "transcribe", "ids": [1]}));
        assert_eq!(second["results"][0]["from_cache"], true);
        assert_eq!(second["results"][0]["text"], "hello there");

        let stored = fx.on_owner(|ws| {
            ws.document
                .extradata(LineId(1), FEATURE_KEY)
                .map(str::to_string)
        });
        assert_eq!(stored.as_deref(), Some("hello there"));
        fx.finish();
    }

    #[test]
    fn test_transcribe_reports_per_line_errors() {
        let endpoint = FakeEndpoint::serve(200, "unused");
        let fx = fixture(&endpoint.base_url, 0);
        let long = fx.on_owner(|ws| {
            ws.document
                .insert_line(None, NewLine { start_ms: 0, end_ms: 61_000, ..Default::default() })
                .unwrap()
        });

        let result = fx.call_ok(
            "stt",
            json!({"action": "transcribe", "ids": [99, long.0], "lookahead": false}),
        );
        assert_eq!(result["results"][0], json!({"id": 99, "error": "Line not found"}));
        assert_eq!(
            result["results"][1],
            json!({"id": long.0, "error": "Duration exceeds 60s limit"})
        );
        fx.finish();
    }

    #[test]
    fn test_transcribe_requires_audio_and_configuration() {
        let fx = Fixture::with_lines(2);
        let message = fx.call_err("stt", json!({"action": "transcribe", "ids": [1]}));
        assert!(message.contains("No audio loaded"));

        fx.on_owner(|ws| ws.set_audio(silence(2), None));
        let result = fx.call_ok("stt", json!({"action": "transcribe", "ids": [1]}));
        let error = result["results"][0]["error"].as_str().unwrap();
        assert!(error.contains("not configured"), "{error}");
        fx.finish();
    }

    #[test]
    fn test_transcribe_provider_failure_is_reported_and_retryable() {
        let endpoint = FakeEndpoint::serve(500, r#"{"error":{"message":"overloaded"}}"#);
        let fx = fixture(&endpoint.base_url, 0);
        let result = fx.call_ok("stt", json!({"action": "transcribe", "ids": [2]}));
        assert_eq!(result["results"][0], json!({"id": 2, "error": "Transcription failed"}));
        assert!(!fx.ctx().stt.is_in_flight(LineId(2)));
        assert!(!fx.ctx().stt.has_text(LineId(2)));
        fx.finish();
    }

    #[test]
    fn test_lookahead_warms_following_lines() {
        let endpoint = FakeEndpoint::serve_n(3, 200, "warm");
        let fx = fixture(&endpoint.base_url, 2);
        let result = fx.call_ok("stt", json!({"action": "transcribe", "ids": [1]}));
        assert_eq!(result["results"][0]["text"], "warm");
        wait_idle(&fx);

        let cache = fx.call_ok("stt", json!({"action": "get_cache"}));
        assert_eq!(cache["count"], 3);
        let ids: Vec<u64> = cache["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        fx.finish();
    }

    #[test]
    fn test_transcribe_audio_creates_lines() {
        let endpoint = FakeEndpoint::serve(
            200,
            r#"{"segments":[
                {"start":0.0,"end":1.2,"text":" Hi "},
                {"start":1.5,"end":2.0,"text":"   "},
                {"start":2.0,"end":2.5,"text":"there"}
            ]}"#,
        );
        let fx = fixture(&endpoint.base_url, 0);
        let result = fx.call_ok(
            "stt",
            json!({"action": "transcribe_audio", "start_ms": 1000, "end_ms": 4000, "language": "ja"}),
        );
        assert_eq!(result["lines_created"], 2);
        assert_eq!(
            result["lines"][0],
            json!({"id": 5, "start_ms": 1000, "end_ms": 2200, "text": "Hi"})
        );
        assert_eq!(result["lines"][1]["start_ms"], 3000);
        assert_eq!(result["lines"][1]["end_ms"], 3500);

        let body = endpoint.request().body_text();
        assert!(body.contains("verbose_json"));
        assert!(body.contains("name=\"language\"\r\n\r\nja"));
        assert_eq!(fx.on_owner(|ws| ws.document.len()), 6);
        fx.finish();
    }

    #[test]
    fn test_transcribe_audio_validation() {
        let fx = Fixture::with_lines(0);
        let missing = fx.call_err("stt", json!({"action": "transcribe_audio", "start_ms": 0}));
        assert!(missing.contains("'start_ms' and 'end_ms' are required"));
        let inverted =
            fx.call_err("stt", json!({"action": "transcribe_audio", "start_ms": 10, "end_ms": 5}));
        assert!(inverted.contains("start_ms must be < end_ms"));
        let no_audio =
            fx.call_err("stt", json!({"action": "transcribe_audio", "start_ms": 0, "end_ms": 5}));
        assert!(no_audio.contains("No audio loaded"));
        fx.finish();
    }

    #[test]
    fn test_set_and_get_config() {
        let fx = Fixture::with_lines(0);
        let empty = fx.call_err("stt", json!({"action": "set_config"}));
        assert!(empty.contains("No config fields provided"));

        let result = fx.call_ok(
            "stt",
            json!({
                "action": "set_config",
                "model": "whisper-large",
                "api_key": "secret-1234",
                "lookahead_lines": 3
            }),
        );
        assert_eq!(
            result,
            json!({
                "updated": true,
                "fields": {"model": "whisper-large", "api_key_set": true, "lookahead_lines": 3}
            })
        );

        let config = fx.call_ok("stt", json!({"action": "get_config"}));
        assert_eq!(config["api_key_set"], true);
        assert_eq!(config["api_key"], "****1234");
        assert_eq!(config["model"], "whisper-large");
        assert_eq!(config["configured"], true);
        assert_eq!(config["has_audio"], false);
        assert_eq!(fx.ctx().stt.lookahead(), 3);

        fx.call_ok("stt", json!({"action": "set_config", "backend": "audio_llm"}));
        let config = fx.call_ok("stt", json!({"action": "get_config"}));
        assert_eq!(config["backend"], "audio_llm");
        assert_eq!(config["transcriber"], "Gemini");
        fx.finish();
    }

    #[test]
    fn test_get_and_clear_cache() {
        let fx = Fixture::with_lines(3);
        fx.on_owner(|ws| {
            ws.document.set_extradata(LineId(1), FEATURE_KEY, "one").unwrap();
            ws.document.set_extradata(LineId(2), FEATURE_KEY, "two").unwrap();
            ws.stt.load_from_extradata(&ws.document);
        });

        let all = fx.call_ok("stt", json!({"action": "get_cache"}));
        assert_eq!(all["count"], 2);
        let some = fx.call_ok("stt", json!({"action": "get_cache", "ids": [2, 3]}));
        assert_eq!(some, json!({"count": 1, "results": [{"id": 2, "text": "two"}]}));

        let cleared = fx.call_ok("stt", json!({"action": "clear_cache", "ids": [1, 3]}));
        assert_eq!(cleared["cleared"], 1);
        let cleared = fx.call_ok("stt", json!({"action": "clear_cache"}));
        assert_eq!(cleared["cleared"], 1);
        assert!(fx.ctx().stt.is_empty());
        fx.finish();
    }
}

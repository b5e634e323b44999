//! `audio_llm` tool: send text plus an optional audio range to the configured
//! multimodal LLM.
//!
//! Runs on the transport thread; the owner thread is only entered to read
//! settings and take a reference to the loaded audio.

use std::sync::Arc;

use base64::Engine as _;
use serde_json::{json, Map, Value};

use super::args;
use super::errors::ToolError;
use super::registry::ToolDefinition;
use super::ToolContext;
use crate::config::{mask_secret, LlmSettings};
use crate::inference::{LlmProvider, LlmRequest};
use crate::transcription::audio::wav_clip_bytes;
use crate::transcription::AudioSource;
use crate::workspace::Workspace;

const PROVIDERS: [&str; 2] = ["gemini", "openai"];

pub fn definition() -> ToolDefinition {
    ToolDefinition::on_caller(
        "audio_llm",
        "Multimodal LLM with audio understanding.\n\
         Sends audio + text to a configurable LLM (Gemini or an OpenAI-compatible endpoint).\n\
         \n\
         Example workflows:\n\
         - Proofread subtitles: send audio + subtitle text with a proofreading prompt to fix\n\
         \x20 misheard words, punctuation and filler words while preserving timestamps.\n\
         - Translate subtitles: send audio + proofread text with a translation prompt; the\n\
         \x20 audio gives tone and emphasis for a natural translation.\n\
         \n\
         Actions:\n\
         - get_config: Get Audio LLM configuration and status\n\
         - set_config: Update Audio LLM settings (provider, api_key, model, base_url, http_proxy)\n\
         - call: Send audio range + text prompt to the LLM, returns response text",
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["get_config", "set_config", "call"],
                    "description": "Operation to perform"
                },
                "system_prompt": {"type": "string", "description": "System instruction for the LLM (for call)"},
                "text": {"type": "string", "description": "User text content, e.g. subtitles (for call)"},
                "start_ms": {"type": "integer", "description": "Audio range start in ms (for call, optional; omit to send no audio)"},
                "end_ms": {"type": "integer", "description": "Audio range end in ms (for call)"},
                "provider": {"type": "string", "enum": PROVIDERS, "description": "LLM provider (for set_config)"},
                "api_key": {"type": "string", "description": "API key (for set_config)"},
                "model": {"type": "string", "description": "Model name (for set_config)"},
                "base_url": {"type": "string", "description": "API base URL (for set_config)"},
                "http_proxy": {"type": "string", "description": "Outbound proxy URL (for set_config)"}
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
        "call" => call(args, ctx),
        other => Err(ToolError::invalid(format!("Unknown action: {other}"))),
    }
}

fn config_json(ws: &Workspace) -> Value {
    let s = &ws.llm_settings;
    json!({
        "provider": s.provider,
        "configured": s.is_configured(),
        "api_key_set": !s.api_key.is_empty(),
        "api_key": mask_secret(&s.api_key),
        "model": s.model,
        "base_url": s.base_url,
        "http_proxy": s.http_proxy,
        "max_audio_ms": s.max_audio_ms,
        "has_audio": ws.audio.is_some(),
    })
}

fn set_config(args: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
    if let Some(provider) = args::optional_str(args, "provider")? {
        if !PROVIDERS.contains(&provider.to_ascii_lowercase().as_str()) {
            return Err(ToolError::invalid(format!(
                "Unknown provider '{provider}', expected one of: {}",
                PROVIDERS.join(", ")
            )));
        }
    }

    let args = args.clone();
    ctx.on_owner(move |ws| {
        let mut settings = ws.llm_settings.clone();
        let mut updated = Map::new();
        args::update_setting(&args, "provider", &mut settings.provider, &mut updated)?;
        if let Some(key) = args::optional_str(&args, "api_key")? {
            settings.api_key = key.to_string();
            updated.insert("api_key_set".into(), json!(true));
        }
        args::update_setting(&args, "model", &mut settings.model, &mut updated)?;
        args::update_setting(&args, "base_url", &mut settings.base_url, &mut updated)?;
        args::update_setting(&args, "http_proxy", &mut settings.http_proxy, &mut updated)?;

        if updated.is_empty() {
            return Err(ToolError::invalid("No config fields provided"));
        }
        tracing::info!(fields = ?updated.keys().collect::<Vec<_>>(), "audio llm settings updated");
        ws.apply_llm_settings(settings);
        Ok(json!({ "updated": true, "fields": updated }))
    })
}

fn call(args: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
    let (Some(system_prompt), Some(text)) = (
        args::optional_str(args, "system_prompt")?,
        args::optional_str(args, "text")?,
    ) else {
        return Err(ToolError::invalid(
            "'system_prompt' and 'text' are required for call action",
        ));
    };

    let range = match (
        args::optional_i64(args, "start_ms")?,
        args::optional_i64(args, "end_ms")?,
    ) {
        (Some(start_ms), Some(end_ms)) => {
            if start_ms < 0 || start_ms >= end_ms {
                return Err(ToolError::invalid("start_ms must be < end_ms"));
            }
            Some((start_ms, end_ms))
        }
        (None, None) => None,
        _ => {
            return Err(ToolError::invalid(
                "'start_ms' and 'end_ms' must be given together",
            ))
        }
    };

    let with_audio = range.is_some();
    let (settings, audio): (LlmSettings, Option<Arc<dyn AudioSource>>) = ctx.on_owner(move |ws| {
        let audio = if with_audio {
            let audio = ws
                .audio
                .clone()
                .ok_or_else(|| ToolError::not_found("No audio loaded"))?;
            Some(audio)
        } else {
            None
        };
        Ok((ws.llm_settings.clone(), audio))
    })?;

    let mut request = LlmRequest::text(system_prompt, text);
    let mut audio_duration_ms = 0;
    if let (Some((start_ms, end_ms)), Some(audio)) = (range, audio) {
        audio_duration_ms = end_ms - start_ms;
        if settings.max_audio_ms > 0 && audio_duration_ms > settings.max_audio_ms {
            let secs = settings.max_audio_ms / 1000;
            return Err(ToolError::invalid(format!(
                "Maximum audio duration is {secs} seconds ({} minutes). Split into smaller segments.",
                secs / 60
            )));
        }
        let wav = wav_clip_bytes(audio.as_ref(), start_ms, end_ms)?;
        request = request.with_audio(
            base64::engine::general_purpose::STANDARD.encode(wav),
            "audio/wav",
        );
    }

    let provider = LlmProvider::from_settings(&settings);
    if !provider.is_configured() {
        return Err(ToolError::NotConfigured {
            reason: "Audio LLM is not configured. Set API key and base URL first.".into(),
        });
    }

    tracing::info!(
        provider = provider.name(),
        model = %settings.model,
        audio_duration_ms,
        "audio llm call"
    );
    let response = provider.call(&request);
    if !response.success {
        return Err(ToolError::LlmFailed {
            reason: response.error_message,
        });
    }

    Ok(json!({
        "response": response.text,
        "model": settings.model,
        "provider": settings.provider,
        "audio_duration_ms": audio_duration_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SttSettings;
    use crate::test_support::FakeEndpoint;
    use crate::tools::testing::{silence, workspace_with_lines, Fixture};

    const GEMINI_REPLY: &str =
        r#"{"candidates":[{"content":{"parts":[{"text":"fixed "},{"text":"subtitles"}]}}]}"#;

    fn fixture(base_url: &str) -> Fixture {
        let llm = LlmSettings {
            base_url: base_url.into(),
            api_key: "llm-key".into(),
            ..Default::default()
        };
        let mut ws = workspace_with_lines(1, SttSettings::default(), llm);
        ws.set_audio(silence(4), None);
        Fixture::new(ws)
    }

    #[test]
    fn test_call_with_audio_range() {
        let endpoint = FakeEndpoint::serve(200, GEMINI_REPLY);
        let fx = fixture(&endpoint.base_url);
        let result = fx.call_ok(
            "audio_llm",
            json!({
                "action": "call",
                "system_prompt": "Proofread.",
                "text": "1\n00:00:00,000 --> 00:00:01,000\nhelo",
                "start_ms": 500,
                "end_ms": 2500
            }),
        );
        assert_eq!(
            result,
            json!({
                "response": "fixed subtitles",
                "model": "gemini-2.0-flash",
                "provider": "gemini",
                "audio_duration_ms": 2000
            })
        );

        let body = endpoint.request().body_json();
        let inline = &body["contents"][0]["parts"][0]["inlineData"];
        assert_eq!(inline["mimeType"], "audio/wav");
        let wav = base64::engine::general_purpose::STANDARD
            .decode(inline["data"].as_str().unwrap())
            .unwrap();
        // 2 s of 16 kHz mono 16-bit plus the header.
        assert_eq!(wav.len(), 44 + 64_000);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Proofread.");
        fx.finish();
    }

    #[test]
    fn test_call_without_range_sends_text_only() {
        let endpoint = FakeEndpoint::serve(200, GEMINI_REPLY);
        let fx = fixture(&endpoint.base_url);
        let result = fx.call_ok(
            "audio_llm",
            json!({"action": "call", "system_prompt": "", "text": "hello"}),
        );
        assert_eq!(result["audio_duration_ms"], 0);
        let body = endpoint.request().body_json();
        assert_eq!(body["contents"][0]["parts"], json!([{"text": "hello"}]));
        fx.finish();
    }

    #[test]
    fn test_call_validation() {
        let fx = Fixture::with_lines(0);
        let missing = fx.call_err("audio_llm", json!({"action": "call", "text": "x"}));
        assert!(missing.contains("'system_prompt' and 'text' are required"));

        let no_audio = fx.call_err(
            "audio_llm",
            json!({"action": "call", "system_prompt": "s", "text": "t", "start_ms": 0, "end_ms": 1000}),
        );
        assert!(no_audio.contains("No audio loaded"));

        fx.on_owner(|ws| ws.set_audio(silence(1), None));
        let too_long = fx.call_err(
            "audio_llm",
            json!({"action": "call", "system_prompt": "s", "text": "t", "start_ms": 0, "end_ms": 300_001}),
        );
        assert!(too_long.contains("Maximum audio duration is 300 seconds (5 minutes)"));

        for half in [json!({"start_ms": 0}), json!({"end_ms": 500})] {
            let mut args = json!({"action": "call", "system_prompt": "s", "text": "t"});
            args.as_object_mut()
                .unwrap()
                .extend(half.as_object().unwrap().clone());
            let message = fx.call_err("audio_llm", args);
            assert!(message.contains("'start_ms' and 'end_ms' must be given together"));
        }

        let unconfigured = fx.call_err(
            "audio_llm",
            json!({"action": "call", "system_prompt": "s", "text": "t"}),
        );
        assert!(unconfigured
            .contains("Audio LLM is not configured. Set API key and base URL first."));
        fx.finish();
    }

    #[test]
    fn test_provider_failure_is_tool_error() {
        let endpoint = FakeEndpoint::serve(200, r#"{"error":{"message":"quota exceeded"}}"#);
        let fx = fixture(&endpoint.base_url);
        let message = fx.call_err(
            "audio_llm",
            json!({"action": "call", "system_prompt": "s", "text": "t"}),
        );
        assert_eq!(message, "Error: LLM call failed: quota exceeded");
        fx.finish();
    }

    #[test]
    fn test_set_config_switches_provider() {
        let fx = Fixture::with_lines(0);
        assert!(fx
            .call_err("audio_llm", json!({"action": "set_config"}))
            .contains("No config fields provided"));
        assert!(fx
            .call_err("audio_llm", json!({"action": "set_config", "provider": "claude"}))
            .contains("Unknown provider"));

        let result = fx.call_ok(
            "audio_llm",
            json!({"action": "set_config", "provider": "openai", "api_key": "sk-abcd1234", "model": "gpt-4o-audio-preview"}),
        );
        assert_eq!(
            result["fields"],
            json!({"provider": "openai", "api_key_set": true, "model": "gpt-4o-audio-preview"})
        );

        let config = fx.call_ok("audio_llm", json!({"action": "get_config"}));
        assert_eq!(config["provider"], "openai");
        assert_eq!(config["api_key"], "****1234");
        assert_eq!(config["configured"], true);
        fx.finish();
    }
}

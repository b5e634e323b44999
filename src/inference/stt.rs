//! Speech-to-text client for OpenAI-compatible `/audio/transcriptions`
//! endpoints (Whisper and friends).

use std::path::Path;

use reqwest::blocking::multipart::Form;
use serde_json::Value;

use super::client::{build_http_client, PROVIDER_TIMEOUT};
use super::errors::ProviderError;
use super::types::TranscriptSegment;
use crate::config::{normalize_language, SttSettings};

/// `response_format` for plain per-line transcription.
const FORMAT_TEXT: &str = "text";
/// `response_format` for timed segments.
const FORMAT_VERBOSE: &str = "verbose_json";

/// Blocking multipart uploader. One request per call.
#[derive(Debug, Clone)]
pub struct SttClient {
    settings: SttSettings,
}

impl SttClient {
    pub fn new(settings: SttSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SttSettings {
        &self.settings
    }

    pub fn is_configured(&self) -> bool {
        self.settings.is_configured()
    }

    /// Transcribe a whole audio file to plain text.
    pub fn transcribe_file(&self, path: &Path) -> Result<String, ProviderError> {
        let body = self.upload(path, FORMAT_TEXT, self.settings.language_hint())?;
        Ok(parse_text_response(&body))
    }

    /// Transcribe a file into timed segments. `language` overrides the
    /// configured language when given.
    pub fn transcribe_segments(
        &self,
        path: &Path,
        language: Option<&str>,
    ) -> Result<Vec<TranscriptSegment>, ProviderError> {
        let language = match language {
            Some(l) => normalize_language(l),
            None => self.settings.language_hint(),
        };
        let body = self.upload(path, FORMAT_VERBOSE, language)?;
        parse_verbose_response(&body)
    }

    fn upload(
        &self,
        path: &Path,
        response_format: &str,
        language: Option<&str>,
    ) -> Result<String, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured {
                provider: "STT".into(),
                reason: "API key or base URL not set".into(),
            });
        }

        let url = format!(
            "{}/audio/transcriptions",
            self.settings.base_url.trim_end_matches('/')
        );

        let mut form = Form::new()
            .file("file", path)?
            .text("model", self.settings.model.clone())
            .text("response_format", response_format.to_string());
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }
        if !self.settings.prompt.is_empty() {
            form = form.text("prompt", self.settings.prompt.clone());
        }

        tracing::debug!(endpoint = %url, response_format, "stt upload");

        let http = build_http_client("")?;
        let timeout_secs = PROVIDER_TIMEOUT.as_secs();
        let response = http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .multipart(form)
            .send()
            .map_err(|e| ProviderError::from_reqwest(&url, timeout_secs, e))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| ProviderError::from_reqwest(&url, timeout_secs, e))?;

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &body));
        }
        Ok(body)
    }
}

/// Prefer the provider's own error message over the raw body.
fn error_from_body(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match message {
        Some(message) => ProviderError::ApiError { message },
        None => ProviderError::HttpError {
            status,
            body: body.trim().to_string(),
        },
    }
}

/// Plain-text responses are trimmed; some servers answer `{"text": ...}`
/// even when asked for text.
pub fn parse_text_response(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            if let Some(text) = value.get("text").and_then(Value::as_str) {
                return text.trim().to_string();
            }
        }
    }
    trimmed.to_string()
}

/// Parse a `verbose_json` body into segments, dropping blank ones.
///
/// A response with text but no segment list becomes one segment covering
/// the reported duration.
pub fn parse_verbose_response(body: &str) -> Result<Vec<TranscriptSegment>, ProviderError> {
    let value: Value = serde_json::from_str(body).map_err(|e| ProviderError::ParseError {
        reason: e.to_string(),
    })?;

    if let Some(segments) = value.get("segments").and_then(Value::as_array) {
        return Ok(segments
            .iter()
            .filter_map(|s| {
                let text = s.get("text").and_then(Value::as_str)?.trim();
                if text.is_empty() {
                    return None;
                }
                Some(TranscriptSegment {
                    start: s.get("start").and_then(Value::as_f64).unwrap_or(0.0),
                    end: s.get("end").and_then(Value::as_f64).unwrap_or(0.0),
                    text: text.to_string(),
                })
            })
            .collect());
    }

    match value.get("text").and_then(Value::as_str).map(str::trim) {
        Some(text) if !text.is_empty() => Ok(vec![TranscriptSegment {
            start: 0.0,
            end: value.get("duration").and_then(Value::as_f64).unwrap_or(0.0),
            text: text.to_string(),
        }]),
        Some(_) => Ok(Vec::new()),
        None => Err(ProviderError::ParseError {
            reason: "response has neither segments nor text".into(),
        }),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

//! Multimodal LLM provider client.
//!
//! A closed set of provider styles, selected by a configuration string:
//! Google Gemini (`generateContent`, key in the query string) and any
//! OpenAI-compatible chat completions endpoint (bearer auth). Each call is a
//! single blocking POST, so callers must not be on the owner thread.

use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::errors::ProviderError;
use super::types::{LlmRequest, LlmResponse};
use crate::config::LlmSettings;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Total request timeout. Generous because requests may carry minutes of
/// base64 audio.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(300);

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Message reported for unreachable endpoints and text-less answers.
const EMPTY_RESPONSE: &str = "empty response";

// ─── HTTP helpers ────────────────────────────────────────────────────────────

/// Build a blocking client with the provider timeout and an optional proxy.
pub(crate) fn build_http_client(proxy: &str) -> Result<HttpClient, ProviderError> {
    let mut builder = HttpClient::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(PROVIDER_TIMEOUT);

    if !proxy.trim().is_empty() {
        let proxy = reqwest::Proxy::all(proxy.trim()).map_err(|e| ProviderError::RequestFailed {
            endpoint: proxy.to_string(),
            reason: format!("invalid proxy: {e}"),
        })?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|e| ProviderError::RequestFailed {
        endpoint: String::new(),
        reason: format!("failed to build HTTP client: {e}"),
    })
}

/// URL safe for logs: query strings may carry API keys.
pub(crate) fn redact_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// POST a JSON body and return `(status, body)` regardless of status.
fn post_json(
    http: &HttpClient,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
) -> Result<(u16, String), ProviderError> {
    let endpoint = redact_url(url);
    tracing::debug!(endpoint, "provider POST");

    let mut request = http.post(url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .map_err(|e| ProviderError::from_reqwest(endpoint, PROVIDER_TIMEOUT.as_secs(), e))?;
    let status = response.status().as_u16();
    let text = response
        .text()
        .map_err(|e| ProviderError::from_reqwest(endpoint, PROVIDER_TIMEOUT.as_secs(), e))?;

    tracing::debug!(endpoint, status, bytes = text.len(), "provider response");
    Ok((status, text))
}

fn trim_base(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

// ─── LlmProvider ─────────────────────────────────────────────────────────────

/// Google Gemini `generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    settings: LlmSettings,
}

/// OpenAI-compatible `/chat/completions` with `input_audio` parts.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    settings: LlmSettings,
}

/// Closed union of supported provider styles.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Gemini(GeminiProvider),
    OpenAiCompatible(OpenAiProvider),
}

impl LlmProvider {
    /// Pick the provider style from `settings.provider`: `openai` selects the
    /// OpenAI-compatible style, anything else Gemini.
    pub fn from_settings(settings: &LlmSettings) -> Self {
        if settings.provider.trim().eq_ignore_ascii_case("openai") {
            LlmProvider::OpenAiCompatible(OpenAiProvider {
                settings: settings.clone(),
            })
        } else {
            LlmProvider::Gemini(GeminiProvider {
                settings: settings.clone(),
            })
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Gemini(_) => "Gemini",
            LlmProvider::OpenAiCompatible(_) => "OpenAI",
        }
    }

    fn settings(&self) -> &LlmSettings {
        match self {
            LlmProvider::Gemini(p) => &p.settings,
            LlmProvider::OpenAiCompatible(p) => &p.settings,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.settings().is_configured()
    }

    /// Endpoint URL for this provider (may contain the API key).
    fn endpoint(&self) -> String {
        let s = self.settings();
        match self {
            LlmProvider::Gemini(_) => format!(
                "{}/models/{}:generateContent?key={}",
                trim_base(&s.base_url),
                s.model,
                s.api_key
            ),
            LlmProvider::OpenAiCompatible(_) => {
                format!("{}/chat/completions", trim_base(&s.base_url))
            }
        }
    }

    /// Provider-specific JSON request body.
    pub fn build_body(&self, request: &LlmRequest) -> Value {
        match self {
            LlmProvider::Gemini(_) => gemini_body(request),
            LlmProvider::OpenAiCompatible(p) => openai_body(&p.settings.model, request),
        }
    }

    /// Extract generated text (or the provider's error) from a response body.
    pub fn parse_response(&self, body: &str) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Gemini(_) => parse_gemini_response(body),
            LlmProvider::OpenAiCompatible(_) => parse_openai_response(body),
        }
    }

    /// Perform one call. Never fails: every problem becomes
    /// `LlmResponse { success: false, .. }`.
    pub fn call(&self, request: &LlmRequest) -> LlmResponse {
        if !self.is_configured() {
            return LlmResponse::failed(
                ProviderError::NotConfigured {
                    provider: self.name().into(),
                    reason: "API key or base URL not set".into(),
                }
                .to_string(),
            );
        }

        let http = match build_http_client(&self.settings().http_proxy) {
            Ok(http) => http,
            Err(e) => return LlmResponse::failed(e.to_string()),
        };

        let url = self.endpoint();
        let bearer = match self {
            LlmProvider::Gemini(_) => None,
            LlmProvider::OpenAiCompatible(p) => Some(p.settings.api_key.as_str()),
        };

        let (status, body) = match post_json(&http, &url, bearer, &self.build_body(request)) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(provider = self.name(), error = %e, "provider request failed");
                return LlmResponse::failed(EMPTY_RESPONSE);
            }
        };

        if body.trim().is_empty() {
            return LlmResponse::failed(EMPTY_RESPONSE);
        }

        match self.parse_response(&body) {
            Ok(text) => LlmResponse::ok(text),
            Err(ProviderError::ParseError { .. }) if !(200..300).contains(&status) => {
                LlmResponse::failed(
                    ProviderError::HttpError {
                        status,
                        body: truncate(&body, 512),
                    }
                    .to_string(),
                )
            }
            Err(e) => {
                tracing::warn!(provider = self.name(), status, error = %e, "provider returned an error");
                LlmResponse::failed(e.to_string())
            }
        }
    }
}

// ─── Gemini wire format ──────────────────────────────────────────────────────

fn gemini_body(request: &LlmRequest) -> Value {
    let mut parts = Vec::new();
    if let Some(audio) = request.audio_base64.as_deref().filter(|a| !a.is_empty()) {
        parts.push(json!({
            "inlineData": {
                "mimeType": request.audio_mime_type.as_deref().unwrap_or("audio/wav"),
                "data": audio,
            }
        }));
    }
    parts.push(json!({ "text": request.user_text }));

    let mut body = json!({ "contents": [{ "parts": parts }] });
    if !request.system_prompt.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": request.system_prompt }] });
    }
    body
}

fn parse_gemini_response(body: &str) -> Result<String, ProviderError> {
    let value: Value = serde_json::from_str(body).map_err(|e| ProviderError::ParseError {
        reason: e.to_string(),
    })?;

    if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
        return Err(ProviderError::ApiError {
            message: message.to_string(),
        });
    }

    let candidate = value
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| ProviderError::ApiError {
            message: "No candidates in response".into(),
        })?;

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text)
}

// ─── OpenAI wire format ──────────────────────────────────────────────────────

/// `input_audio.format` for a MIME type (`audio/wav` → `wav`).
fn audio_format(mime_type: Option<&str>) -> &str {
    match mime_type.unwrap_or("audio/wav") {
        "audio/mpeg" | "audio/mp3" => "mp3",
        other => other.rsplit('/').next().unwrap_or("wav"),
    }
}

fn openai_body(model: &str, request: &LlmRequest) -> Value {
    let mut messages = Vec::new();
    if !request.system_prompt.is_empty() {
        messages.push(json!({ "role": "system", "content": request.system_prompt }));
    }

    let mut content = Vec::new();
    if let Some(audio) = request.audio_base64.as_deref().filter(|a| !a.is_empty()) {
        content.push(json!({
            "type": "input_audio",
            "input_audio": {
                "data": audio,
                "format": audio_format(request.audio_mime_type.as_deref()),
            }
        }));
    }
    content.push(json!({ "type": "text", "text": request.user_text }));
    messages.push(json!({ "role": "user", "content": content }));

    json!({ "model": model, "messages": messages })
}

fn parse_openai_response(body: &str) -> Result<String, ProviderError> {
    let value: Value = serde_json::from_str(body).map_err(|e| ProviderError::ParseError {
        reason: e.to_string(),
    })?;

    if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
        return Err(ProviderError::ApiError {
            message: message.to_string(),
        });
    }

    let content = value
        .pointer("/choices/0/message/content")
        .ok_or_else(|| ProviderError::ParseError {
            reason: "no choices in response".into(),
        })?;

    // Some compatible servers split the answer into content parts.
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    };

    if text.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeEndpoint;

    fn settings(provider: &str, base_url: &str) -> LlmSettings {
        LlmSettings {
            provider: provider.into(),
            base_url: base_url.into(),
            api_key: "test-key".into(),
            model: "test-model".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_factory_selects_variant() {
        let openai = LlmProvider::from_settings(&settings("OpenAI", "http://x"));
        assert!(matches!(openai, LlmProvider::OpenAiCompatible(_)));
        let gemini = LlmProvider::from_settings(&settings("gemini", "http://x"));
        assert!(matches!(gemini, LlmProvider::Gemini(_)));
        let fallback = LlmProvider::from_settings(&settings("something-else", "http://x"));
        assert_eq!(fallback.name(), "Gemini");
    }

    #[test]
    fn test_unconfigured_provider_fails_without_network() {
        let mut s = settings("gemini", "http://127.0.0.1:9");
        s.api_key.clear();
        let provider = LlmProvider::from_settings(&s);
        assert!(!provider.is_configured());
        let response = provider.call(&LlmRequest::text("sys", "hi"));
        assert!(!response.success);
        assert!(response.error_message.contains("not configured"));
    }

    #[test]
    fn test_gemini_body_shape() {
        let provider = LlmProvider::from_settings(&settings("gemini", "http://x"));
        let body = provider.build_body(
            &LlmRequest::text("be terse", "what is said?").with_audio("QUJD".into(), "audio/wav"),
        );
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["data"], "QUJD");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["mimeType"], "audio/wav");
        assert_eq!(body["contents"][0]["parts"][1]["text"], "what is said?");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
    }

    #[test]
    fn test_gemini_body_without_audio_or_system() {
        let provider = LlmProvider::from_settings(&settings("gemini", "http://x"));
        let body = provider.build_body(&LlmRequest::text("", "hello"));
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 1);
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_openai_body_shape() {
        let provider = LlmProvider::from_settings(&settings("openai", "http://x"));
        let body = provider.build_body(
            &LlmRequest::text("sys", "user").with_audio("QUJD".into(), "audio/wav"),
        );
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        let content = &body["messages"][1]["content"];
        assert_eq!(content[0]["type"], "input_audio");
        assert_eq!(content[0]["input_audio"]["format"], "wav");
        assert_eq!(content[1]["text"], "user");
    }

    #[test]
    fn test_parse_gemini_concatenates_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hello, "},{"text":"world"}]}}]}"#;
        assert_eq!(parse_gemini_response(body).unwrap(), "Hello, world");
    }

    #[test]
    fn test_parse_gemini_error_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        let err = parse_gemini_response(body).unwrap_err();
        assert_eq!(err.to_string(), "API key not valid");
    }

    #[test]
    fn test_parse_gemini_no_candidates() {
        let err = parse_gemini_response(r#"{"candidates":[]}"#).unwrap_err();
        assert!(err.to_string().contains("No candidates"));
    }

    #[test]
    fn test_parse_openai_string_and_parts() {
        let body = r#"{"choices":[{"message":{"content":"plain"}}]}"#;
        assert_eq!(parse_openai_response(body).unwrap(), "plain");
        let body = r#"{"choices":[{"message":{"content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}}]}"#;
        assert_eq!(parse_openai_response(body).unwrap(), "ab");
    }

    #[test]
    fn test_parse_openai_error() {
        let body = r#"{"error":{"message":"quota exceeded","type":"insufficient_quota"}}"#;
        assert_eq!(parse_openai_response(body).unwrap_err().to_string(), "quota exceeded");
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("https://host/v1beta/models/m:generateContent?key=secret"),
            "https://host/v1beta/models/m:generateContent"
        );
    }

    #[test]
    fn test_gemini_call_against_fake_endpoint() {
        let endpoint = FakeEndpoint::serve(
            200,
            r#"{"candidates":[{"content":{"parts":[{"text":"transcribed"}]}}]}"#,
        );
        let provider = LlmProvider::from_settings(&settings("gemini", &endpoint.base_url));
        let response = provider.call(&LlmRequest::text("sys", "hi"));
        assert_eq!(response, LlmResponse::ok("transcribed"));

        let request = endpoint.request();
        assert_eq!(request.method, "POST");
        assert_eq!(request.url, "/models/test-model:generateContent?key=test-key");
        assert_eq!(request.body_json()["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn test_openai_call_sends_bearer_token() {
        let endpoint = FakeEndpoint::serve(200, r#"{"choices":[{"message":{"content":"ok"}}]}"#);
        let provider = LlmProvider::from_settings(&settings("openai", &endpoint.base_url));
        let response = provider.call(&LlmRequest::text("", "hi"));
        assert!(response.success);

        let request = endpoint.request();
        assert_eq!(request.url, "/chat/completions");
        assert_eq!(request.header("Authorization"), Some("Bearer test-key"));
    }

    #[test]
    fn test_http_error_without_json_body() {
        let endpoint = FakeEndpoint::serve(502, "bad gateway");
        let provider = LlmProvider::from_settings(&settings("openai", &endpoint.base_url));
        let response = provider.call(&LlmRequest::text("", "hi"));
        assert!(!response.success);
        assert!(response.error_message.starts_with("HTTP 502"));
    }

    #[test]
    fn test_unreachable_endpoint_is_empty_response() {
        // Port 9 (discard) on loopback is not listening.
        let provider = LlmProvider::from_settings(&settings("openai", "http://127.0.0.1:9"));
        let response = provider.call(&LlmRequest::text("", "hi"));
        assert_eq!(response, LlmResponse::failed("empty response"));
    }
}

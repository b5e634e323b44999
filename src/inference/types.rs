//! Shared request/response types for remote providers.

use serde::{Deserialize, Serialize};

use super::errors::ProviderError;

// ─── LLM ─────────────────────────────────────────────────────────────────────

/// One multimodal LLM call: a system prompt, user text and optional audio.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_text: String,
    /// Base64-encoded audio payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    /// MIME type of the audio payload (e.g. `audio/wav`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_mime_type: Option<String>,
}

impl LlmRequest {
    pub fn text(system_prompt: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_text: user_text.into(),
            ..Default::default()
        }
    }

    /// Attach base64 audio with its MIME type.
    pub fn with_audio(mut self, base64: String, mime_type: impl Into<String>) -> Self {
        self.audio_base64 = Some(base64);
        self.audio_mime_type = Some(mime_type.into());
        self
    }

    pub fn has_audio(&self) -> bool {
        self.audio_base64.as_deref().is_some_and(|a| !a.is_empty())
    }
}

/// Uniform provider result. Failures are values, never panics or errors,
/// so callers on any thread can handle them the same way.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LlmResponse {
    pub text: String,
    pub success: bool,
    pub error_message: String,
}

impl LlmResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
            error_message: String::new(),
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            success: false,
            error_message: error_message.into(),
        }
    }

    /// Convert back into a `Result` for `?`-style callers.
    pub fn into_result(self) -> Result<String, ProviderError> {
        if self.success {
            Ok(self.text)
        } else {
            Err(ProviderError::ApiError {
                message: self.error_message,
            })
        }
    }
}

// ─── STT ─────────────────────────────────────────────────────────────────────

/// A timed piece of a range transcription. Times are seconds relative to the
/// start of the uploaded clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result() {
        assert_eq!(LlmResponse::ok("hi").into_result().unwrap(), "hi");
        let err = LlmResponse::failed("quota exceeded").into_result().unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
    }

    #[test]
    fn test_has_audio() {
        let req = LlmRequest::text("sys", "user");
        assert!(!req.has_audio());
        let req = req.with_audio("UklGRg==".into(), "audio/wav");
        assert!(req.has_audio());
    }
}

//! The `Transcriber` capability used by the cache engine, with its two
//! implementations: a Whisper-style STT endpoint and a multimodal LLM fed
//! the clip as base64 WAV.

use std::path::Path;
use std::sync::Arc;

use base64::Engine;

use crate::config::{normalize_language, LlmSettings, SttBackend, SttSettings};
use crate::inference::{LlmProvider, LlmRequest, ProviderError, SttClient};

/// Instructions for LLM-backed transcription.
const TRANSCRIBE_SYSTEM_PROMPT: &str = "You are a speech transcription engine. \
Transcribe the spoken words in the attached audio exactly as heard. \
Output only the transcript text, with no timestamps, labels or commentary. \
If there is no intelligible speech, output nothing.";

/// Turns a WAV file into text. Blocking; called from background threads.
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;
    fn is_configured(&self) -> bool;
    fn transcribe(&self, wav_path: &Path) -> Result<String, ProviderError>;
}

impl Transcriber for SttClient {
    fn name(&self) -> &str {
        "Whisper"
    }

    fn is_configured(&self) -> bool {
        SttClient::is_configured(self)
    }

    fn transcribe(&self, wav_path: &Path) -> Result<String, ProviderError> {
        self.transcribe_file(wav_path)
    }
}

// ─── LLM-backed ─────────────────────────────────────────────────────────────

/// Transcription through the configured multimodal LLM.
pub struct LlmTranscriber {
    provider: LlmProvider,
    language: Option<String>,
    vocabulary: String,
}

impl LlmTranscriber {
    pub fn new(provider: LlmProvider, stt: &SttSettings) -> Self {
        Self {
            provider,
            language: normalize_language(&stt.language).map(str::to_string),
            vocabulary: stt.prompt.clone(),
        }
    }

    fn user_text(&self) -> String {
        let mut text = String::from("Transcribe this audio.");
        if let Some(language) = &self.language {
            text.push_str(&format!(" The spoken language is {language}."));
        }
        if !self.vocabulary.is_empty() {
            text.push_str(&format!(" Context and vocabulary: {}", self.vocabulary));
        }
        text
    }
}

impl Transcriber for LlmTranscriber {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    fn transcribe(&self, wav_path: &Path) -> Result<String, ProviderError> {
        let bytes = std::fs::read(wav_path)?;
        let audio = base64::engine::general_purpose::STANDARD.encode(bytes);
        let request = LlmRequest::text(TRANSCRIBE_SYSTEM_PROMPT, self.user_text())
            .with_audio(audio, "audio/wav");
        let text = self.provider.call(&request).into_result()?;
        Ok(text.trim().to_string())
    }
}

/// Build the transcriber selected by `stt.backend`.
pub fn build_transcriber(stt: &SttSettings, llm: &LlmSettings) -> Arc<dyn Transcriber> {
    match stt.backend {
        SttBackend::Whisper => Arc::new(SttClient::new(stt.clone())),
        SttBackend::AudioLlm => Arc::new(LlmTranscriber::new(LlmProvider::from_settings(llm), stt)),
    }
}

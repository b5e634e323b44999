//! Owner-thread state: the document, loaded audio and live settings.
//!
//! A `Workspace` lives on the owner thread and is only ever touched through
//! the execution bridge. It must not hold an `OwnerHandle` itself, or the
//! owner queue could never drain.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{LlmSettings, SttBackend, SttSettings};
use crate::document::Document;
use crate::transcription::{build_transcriber, AudioSource, Transcriber, TranscriptCache};

pub struct Workspace {
    pub document: Document,
    pub audio: Option<Arc<dyn AudioSource>>,
    pub audio_path: Option<PathBuf>,
    pub stt_settings: SttSettings,
    pub llm_settings: LlmSettings,
    /// Shared with the tool context so cache reads need no owner round trip.
    pub stt: Arc<TranscriptCache>,
}

impl Workspace {
    pub fn new(document: Document, stt_settings: SttSettings, llm_settings: LlmSettings) -> Self {
        let transcriber = build_transcriber(&stt_settings, &llm_settings);
        Self::with_transcriber(document, stt_settings, llm_settings, transcriber)
    }

    /// Build with an explicit transcriber; the cache is seeded from the
    /// document's side-table.
    pub fn with_transcriber(
        document: Document,
        stt_settings: SttSettings,
        llm_settings: LlmSettings,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        let stt = Arc::new(TranscriptCache::new(&stt_settings, transcriber));
        let restored = stt.load_from_extradata(&document);
        if restored > 0 {
            tracing::info!(restored, "transcripts restored from project");
        }
        Self {
            document,
            audio: None,
            audio_path: None,
            stt_settings,
            llm_settings,
            stt,
        }
    }

    pub fn set_audio(&mut self, source: Arc<dyn AudioSource>, path: Option<PathBuf>) {
        self.audio = Some(source);
        self.audio_path = path;
    }

    /// Replace the STT settings and rebuild the cache's transcriber.
    pub fn apply_stt_settings(&mut self, settings: SttSettings) {
        self.stt_settings = settings;
        self.stt.configure(&self.stt_settings);
        self.stt
            .set_transcriber(build_transcriber(&self.stt_settings, &self.llm_settings));
    }

    /// Replace the LLM settings. The transcriber is rebuilt when STT runs
    /// through the LLM.
    pub fn apply_llm_settings(&mut self, settings: LlmSettings) {
        self.llm_settings = settings;
        if self.stt_settings.backend == SttBackend::AudioLlm {
            self.stt
                .set_transcriber(build_transcriber(&self.stt_settings, &self.llm_settings));
        }
    }
}

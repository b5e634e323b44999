//! Line transcription: audio export, transcriber backends, and the
//! deduplicating transcript cache.

pub mod audio;
pub mod cache;
pub mod transcriber;

pub use audio::{AudioError, AudioSource, PcmBuffer};
pub use cache::{Dispatch, TranscriptCache, FEATURE_KEY};
pub use transcriber::{build_transcriber, LlmTranscriber, Transcriber};

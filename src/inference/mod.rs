//! Remote provider clients.
//!
//! This module handles all communication with remote AI endpoints:
//! - Multimodal LLM calls (Gemini or any OpenAI-compatible chat endpoint)
//! - Speech-to-text uploads (OpenAI-compatible `/audio/transcriptions`)
//!
//! Every call is a single blocking request with a fixed timeout. Callers run
//! them on transport or background threads, never on the owner thread.

pub mod client;
pub mod errors;
pub mod stt;
pub mod types;

// Re-exports for convenience
pub use client::{LlmProvider, PROVIDER_TIMEOUT};
pub use errors::ProviderError;
pub use stt::SttClient;
pub use types::{LlmRequest, LlmResponse, TranscriptSegment};

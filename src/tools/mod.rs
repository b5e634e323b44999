//! Tool catalog exposed over `tools/list` and `tools/call`.
//!
//! Every tool takes an `action` argument selecting one operation. Tools that
//! only touch the document run on the owner thread; tools that talk to remote
//! providers run on the transport thread and reach the workspace through short
//! `run_sync` calls.

pub mod args;
pub mod audio;
pub mod audio_llm;
pub mod errors;
pub mod lines;
pub mod project;
pub mod registry;
pub mod stt;

use std::sync::Arc;

pub use errors::ToolError;
pub use registry::{ToolDefinition, ToolHandler, ToolRegistry};

use crate::bridge::OwnerHandle;
use crate::transcription::TranscriptCache;
use crate::workspace::Workspace;

/// What a caller-thread tool gets to work with.
#[derive(Clone)]
pub struct ToolContext {
    pub owner: OwnerHandle<Workspace>,
    /// The engine's cache, readable without an owner round trip.
    pub stt: Arc<TranscriptCache>,
}

impl ToolContext {
    pub fn new(owner: OwnerHandle<Workspace>, stt: Arc<TranscriptCache>) -> Self {
        Self { owner, stt }
    }

    /// Run `f` on the owner thread, flattening bridge and tool errors.
    pub fn on_owner<T, F>(&self, f: F) -> Result<T, ToolError>
    where
        F: FnOnce(&mut Workspace) -> Result<T, ToolError> + Send + 'static,
        T: Send + 'static,
    {
        self.owner.run_sync(f)?
    }
}

/// Registry holding the full catalog, in listing order.
pub fn register_all_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(project::definition());
    registry.register(lines::definition());
    registry.register(audio::definition());
    registry.register(stt::definition());
    registry.register(audio_llm::definition());
    tracing::debug!(tools = ?registry.names(), "tool catalog registered");
    registry
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_contents_and_affinity() {
        let registry = register_all_tools();
        assert_eq!(registry.names(), vec!["project", "lines", "audio", "stt", "audio_llm"]);
        for owner_tool in ["project", "lines", "audio"] {
            assert!(registry.get(owner_tool).unwrap().requires_owner_thread());
        }
        for caller_tool in ["stt", "audio_llm"] {
            assert!(!registry.get(caller_tool).unwrap().requires_owner_thread());
        }
        for descriptor in registry.list() {
            assert_eq!(descriptor["inputSchema"]["type"], "object");
            assert_eq!(descriptor["inputSchema"]["required"][0], "action");
        }
    }
}

//! Execution bridge error types.

use thiserror::Error;

/// Failures of a cross-thread call into the owner thread.
///
/// These never originate from the job itself: a job's own `Result` travels
/// back to the caller untouched inside `Ok`.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The owner queue has been dropped; no job can run any more.
    #[error("owner thread is no longer accepting work")]
    OwnerGone,

    /// The job panicked on the owner thread. The owner thread survived.
    #[error("owner-thread job panicked: {message}")]
    Panicked { message: String },

    /// A blocking call was issued from the owner thread itself, which would
    /// wait on its own queue forever.
    #[error("blocking owner-thread call issued from the owner thread")]
    Reentrant,
}

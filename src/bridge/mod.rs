//! Thread-affinity execution bridge.
//!
//! One thread owns the editor state `S`. Every other thread reaches it
//! through an [`OwnerHandle`], which offers two primitives:
//!
//! - [`OwnerHandle::run_sync`]: run a closure on the owner thread and block
//!   until it returns. Panics inside the closure come back as
//!   [`BridgeError::Panicked`] instead of unwinding across threads.
//! - [`OwnerHandle::post`]: enqueue a closure and return immediately.
//!
//! The owner thread drives an [`OwnerQueue`]. `OwnerQueue::run` returns only
//! once every handle has been dropped, so background work that still holds a
//! handle keeps the queue alive until its completion has been delivered.

pub mod errors;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

pub use errors::BridgeError;

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Create a connected handle/queue pair for owner state of type `S`.
pub fn owner_channel<S: 'static>() -> (OwnerHandle<S>, OwnerQueue<S>) {
    let (tx, rx) = mpsc::channel();
    let owner = Arc::new(OnceLock::new());
    (
        OwnerHandle {
            tx,
            owner: Arc::clone(&owner),
        },
        OwnerQueue { rx, owner },
    )
}

// ─── OwnerHandle ────────────────────────────────────────────────────────────

/// Cloneable, `Send` entry point into the owner thread.
pub struct OwnerHandle<S> {
    tx: mpsc::Sender<Job<S>>,
    owner: Arc<OnceLock<ThreadId>>,
}

impl<S> Clone for OwnerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            owner: Arc::clone(&self.owner),
        }
    }
}

impl<S: 'static> OwnerHandle<S> {
    /// Run `f` on the owner thread and wait for its result.
    ///
    /// Must not be called from the owner thread itself.
    pub fn run_sync<T, F>(&self, f: F) -> Result<T, BridgeError>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_owner_thread() {
            return Err(BridgeError::Reentrant);
        }

        let (done_tx, done_rx) = mpsc::sync_channel::<Result<T, BridgeError>>(1);
        let job: Job<S> = Box::new(move |state: &mut S| {
            let outcome = catch_unwind(AssertUnwindSafe(|| f(state))).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                tracing::error!(error = %message, "owner-thread job panicked");
                BridgeError::Panicked { message }
            });
            // The caller may have given up; nothing to do then.
            let _ = done_tx.send(outcome);
        });

        self.tx.send(job).map_err(|_| BridgeError::OwnerGone)?;
        // A dropped sender means the queue was torn down with our job unrun.
        done_rx.recv().map_err(|_| BridgeError::OwnerGone)?
    }

    /// Enqueue `f` on the owner thread without waiting.
    pub fn post<F>(&self, f: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let job: Job<S> = Box::new(move |state: &mut S| {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(state))) {
                tracing::error!(
                    error = %panic_message(payload.as_ref()),
                    "posted owner-thread job panicked"
                );
            }
        });
        self.tx.send(job).map_err(|_| BridgeError::OwnerGone)
    }

    /// Whether the current thread is the one draining the queue.
    pub fn is_owner_thread(&self) -> bool {
        self.owner.get() == Some(&thread::current().id())
    }
}

// ─── OwnerQueue ─────────────────────────────────────────────────────────────

/// Receiving side of the bridge, drained by the owner thread.
pub struct OwnerQueue<S> {
    rx: mpsc::Receiver<Job<S>>,
    owner: Arc<OnceLock<ThreadId>>,
}

impl<S: 'static> OwnerQueue<S> {
    /// Run jobs until every [`OwnerHandle`] is gone. Returns the number of
    /// jobs executed.
    pub fn run(self, state: &mut S) -> usize {
        self.claim_current_thread();
        let mut executed = 0;
        while let Ok(job) = self.rx.recv() {
            job(state);
            executed += 1;
        }
        tracing::debug!(executed, "owner queue drained");
        executed
    }

    fn claim_current_thread(&self) {
        let current = thread::current().id();
        if self.owner.set(current).is_err() && self.owner.get() != Some(&current) {
            tracing::warn!("owner queue drained from a different thread than before");
        }
    }
}

// ─── OwnerThread ────────────────────────────────────────────────────────────

/// A dedicated thread that owns `S` and drains its queue.
///
/// The binary runs the queue on the main thread instead; this is the
/// convenient form for embedding and for tests.
pub struct OwnerThread<S> {
    handle: OwnerHandle<S>,
    join: JoinHandle<S>,
}

impl<S: Send + 'static> OwnerThread<S> {
    pub fn spawn(name: &str, mut state: S) -> std::io::Result<Self> {
        let (handle, queue) = owner_channel::<S>();
        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            queue.run(&mut state);
            state
        })?;
        Ok(Self { handle, join })
    }

    pub fn handle(&self) -> OwnerHandle<S> {
        self.handle.clone()
    }

    /// Drop this thread's own handle and wait for the queue to drain.
    ///
    /// Blocks until every other handle (including those held by background
    /// tasks) has been dropped as well.
    pub fn join(self) -> Result<S, BridgeError> {
        let Self { handle, join } = self;
        drop(handle);
        join.join().map_err(|payload| BridgeError::Panicked {
            message: panic_message(payload.as_ref()),
        })
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_run_sync_returns_value() {
        let owner = OwnerThread::spawn("owner-test", 41_u32).unwrap();
        let handle = owner.handle();
        let value = handle
            .run_sync(|n: &mut u32| {
                *n += 1;
                *n
            })
            .unwrap();
        assert_eq!(value, 42);
        drop(handle);
        assert_eq!(owner.join().unwrap(), 42);
    }

    #[test]
    fn test_run_sync_executes_on_owner_thread() {
        let owner = OwnerThread::spawn("owner-test", ()).unwrap();
        let handle = owner.handle();
        let caller = thread::current().id();
        let inner = handle.clone();
        let (on_owner, ran_on) = handle
            .run_sync(move |_| (inner.is_owner_thread(), thread::current().id()))
            .unwrap();
        assert!(on_owner);
        assert_ne!(ran_on, caller);
        assert!(!handle.is_owner_thread());
        drop(handle);
        owner.join().unwrap();
    }

    #[test]
    fn test_run_sync_carries_job_errors_untouched() {
        let owner = OwnerThread::spawn("owner-test", ()).unwrap();
        let result: Result<Result<(), String>, BridgeError> =
            owner.handle().run_sync(|_| Err("business failure".to_string()));
        assert_eq!(result.unwrap().unwrap_err(), "business failure");
        owner.join().unwrap();
    }

    #[test]
    fn test_panic_is_marshalled_and_owner_survives() {
        let owner = OwnerThread::spawn("owner-test", 0_u32).unwrap();
        let handle = owner.handle();
        let err = handle
            .run_sync(|_: &mut u32| -> u32 { panic!("boom") })
            .unwrap_err();
        match err {
            BridgeError::Panicked { message } => assert_eq!(message, "boom"),
            other => panic!("unexpected error: {other}"),
        }
        // Still serving after the panic.
        assert_eq!(handle.run_sync(|n: &mut u32| *n).unwrap(), 0);
        drop(handle);
        owner.join().unwrap();
    }

    #[test]
    fn test_run_sync_from_owner_thread_is_rejected() {
        let owner = OwnerThread::spawn("owner-test", ()).unwrap();
        let handle = owner.handle();
        let inner = handle.clone();
        let nested = handle
            .run_sync(move |_| inner.run_sync(|_| ()).map_err(|e| e.to_string()))
            .unwrap();
        assert!(nested.unwrap_err().contains("from the owner thread"));
        drop(handle);
        owner.join().unwrap();
    }

    #[test]
    fn test_post_does_not_wait() {
        let owner = OwnerThread::spawn("owner-test", Vec::<u32>::new()).unwrap();
        let handle = owner.handle();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        handle
            .post(move |_| {
                let _ = gate_rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();
        // post returned while the owner is still blocked on the gate.
        handle.post(|v: &mut Vec<u32>| v.push(1)).unwrap();
        gate_tx.send(()).unwrap();
        drop(handle);
        assert_eq!(owner.join().unwrap(), vec![1]);
    }

    #[test]
    fn test_posted_panic_is_contained() {
        let owner = OwnerThread::spawn("owner-test", 0_u32).unwrap();
        let handle = owner.handle();
        handle.post(|_| panic!("posted boom")).unwrap();
        assert_eq!(handle.run_sync(|n: &mut u32| *n + 1).unwrap(), 1);
        drop(handle);
        owner.join().unwrap();
    }

    #[test]
    fn test_queue_stays_alive_while_background_handle_exists() {
        let owner = OwnerThread::spawn("owner-test", Vec::<&'static str>::new()).unwrap();
        let background = owner.handle();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            background.post(|v| v.push("late completion")).unwrap();
        });
        // join() only returns after the worker's handle is dropped.
        let state = owner.join().unwrap();
        worker.join().unwrap();
        assert_eq!(state, vec!["late completion"]);
    }

    #[test]
    fn test_owner_gone() {
        let (handle, queue) = owner_channel::<()>();
        drop(queue);
        assert!(matches!(handle.post(|_| ()), Err(BridgeError::OwnerGone)));
        assert!(matches!(handle.run_sync(|_| ()), Err(BridgeError::OwnerGone)));
    }
}

//! Transcript cache with at-most-one remote call per line.
//!
//! State is a `cache` (line → text) and an `in_flight` map (line → task),
//! both behind one mutex that is never held across another lock or a
//! callback. Work is started from the owner thread, runs on a background
//! thread, and its completion is posted back to the owner thread, where the
//! result is cached, written to the line's `stt` side-table entry and
//! committed.
//!
//! Callback contract: every callback passed in is invoked exactly once.
//! - cached line: synchronously, with the cached text
//! - rejected request (no audio, not configured, bad range): synchronously,
//!   with `""`
//! - started or joined: later, on the owner thread, with the task's result
//!   (`""` on failure)
//!
//! Callers arriving while a line is in flight join that task's waiter list
//! and receive the same result. `clear` forgets in-flight tasks: a stale task
//! still answers its waiters but no longer touches the cache or side-table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;

use super::audio::{write_wav_clip, AudioSource};
use super::transcriber::Transcriber;
use crate::bridge::OwnerHandle;
use crate::config::SttSettings;
use crate::document::{CommitKind, Document, LineId};
use crate::inference::ProviderError;
use crate::workspace::Workspace;

/// Side-table key holding a line's transcript.
pub const FEATURE_KEY: &str = "stt";

/// Completion callback. Receives the transcript, or `""` on failure.
pub type TranscriptCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// What a transcription request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Text was already cached; the callback has run.
    Cached,
    /// A task for this line was already running; the callback was queued on it.
    Joined,
    /// A new background task was started.
    Started,
    /// Nothing was scheduled; the callback has run with `""`.
    Rejected(String),
}

#[derive(Default)]
struct CacheState {
    cache: HashMap<LineId, String>,
    in_flight: HashMap<LineId, u64>,
    waiters: HashMap<u64, Vec<TranscriptCallback>>,
    next_task: u64,
}

// ─── TranscriptCache ────────────────────────────────────────────────────────

pub struct TranscriptCache {
    state: Mutex<CacheState>,
    transcriber: RwLock<Arc<dyn Transcriber>>,
    enabled: AtomicBool,
    lookahead: AtomicUsize,
    max_duration_ms: AtomicI64,
}

impl TranscriptCache {
    pub fn new(settings: &SttSettings, transcriber: Arc<dyn Transcriber>) -> Self {
        let cache = Self {
            state: Mutex::new(CacheState::default()),
            transcriber: RwLock::new(transcriber),
            enabled: AtomicBool::new(true),
            lookahead: AtomicUsize::new(0),
            max_duration_ms: AtomicI64::new(0),
        };
        cache.configure(settings);
        cache
    }

    /// Apply new settings. Running tasks keep the transcriber they started with.
    pub fn configure(&self, settings: &SttSettings) {
        self.enabled.store(settings.enabled, Ordering::Relaxed);
        self.lookahead
            .store(settings.lookahead_lines, Ordering::Relaxed);
        self.max_duration_ms
            .store(settings.max_duration_ms, Ordering::Relaxed);
    }

    pub fn set_transcriber(&self, transcriber: Arc<dyn Transcriber>) {
        match self.transcriber.write() {
            Ok(mut guard) => *guard = transcriber,
            Err(poisoned) => *poisoned.into_inner() = transcriber,
        }
    }

    pub fn transcriber(&self) -> Arc<dyn Transcriber> {
        match self.transcriber.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn lookahead(&self) -> usize {
        self.lookahead.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Callbacks never run under this lock, so a poisoned state is still
        // consistent.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub fn has_text(&self, id: LineId) -> bool {
        self.lock().cache.contains_key(&id)
    }

    pub fn cached_text(&self, id: LineId) -> Option<String> {
        self.lock().cache.get(&id).cloned()
    }

    pub fn is_in_flight(&self, id: LineId) -> bool {
        self.lock().in_flight.contains_key(&id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn len(&self) -> usize {
        self.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached entries ordered by line id.
    pub fn entries(&self) -> Vec<(LineId, String)> {
        let mut entries: Vec<_> = self
            .lock()
            .cache
            .iter()
            .map(|(id, text)| (*id, text.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    pub fn in_flight_ids(&self) -> Vec<LineId> {
        let mut ids: Vec<_> = self.lock().in_flight.keys().copied().collect();
        ids.sort();
        ids
    }

    // ─── Invalidation ───────────────────────────────────────────────────

    /// Forget the cached text for one line. In-flight work is untouched.
    pub fn invalidate(&self, id: LineId) -> bool {
        self.lock().cache.remove(&id).is_some()
    }

    /// Forget a line entirely: its cached text and any running task, whose
    /// result will then answer its waiters without being cached. Returns
    /// whether text was cached.
    pub fn forget(&self, id: LineId) -> bool {
        let mut state = self.lock();
        if let Some(task) = state.in_flight.remove(&id) {
            tracing::debug!(line = %id, task, "in-flight transcription detached");
        }
        state.cache.remove(&id).is_some()
    }

    /// Forget all cached text and all in-flight bookkeeping. Running tasks
    /// are not cancelled; their results are delivered but not cached.
    pub fn clear(&self) {
        let mut state = self.lock();
        tracing::debug!(
            cached = state.cache.len(),
            in_flight = state.in_flight.len(),
            "transcript cache cleared"
        );
        state.cache.clear();
        state.in_flight.clear();
    }

    /// Rebuild the cache from the document's `stt` side-table.
    pub fn load_from_extradata(&self, doc: &Document) -> usize {
        let entries = doc.extradata_entries(FEATURE_KEY);
        let mut state = self.lock();
        state.cache.clear();
        state.cache.extend(entries);
        state.cache.len()
    }

    /// Write a transcript into the line's side-table and commit.
    fn store_in_extradata(doc: &mut Document, id: LineId, text: &str) {
        if let Err(e) = doc.set_extradata(id, FEATURE_KEY, text) {
            tracing::debug!(line = %id, error = %e, "transcript not persisted");
            return;
        }
        if let Err(e) = doc.commit("stt transcription", CommitKind::Extradata) {
            tracing::warn!(line = %id, error = %e, "failed to save transcript");
        }
    }

    // ─── Dispatch ───────────────────────────────────────────────────────

    /// Transcribe a line's own time range. Must run on the owner thread.
    pub fn transcribe_async<F>(
        self: &Arc<Self>,
        ws: &Workspace,
        owner: &OwnerHandle<Workspace>,
        id: LineId,
        on_complete: F,
    ) -> Dispatch
    where
        F: FnOnce(String) + Send + 'static,
    {
        let Some((start_ms, end_ms)) = ws.document.line(id).map(|l| (l.start_ms, l.end_ms)) else {
            on_complete(String::new());
            return Dispatch::Rejected(format!("line {id} not found"));
        };
        self.transcribe_range_async(ws, owner, id, start_ms, end_ms, on_complete)
    }

    /// Transcribe `[start_ms, end_ms)` of the loaded audio and cache the
    /// result under `id`. Must run on the owner thread.
    pub fn transcribe_range_async<F>(
        self: &Arc<Self>,
        ws: &Workspace,
        owner: &OwnerHandle<Workspace>,
        id: LineId,
        start_ms: i64,
        end_ms: i64,
        on_complete: F,
    ) -> Dispatch
    where
        F: FnOnce(String) + Send + 'static,
    {
        let transcriber = self.transcriber();
        let mut state = self.lock();

        if let Some(text) = state.cache.get(&id).cloned() {
            drop(state);
            tracing::debug!(line = %id, "transcript served from cache");
            on_complete(text);
            return Dispatch::Cached;
        }

        if let Some(&task) = state.in_flight.get(&id) {
            state
                .waiters
                .entry(task)
                .or_default()
                .push(Box::new(on_complete));
            tracing::debug!(line = %id, task, "joined in-flight transcription");
            return Dispatch::Joined;
        }

        let audio = match self.check_request(ws, transcriber.as_ref(), start_ms, end_ms) {
            Ok(audio) => audio,
            Err(reason) => {
                drop(state);
                tracing::debug!(line = %id, reason = %reason, "transcription rejected");
                on_complete(String::new());
                return Dispatch::Rejected(reason);
            }
        };

        let task = state.next_task;
        state.next_task += 1;
        state.in_flight.insert(id, task);
        state.waiters.insert(task, vec![Box::new(on_complete)]);
        drop(state);

        let cache = Arc::clone(self);
        let owner = owner.clone();
        let spawned = thread::Builder::new()
            .name(format!("stt-task-{task}"))
            .spawn(move || {
                let text = match run_transcription(audio.as_ref(), transcriber.as_ref(), start_ms, end_ms) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(line = %id, task, error = %e, "transcription failed");
                        String::new()
                    }
                };
                let finisher = Arc::clone(&cache);
                if owner
                    .post(move |ws: &mut Workspace| finisher.finish(ws, task, id, text))
                    .is_err()
                {
                    tracing::warn!(line = %id, task, "owner thread gone, transcript dropped");
                    cache.abandon(task, id);
                }
            });

        match spawned {
            Ok(_) => {
                tracing::info!(line = %id, task, start_ms, end_ms, "transcription started");
                Dispatch::Started
            }
            Err(e) => {
                tracing::error!(line = %id, error = %e, "failed to spawn transcription thread");
                self.abandon(task, id);
                Dispatch::Rejected(format!("failed to start background task: {e}"))
            }
        }
    }

    /// Transcribe `id` for the caller, then warm the cache for the next
    /// `lookahead` lines in document order.
    pub fn transcribe_with_lookahead<F>(
        self: &Arc<Self>,
        ws: &Workspace,
        owner: &OwnerHandle<Workspace>,
        id: LineId,
        on_complete: F,
    ) -> Dispatch
    where
        F: FnOnce(String) + Send + 'static,
    {
        let primary = self.transcribe_async(ws, owner, id, on_complete);
        for next in ws.document.ids_after(id, self.lookahead()) {
            self.transcribe_async(ws, owner, next, |_| {});
        }
        primary
    }

    /// Why a new task cannot be started, if it cannot.
    fn check_request(
        &self,
        ws: &Workspace,
        transcriber: &dyn Transcriber,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Arc<dyn AudioSource>, String> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Err("speech-to-text is disabled".into());
        }
        if !transcriber.is_configured() {
            return Err(format!("{} is not configured", transcriber.name()));
        }
        let audio = ws.audio.clone().ok_or("no audio loaded")?;
        let duration = end_ms - start_ms;
        if duration <= 0 {
            return Err("line has no duration".into());
        }
        let max = self.max_duration_ms.load(Ordering::Relaxed);
        if max > 0 && duration > max {
            return Err(format!("line is {duration}ms long, limit is {max}ms"));
        }
        Ok(audio)
    }

    // ─── Completion ─────────────────────────────────────────────────────

    /// Owner-thread completion of `task`.
    fn finish(&self, ws: &mut Workspace, task: u64, id: LineId, text: String) {
        let (current, waiters) = {
            let mut state = self.lock();
            let current = state.in_flight.get(&id) == Some(&task);
            if current {
                state.in_flight.remove(&id);
                if !text.is_empty() {
                    state.cache.insert(id, text.clone());
                }
            }
            (current, state.waiters.remove(&task).unwrap_or_default())
        };

        if current && !text.is_empty() {
            Self::store_in_extradata(&mut ws.document, id, &text);
        } else if !current {
            tracing::debug!(line = %id, task, "stale transcription not cached");
        }

        for waiter in waiters {
            waiter(text.clone());
        }
    }

    /// Drop a task that can no longer complete on the owner thread.
    fn abandon(&self, task: u64, id: LineId) {
        let waiters = {
            let mut state = self.lock();
            if state.in_flight.get(&id) == Some(&task) {
                state.in_flight.remove(&id);
            }
            state.waiters.remove(&task).unwrap_or_default()
        };
        for waiter in waiters {
            waiter(String::new());
        }
    }
}

/// Export the range to a scoped temporary WAV and transcribe it. The file is
/// removed when this returns, whatever the outcome.
fn run_transcription(
    audio: &dyn AudioSource,
    transcriber: &dyn Transcriber,
    start_ms: i64,
    end_ms: i64,
) -> Result<String, ProviderError> {
    let clip = tempfile::Builder::new()
        .prefix("subbridge-stt-")
        .suffix(".wav")
        .tempfile()?;
    write_wav_clip(audio, start_ms, end_ms, clip.path())?;
    Ok(transcriber.transcribe(clip.path())?.trim().to_string())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

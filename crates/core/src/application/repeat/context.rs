// Repeat context and iteration status

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Outcome of one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// More work may be available
    Continuable,
    /// The callback has no more work (e.g. end of input)
    Finished,
}

impl RepeatStatus {
    pub fn is_continuable(&self) -> bool {
        matches!(self, RepeatStatus::Continuable)
    }

    /// Continuable only if both are
    pub fn and(self, other: RepeatStatus) -> RepeatStatus {
        if self.is_continuable() && other.is_continuable() {
            RepeatStatus::Continuable
        } else {
            RepeatStatus::Finished
        }
    }
}

/// State of one `iterate` invocation.
///
/// Cheap to clone; clones share the same flags and counters so a callback
/// running on a worker task can mark the loop complete.
#[derive(Clone)]
pub struct RepeatContext {
    inner: Arc<ContextState>,
}

struct ContextState {
    started: Instant,
    iterations: AtomicUsize,
    complete_only: AtomicBool,
    terminate_only: AtomicBool,
    counters: Mutex<HashMap<&'static str, usize>>,
}

impl RepeatContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextState {
                started: Instant::now(),
                iterations: AtomicUsize::new(0),
                complete_only: AtomicBool::new(false),
                terminate_only: AtomicBool::new(false),
                counters: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Iterations started so far
    pub fn iteration_count(&self) -> usize {
        self.inner.iterations.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_count(&self) {
        self.inner.iterations.fetch_add(1, Ordering::SeqCst);
    }

    /// Ask the loop to finish after the current iteration
    pub fn set_complete_only(&self) {
        self.inner.complete_only.store(true, Ordering::SeqCst);
    }

    pub fn is_complete_only(&self) -> bool {
        self.inner.complete_only.load(Ordering::SeqCst)
    }

    /// Finish and signal abnormal termination to enclosing loops
    pub fn set_terminate_only(&self) {
        self.inner.terminate_only.store(true, Ordering::SeqCst);
        self.set_complete_only();
    }

    pub fn is_terminate_only(&self) -> bool {
        self.inner.terminate_only.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Increment a named counter scoped to this invocation, returning the new value
    pub fn increment_counter(&self, name: &'static str) -> usize {
        let mut counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let value = counters.entry(name).or_insert(0);
        *value += 1;
        *value
    }
}

impl Default for RepeatContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RepeatContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatContext")
            .field("iterations", &self.iteration_count())
            .field("complete_only", &self.is_complete_only())
            .field("terminate_only", &self.is_terminate_only())
            .finish()
    }
}

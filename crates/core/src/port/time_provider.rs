// Time Provider Port (for deterministic timestamps in tests)

use std::sync::atomic::{AtomicI64, Ordering};

/// Time provider interface (allows mocking in tests)
pub trait TimeProvider: Send + Sync {
    /// Get current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that starts at a fixed instant and advances by `step_ms` per read.
///
/// Gives strictly increasing, reproducible timestamps, which keeps
/// "most recent execution" ordering stable in tests.
pub struct SteppingTimeProvider {
    next: AtomicI64,
    step_ms: i64,
}

impl SteppingTimeProvider {
    pub fn new(start_millis: i64, step_ms: i64) -> Self {
        Self {
            next: AtomicI64::new(start_millis),
            step_ms,
        }
    }
}

impl TimeProvider for SteppingTimeProvider {
    fn now_millis(&self) -> i64 {
        self.next.fetch_add(self.step_ms, Ordering::SeqCst)
    }
}

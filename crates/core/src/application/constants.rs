// Engine defaults (no magic values in the engines themselves)
use std::time::Duration;

/// Items per chunk when no commit interval is configured
pub const DEFAULT_COMMIT_INTERVAL: usize = 10;

/// Capacity of the write-skip cache (item key -> failure cause)
pub const DEFAULT_SKIP_CACHE_CAPACITY: usize = 1024;

/// Skip limit used by `LimitCheckingSkipPolicy::default`
pub const DEFAULT_SKIP_LIMIT: i64 = 10;

/// Maximum outstanding results in concurrent repeat mode
pub const DEFAULT_THROTTLE_LIMIT: usize = 4;

/// Attempts allowed by `MaxAttemptsRetryPolicy::default` (first call included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential back-off
pub const DEFAULT_BACKOFF_BASE_DELAY: Duration = Duration::from_millis(100);

/// Multiplier for exponential back-off
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Upper bound for any single back-off sleep
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(30);

/// Exit descriptions longer than this are truncated on write
pub const MAX_EXIT_DESCRIPTION_LENGTH: usize = 2500;

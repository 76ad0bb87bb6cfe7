// Write-skip memory: items whose write failed and must be skipped on re-read

use crate::domain::StepContribution;
use crate::error::{BatchError, ItemError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

/// Bounded map of item key -> write failure.
///
/// Shared by every chunk of a step. Exceeding the capacity means the key
/// function does not tell items apart and is reported as a configuration
/// error.
pub struct WriteSkipCache {
    capacity: usize,
    entries: Mutex<HashMap<String, ItemError>>,
}

impl WriteSkipCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Run `f` with the cached failure for `key`; false when absent
    pub fn with_cause<F: FnOnce(&ItemError)>(&self, key: &str, f: F) -> bool {
        match self.lock().get(key) {
            Some(cause) => {
                f(cause);
                true
            }
            None => false,
        }
    }

    /// Remember a failure
    pub fn insert(&self, key: String, cause: ItemError) -> Result<()> {
        let mut entries = self.lock();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            warn!(
                capacity = self.capacity,
                "Write skip cache is full; the item key function does not discriminate items"
            );
            return Err(BatchError::SkipCacheCapacityExceeded {
                capacity: self.capacity,
            });
        }
        entries.insert(key, cause);
        Ok(())
    }

    pub fn remove_all<'k>(&self, keys: impl IntoIterator<Item = &'k String>) {
        let mut entries = self.lock();
        for key in keys {
            entries.remove(key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ItemError>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Per-transaction-attempt state of one chunk.
///
/// Everything here is applied when the chunk commits and dropped when it
/// rolls back: the counter deltas and the skip-cache keys to forget.
#[derive(Debug, Default)]
pub struct ChunkAttempt {
    pub contribution: StepContribution,
    pending_removals: Vec<String>,
    exhausted: bool,
}

impl ChunkAttempt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget `key` once this attempt commits
    pub fn remove_on_commit(&mut self, key: String) {
        self.pending_removals.push(key);
    }

    /// The reader reported end of input during this attempt
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Apply the deferred cache removals after a successful commit
    pub fn commit_into(&self, cache: &WriteSkipCache) {
        cache.remove_all(self.pending_removals.iter());
    }
}

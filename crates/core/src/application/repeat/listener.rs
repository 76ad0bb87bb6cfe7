// Repeat lifecycle observers

use super::context::{RepeatContext, RepeatStatus};
use crate::error::BatchError;

/// Hooks around a repeat loop. A hook may end the loop early with
/// `context.set_complete_only()`; it cannot otherwise change control flow.
pub trait RepeatListener: Send + Sync {
    fn open(&self, _context: &RepeatContext) {}

    fn before(&self, _context: &RepeatContext) {}

    fn after(&self, _context: &RepeatContext, _result: RepeatStatus) {}

    fn on_error(&self, _context: &RepeatContext, _error: &BatchError) {}

    /// Always called once per `open`, even when the loop fails
    fn close(&self, _context: &RepeatContext) {}
}

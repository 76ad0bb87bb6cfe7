// Exception handlers: decide whether an iteration failure ends the loop

use super::context::RepeatContext;
use crate::error::{BatchError, Result};
use tracing::{debug, warn};

/// Receives every iteration failure. Returning `Err` rethrows (the error is
/// accumulated and ends the loop), `Ok(())` absorbs it and the loop goes on.
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, context: &RepeatContext, error: BatchError) -> Result<()>;
}

/// Default: every failure is fatal
#[derive(Debug, Default, Clone, Copy)]
pub struct RethrowExceptionHandler;

impl ExceptionHandler for RethrowExceptionHandler {
    fn handle(&self, _context: &RepeatContext, error: BatchError) -> Result<()> {
        Err(error)
    }
}

type ErrorPredicate = Box<dyn Fn(&BatchError) -> bool + Send + Sync>;

/// Absorbs failures matching a predicate, rethrows the rest
pub struct AbsorbingExceptionHandler {
    predicate: ErrorPredicate,
}

impl AbsorbingExceptionHandler {
    pub fn new(predicate: impl Fn(&BatchError) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
        }
    }
}

impl ExceptionHandler for AbsorbingExceptionHandler {
    fn handle(&self, _context: &RepeatContext, error: BatchError) -> Result<()> {
        if (self.predicate)(&error) {
            debug!(error = %error, "Absorbed iteration failure");
            Ok(())
        } else {
            Err(error)
        }
    }
}

/// Tolerates up to `limit` matching failures per loop invocation
pub struct LimitExceptionHandler {
    limit: usize,
    predicate: ErrorPredicate,
}

impl LimitExceptionHandler {
    const COUNTER: &'static str = "limit_exception_handler";

    /// Count every failure
    pub fn new(limit: usize) -> Self {
        Self::matching(limit, |_| true)
    }

    /// Count only failures matching `predicate`; others are rethrown at once
    pub fn matching(
        limit: usize,
        predicate: impl Fn(&BatchError) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            limit,
            predicate: Box::new(predicate),
        }
    }
}

impl ExceptionHandler for LimitExceptionHandler {
    fn handle(&self, context: &RepeatContext, error: BatchError) -> Result<()> {
        if !(self.predicate)(&error) {
            return Err(error);
        }
        let seen = context.increment_counter(Self::COUNTER);
        if seen > self.limit {
            warn!(limit = self.limit, seen = seen, "Exception limit exceeded");
            return Err(error);
        }
        debug!(seen = seen, limit = self.limit, error = %error, "Tolerated iteration failure");
        Ok(())
    }
}

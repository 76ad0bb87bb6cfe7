// Skip policies: may a failing item be dropped?

use super::matcher::{matches_any, ErrorMatcher};
use crate::application::constants::DEFAULT_SKIP_LIMIT;
use crate::error::ItemError;
use std::sync::Arc;

/// Verdict for one item failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipVerdict {
    /// Not skippable; the failure propagates and fails the chunk
    Proceed,
    /// Drop the item and continue
    Skip,
    /// Skippable, but the skip budget is spent
    Abort { limit: i64 },
}

/// Pure decision over (error, skips so far in this step)
pub trait SkipPolicy: Send + Sync {
    fn should_skip(&self, error: &ItemError, skip_count: i64) -> SkipVerdict;
}

/// Skip everything, without limit
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSkipPolicy;

impl SkipPolicy for AlwaysSkipPolicy {
    fn should_skip(&self, _error: &ItemError, _skip_count: i64) -> SkipVerdict {
        SkipVerdict::Skip
    }
}

/// Never skip
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSkipPolicy;

impl SkipPolicy for NeverSkipPolicy {
    fn should_skip(&self, _error: &ItemError, _skip_count: i64) -> SkipVerdict {
        SkipVerdict::Proceed
    }
}

/// Skips matching errors until `limit` skips have been recorded.
///
/// Fatal matchers are consulted first: an error matching both lists is fatal.
#[derive(Debug, Clone)]
pub struct LimitCheckingSkipPolicy {
    limit: i64,
    skippable: Vec<ErrorMatcher>,
    fatal: Vec<ErrorMatcher>,
}

impl LimitCheckingSkipPolicy {
    pub fn new(limit: i64) -> Self {
        Self {
            limit,
            skippable: Vec::new(),
            fatal: Vec::new(),
        }
    }

    pub fn skip(mut self, matcher: ErrorMatcher) -> Self {
        self.skippable.push(matcher);
        self
    }

    pub fn no_skip(mut self, matcher: ErrorMatcher) -> Self {
        self.fatal.push(matcher);
        self
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }
}

impl Default for LimitCheckingSkipPolicy {
    /// Skips any error, up to the default limit
    fn default() -> Self {
        Self::new(DEFAULT_SKIP_LIMIT).skip(ErrorMatcher::any())
    }
}

impl SkipPolicy for LimitCheckingSkipPolicy {
    fn should_skip(&self, error: &ItemError, skip_count: i64) -> SkipVerdict {
        let error: &(dyn std::error::Error + 'static) = &**error;
        if matches_any(&self.fatal, error) || !matches_any(&self.skippable, error) {
            return SkipVerdict::Proceed;
        }
        if skip_count < self.limit {
            SkipVerdict::Skip
        } else {
            SkipVerdict::Abort { limit: self.limit }
        }
    }
}

/// First member with an opinion other than `Proceed` decides
#[derive(Clone, Default)]
pub struct CompositeSkipPolicy {
    policies: Vec<Arc<dyn SkipPolicy>>,
}

impl CompositeSkipPolicy {
    pub fn new(policies: Vec<Arc<dyn SkipPolicy>>) -> Self {
        Self { policies }
    }
}

impl SkipPolicy for CompositeSkipPolicy {
    fn should_skip(&self, error: &ItemError, skip_count: i64) -> SkipVerdict {
        self.policies
            .iter()
            .map(|p| p.should_skip(error, skip_count))
            .find(|v| *v != SkipVerdict::Proceed)
            .unwrap_or(SkipVerdict::Proceed)
    }
}

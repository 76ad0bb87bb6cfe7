// Completion policies: when does a repeat loop stop?

use super::context::{RepeatContext, RepeatStatus};
use std::sync::Arc;
use std::time::Duration;

pub trait CompletionPolicy: Send + Sync {
    /// Complete regardless of the latest result
    fn is_complete(&self, context: &RepeatContext) -> bool;

    /// Complete given the latest result. A finished result always completes.
    fn is_complete_with(&self, context: &RepeatContext, result: RepeatStatus) -> bool {
        !result.is_continuable() || self.is_complete(context)
    }
}

/// Repeat until the callback reports `Finished`
#[derive(Debug, Default, Clone, Copy)]
pub struct UntilExhaustedPolicy;

impl CompletionPolicy for UntilExhaustedPolicy {
    fn is_complete(&self, _context: &RepeatContext) -> bool {
        false
    }
}

/// Stop after a fixed number of iterations (the chunk size / commit interval)
#[derive(Debug, Clone, Copy)]
pub struct ChunkSizeCompletionPolicy {
    chunk_size: usize,
}

impl ChunkSizeCompletionPolicy {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl CompletionPolicy for ChunkSizeCompletionPolicy {
    fn is_complete(&self, context: &RepeatContext) -> bool {
        context.iteration_count() >= self.chunk_size
    }
}

/// Stop once the loop has run for longer than `timeout`
#[derive(Debug, Clone, Copy)]
pub struct TimeoutCompletionPolicy {
    timeout: Duration,
}

impl TimeoutCompletionPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CompletionPolicy for TimeoutCompletionPolicy {
    fn is_complete(&self, context: &RepeatContext) -> bool {
        context.elapsed() >= self.timeout
    }
}

/// Complete as soon as any member policy is complete
#[derive(Clone, Default)]
pub struct CompositeCompletionPolicy {
    policies: Vec<Arc<dyn CompletionPolicy>>,
}

impl CompositeCompletionPolicy {
    pub fn new(policies: Vec<Arc<dyn CompletionPolicy>>) -> Self {
        Self { policies }
    }
}

impl CompletionPolicy for CompositeCompletionPolicy {
    fn is_complete(&self, context: &RepeatContext) -> bool {
        self.policies.iter().any(|p| p.is_complete(context))
    }

    fn is_complete_with(&self, context: &RepeatContext, result: RepeatStatus) -> bool {
        self.policies
            .iter()
            .any(|p| p.is_complete_with(context, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_policy() {
        let policy = ChunkSizeCompletionPolicy::new(2);
        let ctx = RepeatContext::new();
        assert!(!policy.is_complete(&ctx));
        ctx.increment_count();
        assert!(!policy.is_complete_with(&ctx, RepeatStatus::Continuable));
        assert!(policy.is_complete_with(&ctx, RepeatStatus::Finished));
        ctx.increment_count();
        assert!(policy.is_complete(&ctx));
    }

    #[test]
    fn test_zero_chunk_size_means_one() {
        assert_eq!(ChunkSizeCompletionPolicy::new(0).chunk_size(), 1);
    }

    #[test]
    fn test_until_exhausted_only_stops_on_finished() {
        let policy = UntilExhaustedPolicy;
        let ctx = RepeatContext::new();
        for _ in 0..1000 {
            ctx.increment_count();
        }
        assert!(!policy.is_complete_with(&ctx, RepeatStatus::Continuable));
        assert!(policy.is_complete_with(&ctx, RepeatStatus::Finished));
    }

    #[test]
    fn test_composite_any_member_completes() {
        let policy = CompositeCompletionPolicy::new(vec![
            Arc::new(UntilExhaustedPolicy),
            Arc::new(ChunkSizeCompletionPolicy::new(1)),
        ]);
        let ctx = RepeatContext::new();
        assert!(!policy.is_complete(&ctx));
        ctx.increment_count();
        assert!(policy.is_complete(&ctx));
    }

    #[test]
    fn test_timeout_policy() {
        let ctx = RepeatContext::new();
        assert!(TimeoutCompletionPolicy::new(Duration::ZERO).is_complete(&ctx));
        assert!(!TimeoutCompletionPolicy::new(Duration::from_secs(3600)).is_complete(&ctx));
    }
}

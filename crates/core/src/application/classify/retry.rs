// Retry policies, back-off and the retry template

use super::matcher::{matches_any, ErrorClassifier, ErrorMatcher};
use crate::application::constants::{
    DEFAULT_BACKOFF_BASE_DELAY, DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_ATTEMPTS, MAX_BACKOFF_DELAY,
};
use crate::error::ItemError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// State of one retry sequence (one item, one operation)
#[derive(Debug, Default)]
pub struct RetryContext {
    attempts: u32,
    last_error: Option<ItemError>,
    exhausted: bool,
}

impl RetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures registered so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&ItemError> {
        self.last_error.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn last_error_dyn(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}

/// Retry decision state machine:
/// `open -> { can_retry? invoke -> success: close | failure: register_failure -> can_retry? ... }`
pub trait RetryPolicy: Send + Sync {
    fn can_retry(&self, context: &RetryContext) -> bool;

    fn register_failure(&self, context: &mut RetryContext, error: ItemError) {
        context.attempts += 1;
        context.last_error = Some(error);
    }

    fn close(&self, _context: &mut RetryContext) {}
}

/// First failure is final
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverRetryPolicy;

impl RetryPolicy for NeverRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        context.attempts == 0
    }
}

/// Up to `max_attempts` invocations in total
#[derive(Debug, Clone, Copy)]
pub struct MaxAttemptsRetryPolicy {
    max_attempts: u32,
}

impl MaxAttemptsRetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for MaxAttemptsRetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy for MaxAttemptsRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        context.attempts < self.max_attempts
    }
}

/// Retries only errors matching `retryable` and not matching `fatal`.
/// Places no bound on attempts; combine with [`MaxAttemptsRetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct ExceptionFilterRetryPolicy {
    retryable: Vec<ErrorMatcher>,
    fatal: Vec<ErrorMatcher>,
}

impl ExceptionFilterRetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry_on(mut self, matcher: ErrorMatcher) -> Self {
        self.retryable.push(matcher);
        self
    }

    pub fn never_retry_on(mut self, matcher: ErrorMatcher) -> Self {
        self.fatal.push(matcher);
        self
    }
}

impl RetryPolicy for ExceptionFilterRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        match context.last_error_dyn() {
            None => true,
            Some(error) => {
                !matches_any(&self.fatal, error) && matches_any(&self.retryable, error)
            }
        }
    }
}

/// Retry only while every member allows it
#[derive(Clone, Default)]
pub struct CompositeRetryPolicy {
    policies: Vec<Arc<dyn RetryPolicy>>,
}

impl CompositeRetryPolicy {
    pub fn new(policies: Vec<Arc<dyn RetryPolicy>>) -> Self {
        Self { policies }
    }
}

impl RetryPolicy for CompositeRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        self.policies.iter().all(|p| p.can_retry(context))
    }

    fn close(&self, context: &mut RetryContext) {
        for policy in &self.policies {
            policy.close(context);
        }
    }
}

/// Delegates to a sub-policy chosen by the type of the latest failure
pub struct ClassifyingRetryPolicy {
    classifier: ErrorClassifier<Arc<dyn RetryPolicy>>,
}

impl ClassifyingRetryPolicy {
    pub fn new(fallback: Arc<dyn RetryPolicy>) -> Self {
        Self {
            classifier: ErrorClassifier::new(fallback),
        }
    }

    pub fn route(mut self, matcher: ErrorMatcher, policy: Arc<dyn RetryPolicy>) -> Self {
        self.classifier = self.classifier.route(matcher, policy);
        self
    }
}

impl RetryPolicy for ClassifyingRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        match context.last_error_dyn() {
            None => true,
            Some(error) => self.classifier.classify(error).can_retry(context),
        }
    }
}

/// Delay between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackOffPolicy {
    None,
    Fixed(Duration),
    /// delay = base * factor^(attempt-1) * (1.0 +/- 0.1), capped at `max`
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
    },
}

impl BackOffPolicy {
    pub fn exponential() -> Self {
        BackOffPolicy::Exponential {
            base: DEFAULT_BACKOFF_BASE_DELAY,
            factor: DEFAULT_BACKOFF_FACTOR,
            max: MAX_BACKOFF_DELAY,
        }
    }

    /// Delay after the `attempt`-th failure (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackOffPolicy::None => Duration::ZERO,
            BackOffPolicy::Fixed(delay) => delay,
            BackOffPolicy::Exponential { base, factor, max } => {
                let exponent = attempt.saturating_sub(1).min(63) as i32;
                let raw_ms = base.as_millis() as f64 * factor.powi(exponent);

                // +/-10% jitter keeps concurrent retries apart; deterministic per attempt
                let jitter_seed = attempt.wrapping_mul(2_654_435_761);
                let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0);

                let delay_ms = (raw_ms * jitter_factor).min(max.as_millis() as f64);
                Duration::from_millis(delay_ms.max(0.0) as u64)
            }
        }
    }
}

/// Outcome of registering a failure
#[derive(Debug)]
pub enum RetryDecision {
    /// Invoke again (the back-off delay has already elapsed)
    Retry,
    /// Give up; carries the final failure
    Exhausted(ItemError),
}

/// Drives a retry policy with back-off around an operation
#[derive(Clone)]
pub struct RetryTemplate {
    policy: Arc<dyn RetryPolicy>,
    back_off: BackOffPolicy,
}

impl RetryTemplate {
    pub fn new(policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            policy,
            back_off: BackOffPolicy::None,
        }
    }

    /// No retries: the first failure is returned as is
    pub fn never() -> Self {
        Self::new(Arc::new(NeverRetryPolicy))
    }

    pub fn with_back_off(mut self, back_off: BackOffPolicy) -> Self {
        self.back_off = back_off;
        self
    }

    /// Start a retry sequence for callers that drive the loop themselves
    pub fn start(&self) -> RetryState<'_> {
        RetryState {
            template: self,
            context: RetryContext::new(),
        }
    }

    /// Invoke `operation` until it succeeds or the policy gives up
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, ItemError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ItemError>>,
    {
        let mut state = self.start();
        loop {
            match operation().await {
                Ok(value) => {
                    state.succeeded();
                    return Ok(value);
                }
                Err(error) => match state.on_failure(error).await {
                    RetryDecision::Retry => continue,
                    RetryDecision::Exhausted(error) => return Err(error),
                },
            }
        }
    }
}

/// One in-progress retry sequence
pub struct RetryState<'a> {
    template: &'a RetryTemplate,
    context: RetryContext,
}

impl RetryState<'_> {
    pub fn attempts(&self) -> u32 {
        self.context.attempts()
    }

    /// Register a failure; sleeps for the back-off delay before `Retry`
    pub async fn on_failure(&mut self, error: ItemError) -> RetryDecision {
        let policy = &self.template.policy;
        policy.register_failure(&mut self.context, error);

        if policy.can_retry(&self.context) {
            let delay = self.template.back_off.delay(self.context.attempts);
            debug!(
                attempt = self.context.attempts,
                delay_ms = delay.as_millis() as u64,
                "Retrying after failure"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            return RetryDecision::Retry;
        }

        self.context.exhausted = true;
        policy.close(&mut self.context);
        let attempts = self.context.attempts;
        match self.context.last_error.take() {
            Some(error) => {
                if attempts > 1 {
                    warn!(attempts = attempts, error = %error, "Retry attempts exhausted");
                }
                RetryDecision::Exhausted(error)
            }
            None => RetryDecision::Exhausted("retry exhausted without a recorded failure".into()),
        }
    }

    pub fn succeeded(&mut self) {
        self.template.policy.close(&mut self.context);
    }
}

#[cfg(test)]
mod tests {
    use super::super::matcher::test_errors::*;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn flaky(calls: &AtomicU32, fail_times: u32) -> Result<u32, ItemError> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= fail_times {
            Err(Box::new(Transient))
        } else {
            Ok(n)
        }
    }

    #[tokio::test]
    async fn test_max_attempts_recovers() {
        let template = RetryTemplate::new(Arc::new(MaxAttemptsRetryPolicy::new(3)));
        let calls = AtomicU32::new(0);
        let value = template.execute(|| flaky(&calls, 2)).await.unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_max_attempts_exhausts() {
        let template = RetryTemplate::new(Arc::new(MaxAttemptsRetryPolicy::new(3)));
        let calls = AtomicU32::new(0);
        let err = template.execute(|| flaky(&calls, 10)).await.unwrap_err();
        assert!(err.is::<Transient>());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_never_retry_invokes_once() {
        let calls = AtomicU32::new(0);
        assert!(RetryTemplate::never()
            .execute(|| flaky(&calls, 1))
            .await
            .is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_composite_filter_and_limit() {
        let policy = CompositeRetryPolicy::new(vec![
            Arc::new(
                ExceptionFilterRetryPolicy::new().retry_on(ErrorMatcher::of::<Transient>()),
            ),
            Arc::new(MaxAttemptsRetryPolicy::new(5)),
        ]);
        let template = RetryTemplate::new(Arc::new(policy));

        let calls = AtomicU32::new(0);
        assert_eq!(template.execute(|| flaky(&calls, 2)).await.unwrap(), 3);

        // Non-retryable errors fail on the first attempt
        let corrupt_calls = AtomicU32::new(0);
        let err = template
            .execute(|| async {
                corrupt_calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), ItemError>(Box::new(Corrupt))
            })
            .await
            .unwrap_err();
        assert!(err.is::<Corrupt>());
        assert_eq!(corrupt_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_classifying_routes_by_type() {
        let policy = ClassifyingRetryPolicy::new(Arc::new(NeverRetryPolicy))
            .route(ErrorMatcher::of::<Transient>(), Arc::new(MaxAttemptsRetryPolicy::new(4)));

        let mut transient = RetryContext::new();
        policy.register_failure(&mut transient, Box::new(Transient));
        assert!(policy.can_retry(&transient));

        let mut bad = RetryContext::new();
        policy.register_failure(&mut bad, Box::new(BadRecord("x".into())));
        assert!(!policy.can_retry(&bad));
    }

    #[test]
    fn test_exponential_back_off_with_jitter() {
        let back_off = BackOffPolicy::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
        };
        for attempt in 1..=3u32 {
            let expected = 100.0 * 2f64.powi(attempt as i32 - 1);
            let delay = back_off.delay(attempt).as_millis() as f64;
            assert!(delay >= expected * 0.9 - 1.0 && delay <= expected * 1.1 + 1.0);
        }
        // Capped
        assert_eq!(back_off.delay(20), Duration::from_secs(1));
        assert_eq!(BackOffPolicy::None.delay(3), Duration::ZERO);
    }
}

// Failure classification: skip and retry decisions for item failures

pub mod matcher;
pub mod retry;
pub mod skip;
pub mod skip_cache;

pub use matcher::{ErrorClassifier, ErrorMatcher};
pub use retry::{
    BackOffPolicy, ClassifyingRetryPolicy, CompositeRetryPolicy, ExceptionFilterRetryPolicy,
    MaxAttemptsRetryPolicy, NeverRetryPolicy, RetryContext, RetryDecision, RetryPolicy,
    RetryState, RetryTemplate,
};
pub use skip::{
    AlwaysSkipPolicy, CompositeSkipPolicy, LimitCheckingSkipPolicy, NeverSkipPolicy, SkipPolicy,
    SkipVerdict,
};
pub use skip_cache::{ChunkAttempt, WriteSkipCache};

// Repeat engine: completion policies, lifecycle hooks, exception handling
// and inline or concurrent dispatch

pub mod context;
pub mod exception;
pub mod listener;
pub mod policy;
pub mod result_queue;
pub mod template;

pub use context::{RepeatContext, RepeatStatus};
pub use exception::{
    AbsorbingExceptionHandler, ExceptionHandler, LimitExceptionHandler, RethrowExceptionHandler,
};
pub use listener::RepeatListener;
pub use policy::{
    ChunkSizeCompletionPolicy, CompletionPolicy, CompositeCompletionPolicy,
    TimeoutCompletionPolicy, UntilExhaustedPolicy,
};
pub use result_queue::ResultQueue;
pub use template::{FnCallback, RepeatCallback, RepeatOperations, RepeatTemplate};

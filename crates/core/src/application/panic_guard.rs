// Panic isolation for work dispatched onto worker tasks
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed
    Success(T),
    /// Execution panicked
    Panicked(String),
}

/// Poll a future to completion, converting a panic into `Panicked`.
///
/// Used by the concurrent repeat template so a panicking callback still
/// delivers a result to its queue instead of leaving the loop waiting.
pub async fn execute_guarded<F, T>(future: F) -> PanicGuardResult<T>
where
    F: std::future::Future<Output = T>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => PanicGuardResult::Success(result),
        Err(panic_info) => {
            let panic_msg = panic_message(panic_info.as_ref());
            error!(panic_msg = %panic_msg, "Iteration panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}

fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

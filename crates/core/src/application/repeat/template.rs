// Repeat template: run a callback until a completion policy says stop

use super::context::{RepeatContext, RepeatStatus};
use super::exception::{ExceptionHandler, RethrowExceptionHandler};
use super::listener::RepeatListener;
use super::policy::{CompletionPolicy, UntilExhaustedPolicy};
use super::result_queue::ResultQueue;
use crate::application::panic_guard::{execute_guarded, PanicGuardResult};
use crate::application::stop::StopToken;
use crate::error::{BatchError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Unit of repeated work
#[async_trait]
pub trait RepeatCallback: Send + Sync {
    async fn do_in_iteration(&self, context: &RepeatContext) -> Result<RepeatStatus>;
}

/// Adapter turning an async closure into a [`RepeatCallback`]
pub struct FnCallback<F> {
    f: F,
}

impl<F> FnCallback<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> RepeatCallback for FnCallback<F>
where
    F: Fn(RepeatContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RepeatStatus>> + Send + 'static,
{
    async fn do_in_iteration(&self, context: &RepeatContext) -> Result<RepeatStatus> {
        (self.f)(context.clone()).await
    }
}

/// Anything that can drive a callback to completion
#[async_trait]
pub trait RepeatOperations: Send + Sync {
    async fn iterate(&self, callback: Arc<dyn RepeatCallback>) -> Result<RepeatStatus>;
}

/// How iterations are executed
#[derive(Clone)]
enum Dispatch {
    /// One iteration at a time on the calling task
    Inline,
    /// Each iteration on its own tokio task, at most `throttle_limit` in flight
    Concurrent {
        throttle_limit: usize,
        stop: StopToken,
    },
}

/// Per-invocation dispatch state
enum Dispatcher {
    Inline,
    Concurrent {
        queue: Arc<ResultQueue<Result<RepeatStatus>>>,
        stop: StopToken,
    },
}

/// Repeat driver.
///
/// Per invocation: listeners open, then each iteration runs the `before`
/// hooks, the callback and either the `after` hooks or the `on_error` hooks
/// plus the exception handler. The loop ends when the completion policy is
/// satisfied, a hook or callback marks the context complete, or any error has
/// been accumulated. Outstanding concurrent results are then collected, the
/// `close` hooks run in reverse order and the first accumulated error, if
/// any, is returned.
#[derive(Clone)]
pub struct RepeatTemplate {
    completion_policy: Arc<dyn CompletionPolicy>,
    exception_handler: Arc<dyn ExceptionHandler>,
    listeners: Vec<Arc<dyn RepeatListener>>,
    dispatch: Dispatch,
}

impl RepeatTemplate {
    /// Synchronous template, repeating until the callback is exhausted
    pub fn new() -> Self {
        Self {
            completion_policy: Arc::new(UntilExhaustedPolicy),
            exception_handler: Arc::new(RethrowExceptionHandler),
            listeners: Vec::new(),
            dispatch: Dispatch::Inline,
        }
    }

    /// Template dispatching each iteration onto a tokio task.
    ///
    /// `stop` interrupts waits on the result queue.
    pub fn concurrent(throttle_limit: usize, stop: StopToken) -> Self {
        Self {
            dispatch: Dispatch::Concurrent {
                throttle_limit: throttle_limit.max(1),
                stop,
            },
            ..Self::new()
        }
    }

    pub fn with_completion_policy(mut self, policy: Arc<dyn CompletionPolicy>) -> Self {
        self.completion_policy = policy;
        self
    }

    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = handler;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn RepeatListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn dispatcher(&self) -> Dispatcher {
        match &self.dispatch {
            Dispatch::Inline => Dispatcher::Inline,
            Dispatch::Concurrent {
                throttle_limit,
                stop,
            } => Dispatcher::Concurrent {
                queue: Arc::new(ResultQueue::new(*throttle_limit)),
                stop: stop.clone(),
            },
        }
    }

    async fn execute_loop(
        &self,
        context: &RepeatContext,
        callback: &Arc<dyn RepeatCallback>,
        dispatcher: &Dispatcher,
    ) -> Result<RepeatStatus> {
        let mut result = RepeatStatus::Continuable;
        let mut deferred: Vec<BatchError> = Vec::new();

        let mut running = !context.is_complete_only();
        for listener in &self.listeners {
            listener.open(context);
            running = running && !context.is_complete_only();
        }

        while running {
            for listener in &self.listeners {
                listener.before(context);
                running = running && !context.is_complete_only();
            }
            if !running {
                break;
            }

            match self.next_result(context, callback, dispatcher).await {
                Ok(status) => {
                    result = status;
                    for listener in self.listeners.iter().rev() {
                        listener.after(context, status);
                    }
                }
                Err(error) => self.handle_error(context, error, &mut deferred),
            }

            if self.completion_policy.is_complete_with(context, result)
                || context.is_complete_only()
                || !deferred.is_empty()
            {
                running = false;
            }
        }

        result = result.and(self.wait_for_results(context, dispatcher, &mut deferred).await);

        for listener in self.listeners.iter().rev() {
            listener.close(context);
        }

        let mut errors = deferred.into_iter();
        match errors.next() {
            Some(first) => {
                for other in errors {
                    warn!(error = %other, "Additional iteration failure discarded");
                }
                Err(first)
            }
            None => Ok(result),
        }
    }

    fn handle_error(
        &self,
        context: &RepeatContext,
        error: BatchError,
        deferred: &mut Vec<BatchError>,
    ) {
        for listener in self.listeners.iter().rev() {
            listener.on_error(context, &error);
        }
        if let Err(rethrown) = self.exception_handler.handle(context, error) {
            debug!(error = %rethrown, "Iteration failure ends repeat loop");
            deferred.push(rethrown);
        }
    }

    async fn next_result(
        &self,
        context: &RepeatContext,
        callback: &Arc<dyn RepeatCallback>,
        dispatcher: &Dispatcher,
    ) -> Result<RepeatStatus> {
        match dispatcher {
            Dispatcher::Inline => {
                context.increment_count();
                callback.do_in_iteration(context).await
            }
            Dispatcher::Concurrent { queue, stop } => {
                // Keep dispatching until some result is back or the policy is done
                loop {
                    queue.expect(stop).await?;
                    let callback = callback.clone();
                    let worker_context = context.clone();
                    let worker_queue = queue.clone();
                    tokio::spawn(async move {
                        let outcome =
                            execute_guarded(callback.do_in_iteration(&worker_context)).await;
                        let result = match outcome {
                            PanicGuardResult::Success(result) => result,
                            PanicGuardResult::Panicked(msg) => {
                                Err(BatchError::Internal(format!("Iteration panicked: {}", msg)))
                            }
                        };
                        worker_queue.put(result);
                    });
                    context.increment_count();

                    if !queue.is_empty()
                        || self.completion_policy.is_complete(context)
                        || context.is_complete_only()
                    {
                        break;
                    }
                }
                queue.take(stop).await?
            }
        }
    }

    async fn wait_for_results(
        &self,
        context: &RepeatContext,
        dispatcher: &Dispatcher,
        deferred: &mut Vec<BatchError>,
    ) -> RepeatStatus {
        let mut result = RepeatStatus::Continuable;
        if let Dispatcher::Concurrent { queue, .. } = dispatcher {
            // Every worker already dispatched is collected, even after a stop,
            // so no iteration outlives the loop
            let drain = StopToken::never();
            while queue.is_expecting() {
                match queue.take(&drain).await {
                    Ok(Ok(status)) => result = result.and(status),
                    Ok(Err(error)) => self.handle_error(context, error, deferred),
                    Err(error) => {
                        deferred.push(error);
                        break;
                    }
                }
            }
        }
        result
    }
}

impl Default for RepeatTemplate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepeatOperations for RepeatTemplate {
    async fn iterate(&self, callback: Arc<dyn RepeatCallback>) -> Result<RepeatStatus> {
        let context = RepeatContext::new();
        let dispatcher = self.dispatcher();
        self.execute_loop(&context, &callback, &dispatcher).await
    }
}

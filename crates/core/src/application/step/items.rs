// Item-level handling inside one chunk attempt: read, process and write with
// skip classification, retry and the write-skip cache

use crate::application::classify::{
    matcher::matches_any, ChunkAttempt, ErrorMatcher, RetryDecision, RetryTemplate, SkipPolicy,
    SkipVerdict, WriteSkipCache,
};
use crate::application::repeat::{RepeatCallback, RepeatContext, RepeatStatus};
use crate::error::{BatchError, ItemError, Result};
use crate::port::{
    ChunkListener, Composite, ExecutionRepository, ItemProcessor, ItemReadListener, ItemReader,
    ItemWriteListener, ItemWriter, SkipListener, TransactionManager,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub(super) type SharedReader<I> = Arc<Mutex<Box<dyn ItemReader<I>>>>;
pub(super) type SharedWriter<O> = Arc<Mutex<Box<dyn ItemWriter<O>>>>;
pub(super) type ItemKeyFn<O> = Arc<dyn Fn(&O) -> String + Send + Sync>;

/// Collaborators of a chunk step, shared by every chunk attempt
pub(super) struct ChunkCore<I, O> {
    pub step_name: String,
    pub repository: Arc<dyn ExecutionRepository>,
    pub transactions: Arc<dyn TransactionManager>,
    pub reader: SharedReader<I>,
    pub processor: Arc<dyn ItemProcessor<I, O>>,
    pub writer: SharedWriter<O>,
    pub skip_policy: Arc<dyn SkipPolicy>,
    pub retry: RetryTemplate,
    pub skip_cache: WriteSkipCache,
    pub item_key: ItemKeyFn<O>,
    pub no_rollback: Vec<ErrorMatcher>,
    pub chunk_listeners: Composite<dyn ChunkListener>,
    pub read_listeners: Composite<dyn ItemReadListener<I>>,
    pub write_listeners: Composite<dyn ItemWriteListener<O>>,
    pub skip_listeners: Composite<dyn SkipListener<I, O>>,
}

/// Inner-loop callback: one iteration moves one item from reader to writer
pub(super) struct ChunkItemCallback<I, O> {
    pub core: Arc<ChunkCore<I, O>>,
    pub attempt: Arc<StdMutex<ChunkAttempt>>,
    /// Durable skip count of the step when the attempt began
    pub base_skip_count: i64,
}

impl<I, O> ChunkItemCallback<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn attempt(&self) -> MutexGuard<'_, ChunkAttempt> {
        self.attempt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn skip_count(&self) -> i64 {
        self.base_skip_count + self.attempt().contribution.skip_count()
    }

    /// Next readable item; skippable read failures are counted and passed over
    async fn read(&self) -> Result<Option<I>> {
        loop {
            self.core.read_listeners.before_read()?;
            let outcome = self.core.reader.lock().await.read().await;
            match outcome {
                Ok(Some(item)) => {
                    self.core.read_listeners.after_read(&item)?;
                    self.attempt().contribution.read_count += 1;
                    return Ok(Some(item));
                }
                Ok(None) => return Ok(None),
                Err(error) => {
                    self.core.read_listeners.on_read_error(&error);
                    match self.core.skip_policy.should_skip(&error, self.skip_count()) {
                        SkipVerdict::Skip => {
                            warn!(step = %self.core.step_name, error = %error, "Skipping unreadable item");
                            self.attempt().contribution.read_skip_count += 1;
                            self.core.skip_listeners.on_skip_in_read(&error);
                        }
                        SkipVerdict::Abort { limit } => {
                            return Err(BatchError::SkipLimitExceeded {
                                limit,
                                source: error,
                            })
                        }
                        SkipVerdict::Proceed => return Err(BatchError::Item(error)),
                    }
                }
            }
        }
    }

    /// Processed item, or `None` when filtered or skipped
    async fn process(&self, item: I) -> Result<Option<O>> {
        let mut retry = self.core.retry.start();
        loop {
            match self.core.processor.process(item.clone()).await {
                Ok(Some(output)) => {
                    retry.succeeded();
                    return Ok(Some(output));
                }
                Ok(None) => {
                    retry.succeeded();
                    self.attempt().contribution.filter_count += 1;
                    return Ok(None);
                }
                Err(error) => match retry.on_failure(error).await {
                    RetryDecision::Retry => continue,
                    RetryDecision::Exhausted(error) => {
                        return match self.core.skip_policy.should_skip(&error, self.skip_count())
                        {
                            SkipVerdict::Skip => {
                                warn!(step = %self.core.step_name, error = %error, "Skipping item that failed processing");
                                self.attempt().contribution.process_skip_count += 1;
                                self.core.skip_listeners.on_skip_in_process(&item, &error);
                                Ok(None)
                            }
                            SkipVerdict::Abort { limit } => Err(BatchError::SkipLimitExceeded {
                                limit,
                                source: error,
                            }),
                            SkipVerdict::Proceed => Err(BatchError::Item(error)),
                        };
                    }
                },
            }
        }
    }

    async fn write(&self, item: O) -> Result<()> {
        let key = (self.core.item_key)(&item);

        // Failed on an earlier attempt of this chunk: drop it now
        let listeners = &self.core.skip_listeners;
        if self
            .core
            .skip_cache
            .with_cause(&key, |cause| listeners.on_skip_in_write(&item, cause))
        {
            debug!(step = %self.core.step_name, key = %key, "Skipping previously failed write");
            let mut attempt = self.attempt();
            attempt.contribution.write_skip_count += 1;
            attempt.remove_on_commit(key);
            return Ok(());
        }

        self.core.write_listeners.before_write(&item)?;
        let mut retry = self.core.retry.start();
        loop {
            let outcome = self.core.writer.lock().await.write(item.clone()).await;
            match outcome {
                Ok(()) => {
                    retry.succeeded();
                    break;
                }
                Err(error) => match retry.on_failure(error).await {
                    RetryDecision::Retry => continue,
                    RetryDecision::Exhausted(error) => {
                        return self.write_failed(item, key, error);
                    }
                },
            }
        }
        self.core.write_listeners.after_write(&item)?;
        self.attempt().contribution.write_count += 1;
        Ok(())
    }

    fn write_failed(&self, item: O, key: String, error: ItemError) -> Result<()> {
        self.core.write_listeners.on_write_error(&item, &error);
        match self.core.skip_policy.should_skip(&error, self.skip_count()) {
            SkipVerdict::Skip if matches_any(&self.core.no_rollback, &*error) => {
                warn!(step = %self.core.step_name, error = %error, "Skipping failed write without rollback");
                self.attempt().contribution.write_skip_count += 1;
                self.core.skip_listeners.on_skip_in_write(&item, &error);
                Ok(())
            }
            SkipVerdict::Skip => {
                let message = error.to_string();
                self.core.skip_cache.insert(key, error)?;
                Err(BatchError::SkippedWriteRollback(message.into()))
            }
            SkipVerdict::Abort { limit } => Err(BatchError::SkipLimitExceeded {
                limit,
                source: error,
            }),
            SkipVerdict::Proceed => Err(BatchError::Item(error)),
        }
    }
}

#[async_trait]
impl<I, O> RepeatCallback for ChunkItemCallback<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    async fn do_in_iteration(&self, _context: &RepeatContext) -> Result<RepeatStatus> {
        let item = match self.read().await? {
            Some(item) => item,
            None => {
                self.attempt().mark_exhausted();
                return Ok(RepeatStatus::Finished);
            }
        };
        if let Some(output) = self.process(item).await? {
            self.write(output).await?;
        }
        Ok(RepeatStatus::Continuable)
    }
}

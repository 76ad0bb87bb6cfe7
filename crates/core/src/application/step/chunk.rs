// Chunk-oriented step: read/process/write items in transactional chunks

use super::items::{ChunkCore, ChunkItemCallback, ItemKeyFn};
use super::{check_for_stop, Step, StepSettings};
use crate::application::classify::{
    ChunkAttempt, ErrorMatcher, NeverSkipPolicy, RetryTemplate, SkipPolicy, WriteSkipCache,
};
use crate::application::constants::{DEFAULT_COMMIT_INTERVAL, DEFAULT_SKIP_CACHE_CAPACITY};
use crate::application::repeat::{
    AbsorbingExceptionHandler, ChunkSizeCompletionPolicy, RepeatCallback, RepeatContext,
    RepeatOperations, RepeatStatus, RepeatTemplate,
};
use crate::application::stop::{InterruptionPolicy, StopToken, TokenInterruptionPolicy};
use crate::domain::{BatchStatus, ExecutionContext, ExitStatus, StepExecution};
use crate::error::{BatchError, ItemError, Result};
use crate::port::{
    ChunkListener, Composite, ExecutionRepository, ItemProcessor, ItemReadListener, ItemReader,
    ItemWriteListener, ItemWriter, SkipListener, StepListener, StepTransaction,
    TransactionManager,
};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Processor that hands every item through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughProcessor;

#[async_trait]
impl<T: Send + 'static> ItemProcessor<T, T> for PassThroughProcessor {
    async fn process(&self, item: T) -> std::result::Result<Option<T>, ItemError> {
        Ok(Some(item))
    }
}

/// Step driven by two nested repeat loops: the step loop (one iteration per
/// chunk, until the reader is exhausted) and the chunk loop (one iteration per
/// item, until the commit interval is reached).
pub struct ChunkStep<I, O> {
    settings: StepSettings,
    core: Arc<ChunkCore<I, O>>,
    commit_interval: usize,
    throttle_limit: Option<usize>,
}

impl<T> ChunkStep<T, T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    /// Builder for a step without a processing stage
    pub fn builder(
        name: impl Into<String>,
        repository: Arc<dyn ExecutionRepository>,
        transactions: Arc<dyn TransactionManager>,
    ) -> ChunkStepBuilder<T, T> {
        ChunkStepBuilder::new(name, repository, transactions, Arc::new(PassThroughProcessor))
    }
}

impl<I, O> ChunkStep<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Debug + Send + Sync + 'static,
{
    /// Builder for a step that transforms items with `processor`
    pub fn builder_with_processor(
        name: impl Into<String>,
        repository: Arc<dyn ExecutionRepository>,
        transactions: Arc<dyn TransactionManager>,
        processor: Arc<dyn ItemProcessor<I, O>>,
    ) -> ChunkStepBuilder<I, O> {
        ChunkStepBuilder::new(name, repository, transactions, processor)
    }

    fn step_operations(&self, stop: &StopToken) -> RepeatTemplate {
        let template = match self.throttle_limit {
            Some(limit) => RepeatTemplate::concurrent(limit, stop.clone()),
            None => RepeatTemplate::new(),
        };
        // A skipped write rolls the chunk back; the next pass drops the item
        template.with_exception_handler(Arc::new(AbsorbingExceptionHandler::new(|e| {
            matches!(e, BatchError::SkippedWriteRollback(_))
        })))
    }

    async fn open_streams(&self, step_execution: &StepExecution) -> Result<()> {
        let context = &step_execution.execution_context;
        self.core
            .reader
            .lock()
            .await
            .open(context)
            .await
            .map_err(BatchError::Item)?;
        self.core
            .writer
            .lock()
            .await
            .open(context)
            .await
            .map_err(BatchError::Item)
    }

    async fn close_streams(&self, step_execution: &StepExecution) -> Result<()> {
        let context = &step_execution.execution_context;
        let reader = self.core.reader.lock().await.close(context).await;
        let writer = self.core.writer.lock().await.close(context).await;
        reader.map_err(BatchError::Item)?;
        writer.map_err(BatchError::Item)
    }
}

#[async_trait]
impl<I, O> Step for ChunkStep<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Debug + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.core.step_name
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    async fn execute(
        &self,
        step_execution: &mut StepExecution,
        stop: &StopToken,
    ) -> Result<ExitStatus> {
        info!(
            step = %self.core.step_name,
            commit_interval = self.commit_interval,
            restart = !step_execution.execution_context.is_empty(),
            "Executing chunk step"
        );
        self.open_streams(step_execution).await?;

        let shared = Arc::new(Mutex::new(step_execution.clone()));
        let callback = Arc::new(ChunkCallback {
            core: self.core.clone(),
            step_execution: shared.clone(),
            interruption: TokenInterruptionPolicy::new(stop.clone()),
            commit_interval: self.commit_interval,
        });
        let outcome = self.step_operations(stop).iterate(callback).await;

        *step_execution = shared.lock().await.clone();
        let closed = self.close_streams(step_execution).await;
        outcome?;
        closed?;

        info!(
            step = %self.core.step_name,
            read = step_execution.read_count,
            written = step_execution.write_count,
            skipped = step_execution.skip_count(),
            commits = step_execution.commit_count,
            rollbacks = step_execution.rollback_count,
            "Chunk step finished"
        );
        Ok(ExitStatus::completed())
    }
}

/// Step-loop callback: one iteration is one transactional chunk
struct ChunkCallback<I, O> {
    core: Arc<ChunkCore<I, O>>,
    step_execution: Arc<Mutex<StepExecution>>,
    interruption: TokenInterruptionPolicy,
    commit_interval: usize,
}

impl<I, O> ChunkCallback<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Inner loop, flush and checkpoint; everything up to (not including) commit.
    ///
    /// Returns the staged checkpoint, which replaces the step's context only
    /// once the transaction commits.
    async fn fill_chunk(
        &self,
        attempt: Arc<StdMutex<ChunkAttempt>>,
        base_skip_count: i64,
        transaction: &mut Box<dyn StepTransaction>,
    ) -> Result<ExecutionContext> {
        let items = Arc::new(ChunkItemCallback {
            core: self.core.clone(),
            attempt,
            base_skip_count,
        });
        RepeatTemplate::new()
            .with_completion_policy(Arc::new(ChunkSizeCompletionPolicy::new(
                self.commit_interval,
            )))
            .iterate(items)
            .await?;

        self.core
            .writer
            .lock()
            .await
            .flush()
            .await
            .map_err(BatchError::Item)?;

        let mut staged = self.step_execution.lock().await.clone();
        self.core
            .reader
            .lock()
            .await
            .update(&mut staged.execution_context)
            .await
            .map_err(BatchError::Item)?;
        self.core
            .writer
            .lock()
            .await
            .update(&mut staged.execution_context)
            .await
            .map_err(BatchError::Item)?;
        transaction.save_step_context(&staged).await?;
        Ok(staged.execution_context)
    }

    async fn commit(
        &self,
        transaction: Box<dyn StepTransaction>,
        attempt: ChunkAttempt,
        checkpoint: ExecutionContext,
    ) -> Result<RepeatStatus> {
        if let Err(err) = transaction.commit().await {
            let mut step_execution = self.step_execution.lock().await;
            step_execution.status = BatchStatus::Unknown;
            error!(
                step = %self.core.step_name,
                error = %err,
                "Chunk commit failed; data state unknown"
            );
            return Err(match err {
                BatchError::CommitFailed(_) => err,
                other => BatchError::CommitFailed(other.to_string()),
            });
        }

        attempt.commit_into(&self.core.skip_cache);
        {
            let mut step_execution = self.step_execution.lock().await;
            step_execution.execution_context = checkpoint;
            step_execution.apply(&attempt.contribution);
            self.core
                .repository
                .update_step_execution(&mut step_execution)
                .await?;
            debug!(
                step = %self.core.step_name,
                read = attempt.contribution.read_count,
                written = attempt.contribution.write_count,
                skipped = attempt.contribution.skip_count(),
                commits = step_execution.commit_count,
                "Chunk committed"
            );
        }
        self.core.chunk_listeners.after_chunk()?;

        Ok(if attempt.is_exhausted() {
            RepeatStatus::Finished
        } else {
            RepeatStatus::Continuable
        })
    }

    async fn rollback(&self, transaction: Box<dyn StepTransaction>, cause: BatchError) -> BatchError {
        warn!(step = %self.core.step_name, error = %cause, "Rolling back chunk");
        let rolled_back = transaction.rollback().await;
        self.core.writer.lock().await.clear();
        let reset = self.core.reader.lock().await.reset();
        self.step_execution.lock().await.rollback_count += 1;

        if let Err(err) = rolled_back {
            error!(step = %self.core.step_name, error = %err, "Chunk rollback failed");
            return BatchError::RollbackFailed(format!("{} (while handling: {})", err, cause));
        }
        if let Err(err) = reset {
            // The rolled-back items cannot be re-read
            error!(step = %self.core.step_name, error = %err, "Reader reset failed");
            return BatchError::Item(err);
        }
        cause
    }
}

#[async_trait]
impl<I, O> RepeatCallback for ChunkCallback<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    async fn do_in_iteration(&self, _context: &RepeatContext) -> Result<RepeatStatus> {
        let base_skip_count = {
            let mut step_execution = self.step_execution.lock().await;
            check_for_stop(self.core.repository.as_ref(), &mut step_execution).await?;
            self.interruption.check(&step_execution)?;
            step_execution.skip_count()
        };
        self.core.chunk_listeners.before_chunk()?;

        let mut transaction = self.core.transactions.begin_transaction().await?;
        let marked = self.core.reader.lock().await.mark();
        if let Err(err) = marked {
            return Err(self.rollback(transaction, BatchError::Item(err)).await);
        }

        let attempt = Arc::new(StdMutex::new(ChunkAttempt::new()));
        match self
            .fill_chunk(attempt.clone(), base_skip_count, &mut transaction)
            .await
        {
            Ok(checkpoint) => {
                let attempt = std::mem::take(
                    &mut *attempt
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner()),
                );
                self.commit(transaction, attempt, checkpoint).await
            }
            Err(cause) => Err(self.rollback(transaction, cause).await),
        }
    }
}

/// Builder for [`ChunkStep`]
pub struct ChunkStepBuilder<I, O> {
    name: String,
    repository: Arc<dyn ExecutionRepository>,
    transactions: Arc<dyn TransactionManager>,
    reader: Option<Box<dyn ItemReader<I>>>,
    processor: Arc<dyn ItemProcessor<I, O>>,
    writer: Option<Box<dyn ItemWriter<O>>>,
    commit_interval: usize,
    throttle_limit: Option<usize>,
    skip_policy: Arc<dyn SkipPolicy>,
    retry: RetryTemplate,
    skip_cache_capacity: usize,
    item_key: Option<ItemKeyFn<O>>,
    no_rollback: Vec<ErrorMatcher>,
    settings: StepSettings,
    chunk_listeners: Composite<dyn ChunkListener>,
    read_listeners: Composite<dyn ItemReadListener<I>>,
    write_listeners: Composite<dyn ItemWriteListener<O>>,
    skip_listeners: Composite<dyn SkipListener<I, O>>,
}

impl<I, O> ChunkStepBuilder<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Debug + Send + Sync + 'static,
{
    fn new(
        name: impl Into<String>,
        repository: Arc<dyn ExecutionRepository>,
        transactions: Arc<dyn TransactionManager>,
        processor: Arc<dyn ItemProcessor<I, O>>,
    ) -> Self {
        Self {
            name: name.into(),
            repository,
            transactions,
            reader: None,
            processor,
            writer: None,
            commit_interval: DEFAULT_COMMIT_INTERVAL,
            throttle_limit: None,
            skip_policy: Arc::new(NeverSkipPolicy),
            retry: RetryTemplate::never(),
            skip_cache_capacity: DEFAULT_SKIP_CACHE_CAPACITY,
            item_key: None,
            no_rollback: Vec::new(),
            settings: StepSettings::default(),
            chunk_listeners: Composite::new(),
            read_listeners: Composite::new(),
            write_listeners: Composite::new(),
            skip_listeners: Composite::new(),
        }
    }

    pub fn reader(mut self, reader: impl ItemReader<I> + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    pub fn writer(mut self, writer: impl ItemWriter<O> + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Items per chunk (transaction)
    pub fn commit_interval(mut self, commit_interval: usize) -> Self {
        self.commit_interval = commit_interval.max(1);
        self
    }

    /// Run chunks concurrently, at most `throttle_limit` in flight.
    ///
    /// Counters stay exact; checkpoint content is only meaningful once the
    /// step has completed.
    pub fn concurrent(mut self, throttle_limit: usize) -> Self {
        self.throttle_limit = Some(throttle_limit.max(1));
        self
    }

    pub fn skip_policy(mut self, policy: Arc<dyn SkipPolicy>) -> Self {
        self.skip_policy = policy;
        self
    }

    pub fn retry(mut self, retry: RetryTemplate) -> Self {
        self.retry = retry;
        self
    }

    pub fn skip_cache_capacity(mut self, capacity: usize) -> Self {
        self.skip_cache_capacity = capacity;
        self
    }

    /// Identity of a written item across chunk re-reads; defaults to its `Debug` form
    pub fn item_key(mut self, key: impl Fn(&O) -> String + Send + Sync + 'static) -> Self {
        self.item_key = Some(Arc::new(key));
        self
    }

    /// Skippable write failures of this type are dropped without rolling back
    pub fn no_rollback(mut self, matcher: ErrorMatcher) -> Self {
        self.no_rollback.push(matcher);
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.settings.allow_start_if_complete = allow;
        self
    }

    pub fn start_limit(mut self, limit: u32) -> Self {
        self.settings.start_limit = limit;
        self
    }

    pub fn step_listener(mut self, listener: Arc<dyn StepListener>) -> Self {
        self.settings.register_listener(listener);
        self
    }

    pub fn chunk_listener(mut self, listener: Arc<dyn ChunkListener>) -> Self {
        self.chunk_listeners.register(listener);
        self
    }

    pub fn read_listener(mut self, listener: Arc<dyn ItemReadListener<I>>) -> Self {
        self.read_listeners.register(listener);
        self
    }

    pub fn write_listener(mut self, listener: Arc<dyn ItemWriteListener<O>>) -> Self {
        self.write_listeners.register(listener);
        self
    }

    pub fn skip_listener(mut self, listener: Arc<dyn SkipListener<I, O>>) -> Self {
        self.skip_listeners.register(listener);
        self
    }

    pub fn build(self) -> Result<ChunkStep<I, O>> {
        let reader = self.reader.ok_or_else(|| {
            BatchError::Config(format!("Chunk step {} has no reader", self.name))
        })?;
        let writer = self.writer.ok_or_else(|| {
            BatchError::Config(format!("Chunk step {} has no writer", self.name))
        })?;
        let item_key = self
            .item_key
            .unwrap_or_else(|| Arc::new(|item: &O| format!("{:?}", item)));

        Ok(ChunkStep {
            settings: self.settings,
            commit_interval: self.commit_interval,
            throttle_limit: self.throttle_limit,
            core: Arc::new(ChunkCore {
                step_name: self.name,
                repository: self.repository,
                transactions: self.transactions,
                reader: Arc::new(Mutex::new(reader)),
                processor: self.processor,
                writer: Arc::new(Mutex::new(writer)),
                skip_policy: self.skip_policy,
                retry: self.retry,
                skip_cache: WriteSkipCache::new(self.skip_cache_capacity),
                item_key,
                no_rollback: self.no_rollback,
                chunk_listeners: self.chunk_listeners,
                read_listeners: self.read_listeners,
                write_listeners: self.write_listeners,
                skip_listeners: self.skip_listeners,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::classify::matcher::test_errors::{BadRecord, Transient};
    use crate::application::classify::{
        AlwaysSkipPolicy, LimitCheckingSkipPolicy, MaxAttemptsRetryPolicy,
    };
    use crate::application::stop::stop_channel;
    use crate::domain::JobParameters;
    use crate::memory::InMemoryExecutionRepository;
    use crate::port::ItemStream;
    use crate::support::{CollectingItemWriter, ListItemReader};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Writer that rejects one value and collects the rest
    struct RejectingWriter {
        inner: CollectingItemWriter<i32>,
        reject: i32,
    }

    impl ItemStream for RejectingWriter {}

    #[async_trait]
    impl ItemWriter<i32> for RejectingWriter {
        async fn write(&mut self, item: i32) -> std::result::Result<(), ItemError> {
            if item == self.reject {
                return Err(Box::new(BadRecord(item.to_string())));
            }
            self.inner.write(item).await
        }

        async fn flush(&mut self) -> std::result::Result<(), ItemError> {
            self.inner.flush().await
        }

        fn clear(&mut self) {
            self.inner.clear()
        }
    }

    /// Rejects `bad` values, filters `filtered` ones and fails the first
    /// attempt at `flaky` with a transient error
    struct ScriptedProcessor {
        bad: Vec<i32>,
        filtered: Vec<i32>,
        flaky: Option<i32>,
        flaky_calls: AtomicU32,
    }

    impl ScriptedProcessor {
        fn new() -> Self {
            Self {
                bad: Vec::new(),
                filtered: Vec::new(),
                flaky: None,
                flaky_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ItemProcessor<i32, i32> for ScriptedProcessor {
        async fn process(&self, item: i32) -> std::result::Result<Option<i32>, ItemError> {
            if self.bad.contains(&item) {
                return Err(Box::new(BadRecord(item.to_string())));
            }
            if self.filtered.contains(&item) {
                return Ok(None);
            }
            if self.flaky == Some(item) && self.flaky_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(Box::new(Transient));
            }
            Ok(Some(item * 10))
        }
    }

    async fn started_step(repository: &InMemoryExecutionRepository) -> StepExecution {
        let job = repository
            .create_job_execution("job", true, &JobParameters::new())
            .await
            .unwrap();
        let mut step_execution = job.create_step_execution("chunk").unwrap();
        repository
            .save_step_execution(&mut step_execution)
            .await
            .unwrap();
        step_execution.start(1).unwrap();
        step_execution
    }

    fn repo() -> (InMemoryExecutionRepository, Arc<InMemoryExecutionRepository>) {
        let repository = InMemoryExecutionRepository::new();
        (repository.clone(), Arc::new(repository))
    }

    #[tokio::test]
    async fn test_commits_one_transaction_per_chunk() {
        let (repository, shared) = repo();
        let writer = CollectingItemWriter::new();
        let collected = writer.collected();
        let step = ChunkStep::<i32, i32>::builder("chunk", shared.clone(), shared)
            .reader(ListItemReader::new((1..=5).collect()))
            .writer(writer)
            .commit_interval(2)
            .build()
            .unwrap();

        let mut step_execution = started_step(&repository).await;
        step.execute(&mut step_execution, &StopToken::never())
            .await
            .unwrap();

        assert_eq!(collected.snapshot(), vec![1, 2, 3, 4, 5]);
        assert_eq!(step_execution.read_count, 5);
        assert_eq!(step_execution.write_count, 5);
        assert_eq!(step_execution.commit_count, 3);
        assert_eq!(step_execution.rollback_count, 0);
        assert_eq!(
            step_execution
                .execution_context
                .get_long("list_reader.position")
                .unwrap(),
            Some(5)
        );
        // Counters were persisted at each commit
        assert_eq!(step_execution.version, 3);
    }

    #[tokio::test]
    async fn test_skippable_write_failure_rolls_back_and_drops_item() {
        let (repository, shared) = repo();
        let inner = CollectingItemWriter::new();
        let collected = inner.collected();
        let step = ChunkStep::<i32, i32>::builder("chunk", shared.clone(), shared)
            .reader(ListItemReader::new((1..=5).collect()))
            .writer(RejectingWriter { inner, reject: 3 })
            .commit_interval(2)
            .skip_policy(Arc::new(
                LimitCheckingSkipPolicy::new(5).skip(ErrorMatcher::of::<BadRecord>()),
            ))
            .build()
            .unwrap();

        let mut step_execution = started_step(&repository).await;
        step.execute(&mut step_execution, &StopToken::never())
            .await
            .unwrap();

        assert_eq!(collected.snapshot(), vec![1, 2, 4, 5]);
        assert_eq!(step_execution.read_count, 5);
        assert_eq!(step_execution.write_count, 4);
        assert_eq!(step_execution.write_skip_count, 1);
        assert_eq!(step_execution.rollback_count, 1);
        assert_eq!(step_execution.commit_count, 3);
        assert!(step_execution.is_balanced());
    }

    #[tokio::test]
    async fn test_no_rollback_write_failure_is_skipped_in_place() {
        let (repository, shared) = repo();
        let inner = CollectingItemWriter::new();
        let collected = inner.collected();
        let step = ChunkStep::<i32, i32>::builder("chunk", shared.clone(), shared)
            .reader(ListItemReader::new((1..=5).collect()))
            .writer(RejectingWriter { inner, reject: 3 })
            .commit_interval(2)
            .skip_policy(Arc::new(AlwaysSkipPolicy))
            .no_rollback(ErrorMatcher::of::<BadRecord>())
            .build()
            .unwrap();

        let mut step_execution = started_step(&repository).await;
        step.execute(&mut step_execution, &StopToken::never())
            .await
            .unwrap();

        assert_eq!(collected.snapshot(), vec![1, 2, 4, 5]);
        assert_eq!(step_execution.write_skip_count, 1);
        assert_eq!(step_execution.rollback_count, 0);
    }

    #[tokio::test]
    async fn test_process_skip_filter_and_retry() {
        let (repository, shared) = repo();
        let writer = CollectingItemWriter::new();
        let collected = writer.collected();
        let processor = ScriptedProcessor {
            bad: vec![2],
            filtered: vec![4],
            flaky: Some(5),
            ..ScriptedProcessor::new()
        };
        let step = ChunkStep::<i32, i32>::builder_with_processor(
            "chunk",
            shared.clone(),
            shared,
            Arc::new(processor),
        )
        .reader(ListItemReader::new((1..=6).collect()))
        .writer(writer)
        .commit_interval(10)
        .skip_policy(Arc::new(
            LimitCheckingSkipPolicy::new(3).skip(ErrorMatcher::of::<BadRecord>()),
        ))
        .retry(RetryTemplate::new(Arc::new(MaxAttemptsRetryPolicy::new(2))))
        .build()
        .unwrap();

        let mut step_execution = started_step(&repository).await;
        step.execute(&mut step_execution, &StopToken::never())
            .await
            .unwrap();

        assert_eq!(collected.snapshot(), vec![10, 30, 50, 60]);
        assert_eq!(step_execution.read_count, 6);
        assert_eq!(step_execution.process_skip_count, 1);
        assert_eq!(step_execution.filter_count, 1);
        assert_eq!(step_execution.write_count, 4);
        assert_eq!(step_execution.rollback_count, 0);
        assert!(step_execution.is_balanced());
    }

    #[tokio::test]
    async fn test_skip_limit_aborts_and_rolls_back_chunk() {
        let (repository, shared) = repo();
        let writer = CollectingItemWriter::new();
        let collected = writer.collected();
        let processor = ScriptedProcessor {
            bad: vec![2, 4],
            ..ScriptedProcessor::new()
        };
        let step = ChunkStep::<i32, i32>::builder_with_processor(
            "chunk",
            shared.clone(),
            shared,
            Arc::new(processor),
        )
        .reader(ListItemReader::new((1..=5).collect()))
        .writer(writer)
        .skip_policy(Arc::new(
            LimitCheckingSkipPolicy::new(1).skip(ErrorMatcher::of::<BadRecord>()),
        ))
        .build()
        .unwrap();

        let mut step_execution = started_step(&repository).await;
        let err = step
            .execute(&mut step_execution, &StopToken::never())
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::SkipLimitExceeded { limit: 1, .. }));
        assert!(collected.is_empty());
        assert_eq!(step_execution.commit_count, 0);
        assert_eq!(step_execution.rollback_count, 1);
        // The rolled-back chunk leaves no checkpoint behind
        assert!(step_execution.execution_context.is_empty());
    }

    #[tokio::test]
    async fn test_unskippable_failure_fails_step() {
        let (repository, shared) = repo();
        let step = ChunkStep::<i32, i32>::builder("chunk", shared.clone(), shared)
            .reader(ListItemReader::new((1..=3).collect()))
            .writer(RejectingWriter {
                inner: CollectingItemWriter::new(),
                reject: 2,
            })
            .build()
            .unwrap();

        let mut step_execution = started_step(&repository).await;
        let err = step
            .execute(&mut step_execution, &StopToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Item(_)));
        assert_eq!(step_execution.rollback_count, 1);
    }

    #[tokio::test]
    async fn test_stop_before_first_chunk_interrupts() {
        let (repository, shared) = repo();
        let writer = CollectingItemWriter::new();
        let collected = writer.collected();
        let step = ChunkStep::<i32, i32>::builder("chunk", shared.clone(), shared)
            .reader(ListItemReader::new((1..=3).collect()))
            .writer(writer)
            .build()
            .unwrap();

        let (signal, token) = stop_channel();
        signal.stop();
        let mut step_execution = started_step(&repository).await;
        let err = step.execute(&mut step_execution, &token).await.unwrap_err();
        assert!(matches!(err, BatchError::Interrupted(_)));
        assert!(collected.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_chunks_write_every_item() {
        let (repository, shared) = repo();
        let writer = CollectingItemWriter::new();
        let collected = writer.collected();
        let step = ChunkStep::<i32, i32>::builder("chunk", shared.clone(), shared)
            .reader(ListItemReader::new((1..=20).collect()))
            .writer(writer)
            .commit_interval(3)
            .concurrent(3)
            .build()
            .unwrap();

        let mut step_execution = started_step(&repository).await;
        step.execute(&mut step_execution, &StopToken::never())
            .await
            .unwrap();

        let mut written = collected.snapshot();
        written.sort_unstable();
        assert_eq!(written, (1..=20).collect::<Vec<_>>());
        assert_eq!(step_execution.read_count, 20);
        assert_eq!(step_execution.write_count, 20);
    }

    #[test]
    fn test_build_requires_reader_and_writer() {
        let shared = Arc::new(InMemoryExecutionRepository::new());
        let missing_writer = ChunkStep::<i32, i32>::builder("chunk", shared.clone(), shared)
            .reader(ListItemReader::new(vec![1]))
            .build();
        assert!(matches!(missing_writer, Err(BatchError::Config(_))));
    }
}

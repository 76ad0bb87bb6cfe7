//! Shared fixtures: both repository implementations and scripted collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use chunkline_core::domain::{ExecutionContext, StepExecution};
use chunkline_core::port::{
    ExecutionRepository, ItemReader, ItemStream, ItemWriter, StepTransaction, Transaction,
    TransactionManager,
};
use chunkline_core::port::time_provider::SystemTimeProvider;
use chunkline_core::support::{CollectingItemWriter, ListItemReader};
use chunkline_core::{BatchError, InMemoryExecutionRepository, ItemError};
use chunkline_infra_sqlite::{create_pool, run_migrations, SqliteExecutionRepository};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("bad record {0}")]
pub struct BadRecord(pub String);

#[derive(Debug, Error)]
#[error("disk full while writing {0}")]
pub struct DiskFull(pub String);

/// One repository implementation under test
pub struct Backend {
    pub name: &'static str,
    pub repository: Arc<dyn ExecutionRepository>,
    pub transactions: Arc<dyn TransactionManager>,
    _dir: Option<TempDir>,
}

pub fn memory() -> Backend {
    let repository = Arc::new(InMemoryExecutionRepository::new());
    Backend {
        name: "memory",
        repository: repository.clone(),
        transactions: repository,
        _dir: None,
    }
}

pub async fn sqlite() -> Backend {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("batch.db").display());
    let pool = create_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let repository = Arc::new(SqliteExecutionRepository::new(
        pool,
        Arc::new(SystemTimeProvider),
    ));
    Backend {
        name: "sqlite",
        repository: repository.clone(),
        transactions: repository,
        _dir: Some(dir),
    }
}

pub async fn backends() -> Vec<Backend> {
    vec![memory(), sqlite().await]
}

pub fn items(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Reader whose listed values always fail to read
pub struct FaultyReader {
    inner: ListItemReader<String>,
    bad: Vec<String>,
}

impl FaultyReader {
    pub fn new(values: Vec<String>, bad: &[&str]) -> Self {
        Self {
            inner: ListItemReader::new(values),
            bad: items(bad),
        }
    }
}

#[async_trait]
impl ItemStream for FaultyReader {
    async fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        self.inner.open(context).await
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        self.inner.update(context).await
    }
}

#[async_trait]
impl ItemReader<String> for FaultyReader {
    async fn read(&mut self) -> Result<Option<String>, ItemError> {
        match self.inner.read().await? {
            Some(value) if self.bad.contains(&value) => Err(Box::new(BadRecord(value))),
            other => Ok(other),
        }
    }

    fn mark(&mut self) -> Result<(), ItemError> {
        self.inner.mark()
    }

    fn reset(&mut self) -> Result<(), ItemError> {
        self.inner.reset()
    }
}

/// Writer that rejects some values: `skippable` with `BadRecord` always,
/// `fatal` with `DiskFull` while armed
pub struct ScriptedWriter {
    pub inner: CollectingItemWriter<String>,
    pub skippable: Vec<String>,
    pub fatal: Vec<String>,
    pub armed: Arc<AtomicBool>,
}

impl ScriptedWriter {
    pub fn new(inner: CollectingItemWriter<String>) -> Self {
        Self {
            inner,
            skippable: Vec::new(),
            fatal: Vec::new(),
            armed: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl ItemStream for ScriptedWriter {}

#[async_trait]
impl ItemWriter<String> for ScriptedWriter {
    async fn write(&mut self, item: String) -> Result<(), ItemError> {
        if self.skippable.contains(&item) {
            return Err(Box::new(BadRecord(item)));
        }
        if self.fatal.contains(&item) && self.armed.load(Ordering::SeqCst) {
            return Err(Box::new(DiskFull(item)));
        }
        self.inner.write(item).await
    }

    async fn flush(&mut self) -> Result<(), ItemError> {
        self.inner.flush().await
    }

    fn clear(&mut self) {
        self.inner.clear()
    }
}

/// Reader that pauses before every item
pub struct SlowReader {
    inner: ListItemReader<String>,
    delay: Duration,
}

impl SlowReader {
    pub fn new(values: Vec<String>, delay: Duration) -> Self {
        Self {
            inner: ListItemReader::new(values),
            delay,
        }
    }
}

#[async_trait]
impl ItemStream for SlowReader {
    async fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        self.inner.open(context).await
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        self.inner.update(context).await
    }
}

#[async_trait]
impl ItemReader<String> for SlowReader {
    async fn read(&mut self) -> Result<Option<String>, ItemError> {
        tokio::time::sleep(self.delay).await;
        self.inner.read().await
    }

    fn mark(&mut self) -> Result<(), ItemError> {
        self.inner.mark()
    }

    fn reset(&mut self) -> Result<(), ItemError> {
        self.inner.reset()
    }
}

/// Transactions that lose the connection on commit: the work is rolled
/// back and the commit reports failure
pub struct BrokenCommits {
    pub inner: Arc<dyn TransactionManager>,
}

#[async_trait]
impl TransactionManager for BrokenCommits {
    async fn begin_transaction(&self) -> chunkline_core::Result<Box<dyn StepTransaction>> {
        let inner = self.inner.begin_transaction().await?;
        Ok(Box::new(BrokenCommit { inner }))
    }
}

struct BrokenCommit {
    inner: Box<dyn StepTransaction>,
}

#[async_trait]
impl Transaction for BrokenCommit {
    async fn commit(self: Box<Self>) -> chunkline_core::Result<()> {
        self.inner.rollback().await?;
        Err(BatchError::CommitFailed("connection reset during commit".into()))
    }

    async fn rollback(self: Box<Self>) -> chunkline_core::Result<()> {
        self.inner.rollback().await
    }
}

#[async_trait]
impl StepTransaction for BrokenCommit {
    async fn save_step_context(
        &mut self,
        step_execution: &StepExecution,
    ) -> chunkline_core::Result<()> {
        self.inner.save_step_context(step_execution).await
    }
}

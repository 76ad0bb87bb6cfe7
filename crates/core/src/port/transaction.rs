// Transaction port - chunk boundaries are begin/commit/rollback primitives

use crate::domain::StepExecution;
use crate::error::Result;
use async_trait::async_trait;

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Transaction a chunk runs in. The step checkpoint is enlisted in it so the
/// checkpoint becomes durable exactly when the chunk commits.
#[async_trait]
pub trait StepTransaction: Transaction {
    /// Persist the step's ExecutionContext (within transaction)
    async fn save_step_context(&mut self, step_execution: &StepExecution) -> Result<()>;
}

/// Transaction boundary provider
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<Box<dyn StepTransaction>>;
}

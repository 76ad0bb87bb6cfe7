// SQLite chunk transaction: the step checkpoint is written inside it

use crate::context::{write_context, ContextKind};
use crate::error::map_sqlx_error;
use async_trait::async_trait;
use chunkline_core::domain::StepExecution;
use chunkline_core::error::{BatchError, Result};
use chunkline_core::port::{StepTransaction, Transaction};
use sqlx::{Sqlite, Transaction as SqlxTransaction};

pub struct SqliteStepTransaction {
    tx: SqlxTransaction<'static, Sqlite>,
}

impl SqliteStepTransaction {
    pub fn new(tx: SqlxTransaction<'static, Sqlite>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transaction for SqliteStepTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| BatchError::CommitFailed(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl StepTransaction for SqliteStepTransaction {
    async fn save_step_context(&mut self, step_execution: &StepExecution) -> Result<()> {
        let id = step_execution.require_id()?;
        write_context(
            &mut *self.tx,
            id,
            ContextKind::Step,
            &step_execution.execution_context,
        )
        .await
    }
}

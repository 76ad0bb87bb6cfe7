// Tasklet step: one call, one transaction

use super::{Step, StepSettings};
use crate::application::stop::{InterruptionPolicy, StopToken, TokenInterruptionPolicy};
use crate::domain::{BatchStatus, ExecutionContext, ExitStatus, StepContribution, StepExecution};
use crate::error::{BatchError, ItemError, Result};
use crate::port::{ExecutionRepository, StepListener, TransactionManager};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Body of a tasklet step. Counts go into `contribution`; checkpoint state
/// into `context`. Both are kept only if the call succeeds.
#[async_trait]
pub trait Tasklet: Send + Sync {
    async fn execute(
        &self,
        contribution: &mut StepContribution,
        context: &mut ExecutionContext,
    ) -> std::result::Result<(), ItemError>;
}

pub struct TaskletStep {
    name: String,
    settings: StepSettings,
    tasklet: Arc<dyn Tasklet>,
    repository: Arc<dyn ExecutionRepository>,
    transactions: Arc<dyn TransactionManager>,
}

impl TaskletStep {
    pub fn new(
        name: impl Into<String>,
        tasklet: Arc<dyn Tasklet>,
        repository: Arc<dyn ExecutionRepository>,
        transactions: Arc<dyn TransactionManager>,
    ) -> Self {
        Self {
            name: name.into(),
            settings: StepSettings::default(),
            tasklet,
            repository,
            transactions,
        }
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
}

#[async_trait]
impl Step for TaskletStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    async fn execute(
        &self,
        step_execution: &mut StepExecution,
        stop: &StopToken,
    ) -> Result<ExitStatus> {
        TokenInterruptionPolicy::new(stop.clone()).check(step_execution)?;

        let mut transaction = self.transactions.begin_transaction().await?;
        let mut contribution = StepContribution::default();
        let mut context = step_execution.execution_context.clone();

        let outcome = self.tasklet.execute(&mut contribution, &mut context).await;
        let staged = match outcome {
            Ok(()) => {
                let mut staged = step_execution.clone();
                staged.execution_context = context;
                transaction.save_step_context(&staged).await.map(|_| staged)
            }
            Err(err) => Err(BatchError::Item(err)),
        };

        let staged = match staged {
            Ok(staged) => staged,
            Err(cause) => {
                warn!(step = %self.name, error = %cause, "Rolling back tasklet");
                step_execution.rollback_count += 1;
                if let Err(err) = transaction.rollback().await {
                    return Err(BatchError::RollbackFailed(format!(
                        "{} (while handling: {})",
                        err, cause
                    )));
                }
                return Err(cause);
            }
        };

        if let Err(err) = transaction.commit().await {
            step_execution.status = BatchStatus::Unknown;
            error!(step = %self.name, error = %err, "Tasklet commit failed; data state unknown");
            return Err(match err {
                BatchError::CommitFailed(_) => err,
                other => BatchError::CommitFailed(other.to_string()),
            });
        }

        step_execution.execution_context = staged.execution_context;
        step_execution.apply(&contribution);
        self.repository.update_step_execution(step_execution).await?;
        info!(step = %self.name, "Tasklet finished");
        Ok(ExitStatus::completed())
    }
}

// Job: an ordered list of steps and the driver that sequences them

use super::step_handler::StepHandler;
use crate::application::step::{exit_status_for_error, status_for_error, Step};
use crate::application::stop::StopToken;
use crate::domain::{BatchStatus, ExitStatus, JobExecution};
use crate::error::{BatchError, Result};
use crate::port::{Composite, ExecutionRepository, JobListener};
use std::sync::Arc;
use tracing::{error, info};

pub struct Job {
    name: String,
    restartable: bool,
    steps: Vec<Arc<dyn Step>>,
    listeners: Composite<dyn JobListener>,
}

impl Job {
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder {
            name: name.into(),
            restartable: true,
            steps: Vec::new(),
            listeners: Composite::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order against a saved, STARTING execution.
    ///
    /// The first step that does not complete ends the run. The job status is
    /// the most severe step status and the exit status combines the steps'
    /// exit statuses. `Err` means the outcome could not be persisted.
    pub async fn execute(
        &self,
        execution: &mut JobExecution,
        handler: &StepHandler,
        stop: &StopToken,
    ) -> Result<()> {
        let repository = handler.repository();
        synchronize(repository.as_ref(), execution).await?;
        if execution.status != BatchStatus::Stopping {
            execution.start(handler.now_millis())?;
            repository.update_job_execution(execution).await?;
        }
        info!(
            job = %self.name,
            job_execution_id = ?execution.id,
            parameters = %execution.job_instance.job_parameters,
            steps = ?self.step_names(),
            "Job started"
        );

        let (mut status, mut exit_status) = match self.run_steps(execution, handler, stop).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(job = %self.name, error = %err, "Job aborted");
                (status_for_error(&err), exit_status_for_error(&err))
            }
        };

        // Listeners see the provisional outcome and may amend the context
        execution.status = status;
        execution.exit_status = exit_status.clone();
        if let Err(err) = self.listeners.after_job(execution) {
            error!(job = %self.name, error = %err, "After-job listener failed");
            status = status.max(BatchStatus::Failed);
            exit_status = exit_status.and(exit_status_for_error(&err));
        }

        repository.update_job_execution_context(execution).await?;
        synchronize(repository.as_ref(), execution).await?;
        execution.finish(status, exit_status, handler.now_millis());
        repository.update_job_execution(execution).await?;
        info!(
            job = %self.name,
            job_execution_id = ?execution.id,
            status = %execution.status,
            exit_code = %execution.exit_status.exit_code,
            "Job finished"
        );
        Ok(())
    }

    async fn run_steps(
        &self,
        execution: &mut JobExecution,
        handler: &StepHandler,
        stop: &StopToken,
    ) -> Result<(BatchStatus, ExitStatus)> {
        self.listeners.before_job(execution)?;

        let mut status = BatchStatus::Completed;
        let mut exit_status = ExitStatus::completed();
        for step in &self.steps {
            synchronize(handler.repository().as_ref(), execution).await?;
            if execution.status == BatchStatus::Stopping {
                info!(job = %self.name, step = %step.name(), "Job stopping; remaining steps skipped");
                status = status.max(BatchStatus::Stopped);
                exit_status = exit_status.and(ExitStatus::stopped());
                break;
            }
            let step_execution = handler.handle_step(step.as_ref(), execution, stop).await?;
            status = status.max(step_execution.status);
            exit_status = exit_status.and(step_execution.exit_status.clone());
            if step_execution.status != BatchStatus::Completed {
                break;
            }
        }
        Ok((status, exit_status))
    }
}

/// Adopt the stored version of `execution` when someone else updated it.
///
/// The only other writer of a running execution is a stop request, so a
/// stored STOPPING status is taken over as well.
async fn synchronize(
    repository: &dyn ExecutionRepository,
    execution: &mut JobExecution,
) -> Result<()> {
    let id = execution.require_id()?;
    let Some(stored) = repository.get_job_execution(id).await? else {
        return Err(BatchError::NotFound(format!("JobExecution {}", id)));
    };
    if stored.version != execution.version {
        if stored.status == BatchStatus::Stopping && execution.status.is_running() {
            execution.status = BatchStatus::Stopping;
        }
        execution.version = stored.version;
    }
    Ok(())
}

pub struct JobBuilder {
    name: String,
    restartable: bool,
    steps: Vec<Arc<dyn Step>>,
    listeners: Composite<dyn JobListener>,
}

impl JobBuilder {
    pub fn step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// A non-restartable job runs at most once per instance
    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn JobListener>) -> Self {
        self.listeners.register(listener);
        self
    }

    pub fn build(self) -> Result<Job> {
        if self.steps.is_empty() {
            return Err(BatchError::Config(format!("Job {} has no steps", self.name)));
        }
        let mut names: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(BatchError::Config(format!(
                "Job {} has two steps named {}",
                self.name, pair[0]
            )));
        }
        Ok(Job {
            name: self.name,
            restartable: self.restartable,
            steps: self.steps,
            listeners: self.listeners,
        })
    }
}

// Step handler: restart lookup, lifecycle and persistence around Step::execute

use crate::application::step::{check_for_stop, exit_status_for_error, status_for_error, Step};
use crate::application::stop::StopToken;
use crate::domain::{BatchStatus, ExitStatus, JobExecution, StepExecution};
use crate::error::{BatchError, Result};
use crate::port::{ExecutionRepository, StepListener, TimeProvider};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runs one step of a job execution.
///
/// Before the step body runs, the previous execution of the same step in the
/// same job instance decides what happens: a completed step is skipped unless
/// it allows restart, a failed or stopped one hands its checkpoint to the new
/// execution so readers resume where they left off.
#[derive(Clone)]
pub struct StepHandler {
    repository: Arc<dyn ExecutionRepository>,
    time_provider: Arc<dyn TimeProvider>,
}

impl StepHandler {
    pub fn new(
        repository: Arc<dyn ExecutionRepository>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            repository,
            time_provider,
        }
    }

    pub fn repository(&self) -> &Arc<dyn ExecutionRepository> {
        &self.repository
    }

    pub fn now_millis(&self) -> i64 {
        self.time_provider.now_millis()
    }

    /// Run `step` within `job_execution`.
    ///
    /// Returns the step execution that represents the step in this run: the
    /// new one, or the earlier completed one when the step is not re-run.
    /// Step failures are recorded in the returned execution's status;
    /// `Err` is reserved for failures to launch the step at all.
    pub async fn handle_step(
        &self,
        step: &dyn Step,
        job_execution: &JobExecution,
        stop: &StopToken,
    ) -> Result<StepExecution> {
        let instance = &job_execution.job_instance;
        let name = step.name();
        let settings = step.settings();

        let last = self
            .repository
            .get_last_step_execution(instance, name)
            .await?;
        if let Some(last) = &last {
            if last.status == BatchStatus::Completed && !settings.allow_start_if_complete {
                info!(
                    step = %name,
                    job_instance_id = instance.id,
                    "Step already complete in this job instance; not re-running"
                );
                return Ok(last.clone());
            }
            if last.status == BatchStatus::Unknown {
                return Err(BatchError::JobRestart(format!(
                    "Cannot restart step {} from UNKNOWN status; its data state must be verified first",
                    name
                )));
            }
        }

        let count = self
            .repository
            .get_step_execution_count(instance, name)
            .await?;
        if count >= i64::from(settings.start_limit) {
            return Err(BatchError::StartLimitExceeded {
                step: name.to_string(),
                limit: settings.start_limit,
            });
        }

        let mut step_execution = job_execution.create_step_execution(name)?;
        if let Some(last) = last.filter(|l| l.status != BatchStatus::Completed) {
            info!(
                step = %name,
                previous_step_execution_id = ?last.id,
                checkpoint_keys = last.execution_context.len(),
                "Restarting step from checkpoint"
            );
            step_execution.execution_context = last.execution_context;
        }
        self.repository
            .save_step_execution(&mut step_execution)
            .await?;
        self.repository
            .update_step_execution_context(&step_execution)
            .await?;
        step_execution.start(self.now_millis())?;
        self.repository
            .update_step_execution(&mut step_execution)
            .await?;
        check_for_stop(self.repository.as_ref(), &mut step_execution).await?;

        let listeners = &settings.listeners;
        let outcome = match listeners.before_step(&mut step_execution) {
            Ok(()) => step.execute(&mut step_execution, stop).await,
            Err(err) => Err(err),
        };

        let (mut status, mut exit_status) = match outcome {
            Ok(exit_status) => (BatchStatus::Completed, exit_status),
            Err(err) => {
                if matches!(err, BatchError::Interrupted(_)) {
                    warn!(step = %name, "Step stopped");
                } else {
                    error!(step = %name, error = %err, "Step failed");
                }
                listeners.on_step_error(&step_execution, &err);
                (status_for_error(&err), exit_status_for_error(&err))
            }
        };

        if let Err(err) = listeners.after_step(&mut step_execution) {
            error!(step = %name, error = %err, "After-step listener failed");
            status = status.max(BatchStatus::Failed);
            exit_status = exit_status.and(exit_status_for_error(&err));
        }

        step_execution.finish(status, exit_status, self.now_millis());
        if let Err(err) = self.persist(&mut step_execution).await {
            // The outcome cannot be recorded; its state is unknown
            error!(step = %name, error = %err, "Failed to persist step outcome");
            step_execution.status = BatchStatus::Unknown;
            step_execution.exit_status = ExitStatus::unknown().with_description(err.describe());
        }
        Ok(step_execution)
    }

    async fn persist(&self, step_execution: &mut StepExecution) -> Result<()> {
        self.repository
            .update_step_execution_context(step_execution)
            .await?;
        self.repository.update_step_execution(step_execution).await
    }
}

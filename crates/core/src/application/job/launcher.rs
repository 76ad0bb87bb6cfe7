// Job launcher: create the execution, run the job, report the outcome

use super::driver::Job;
use super::step_handler::StepHandler;
use crate::application::stop::{stop_channel, StopSignal, StopToken};
use crate::domain::{BatchStatus, ExecutionId, JobExecution, JobParameters};
use crate::error::{BatchError, Result};
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{ExecutionRepository, TimeProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

/// Entry point for running jobs.
///
/// Launch failures (`JobExecutionAlreadyRunning`, `JobRestart`,
/// `JobInstanceAlreadyComplete`) are returned before any step runs. A job that
/// ends FAILED or UNKNOWN is reported as `BatchError::JobFailed`, which carries
/// the terminal execution.
#[derive(Clone)]
pub struct JobLauncher {
    repository: Arc<dyn ExecutionRepository>,
    time_provider: Arc<dyn TimeProvider>,
    running: Arc<Mutex<HashMap<ExecutionId, StopSignal>>>,
}

impl JobLauncher {
    pub fn new(repository: Arc<dyn ExecutionRepository>) -> Self {
        Self {
            repository,
            time_provider: Arc::new(SystemTimeProvider),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    /// Run `job` to completion
    pub async fn run(&self, job: &Job, parameters: &JobParameters) -> Result<JobExecution> {
        let execution = self.create(job, parameters).await?;
        let token = self.register(&execution)?;
        self.drive(job, execution, token).await
    }

    /// Start `job` on a tokio task; returns the STARTING execution at once
    pub async fn spawn(
        &self,
        job: Arc<Job>,
        parameters: &JobParameters,
    ) -> Result<(JobExecution, JoinHandle<Result<JobExecution>>)> {
        let execution = self.create(&job, parameters).await?;
        let token = self.register(&execution)?;
        let launcher = self.clone();
        let started = execution.clone();
        let handle = tokio::spawn(async move { launcher.drive(&job, execution, token).await });
        Ok((started, handle))
    }

    /// Request a cooperative stop.
    ///
    /// A job running in this launcher is signalled and stops at its next chunk
    /// boundary. Otherwise the stored execution is marked STOPPING, and the
    /// launcher running it stops at its next chunk or step boundary.
    pub async fn stop(&self, execution_id: ExecutionId) -> Result<()> {
        let signalled = match self.lock().get(&execution_id) {
            Some(signal) => {
                signal.stop();
                true
            }
            None => false,
        };
        if signalled {
            info!(job_execution_id = execution_id, "Stop signalled to running job");
            return Ok(());
        }

        let mut execution = self
            .repository
            .get_job_execution(execution_id)
            .await?
            .ok_or_else(|| BatchError::NotFound(format!("JobExecution {}", execution_id)))?;
        execution.request_stop()?;
        self.repository.update_job_execution(&mut execution).await?;
        info!(job_execution_id = execution_id, "Stored job execution marked STOPPING");
        Ok(())
    }

    /// Executions currently running in this launcher
    pub fn running_executions(&self) -> Vec<ExecutionId> {
        self.lock().keys().copied().collect()
    }

    async fn create(&self, job: &Job, parameters: &JobParameters) -> Result<JobExecution> {
        self.check_unknown_steps(job, parameters).await?;
        let execution = self
            .repository
            .create_job_execution(job.name(), job.is_restartable(), parameters)
            .await?;
        info!(
            job = %job.name(),
            job_execution_id = ?execution.id,
            job_instance_id = execution.job_instance.id,
            "Job execution created"
        );
        Ok(execution)
    }

    /// A step the last execution left UNKNOWN blocks any restart of the instance
    async fn check_unknown_steps(&self, job: &Job, parameters: &JobParameters) -> Result<()> {
        let Some(instance) = self
            .repository
            .get_job_instance(job.name(), parameters)
            .await?
        else {
            return Ok(());
        };
        let Some(last) = self.repository.get_last_job_execution(&instance).await? else {
            return Ok(());
        };
        if last.is_running() {
            return Ok(());
        }
        let steps = self
            .repository
            .get_step_executions(last.require_id()?)
            .await?;
        match steps.iter().find(|s| s.status == BatchStatus::Unknown) {
            Some(unknown) => Err(BatchError::JobRestart(format!(
                "Cannot restart step {} of {} from UNKNOWN status; its data state must be verified first",
                unknown.step_name, instance
            ))),
            None => Ok(()),
        }
    }

    fn register(&self, execution: &JobExecution) -> Result<StopToken> {
        let (signal, token) = stop_channel();
        self.lock().insert(execution.require_id()?, signal);
        Ok(token)
    }

    async fn drive(
        &self,
        job: &Job,
        mut execution: JobExecution,
        token: StopToken,
    ) -> Result<JobExecution> {
        let id = execution.require_id()?;
        let handler = StepHandler::new(self.repository.clone(), self.time_provider.clone());
        let outcome = job.execute(&mut execution, &handler, &token).await;
        self.lock().remove(&id);
        outcome?;

        match execution.status {
            BatchStatus::Failed | BatchStatus::Unknown => Err(BatchError::JobFailed {
                id,
                status: execution.status,
                cause: execution.exit_status.exit_description.clone(),
                execution: Box::new(execution),
            }),
            _ => Ok(execution),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ExecutionId, StopSignal>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

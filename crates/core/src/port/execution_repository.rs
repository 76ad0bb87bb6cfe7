// Execution Repository Port (Interface)

use crate::domain::{
    BatchStatus, ExecutionId, JobExecution, JobInstance, JobParameters, StepExecution,
};
use crate::error::{BatchError, Result};
use async_trait::async_trait;

/// Durable store for job instances, executions and their checkpoints.
///
/// The only component shared across concurrent job executions. Every update
/// carries the version the caller last read; a mismatch fails with
/// `BatchError::OptimisticLockingFailure` and nothing is written.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Create (and save) a new JobExecution for the instance identified by
    /// `(job_name, parameters)`, creating the instance on first launch.
    ///
    /// # Errors
    /// - `JobExecutionAlreadyRunning` if the instance has a non-terminal execution
    /// - `JobRestart` if the instance exists and the job is not restartable
    /// - `JobInstanceAlreadyComplete` if the instance's last execution completed
    ///
    /// The running check and the insert are atomic across callers.
    async fn create_job_execution(
        &self,
        job_name: &str,
        restartable: bool,
        parameters: &JobParameters,
    ) -> Result<JobExecution>;

    /// Insert a new execution; assigns id and version 0
    async fn save_job_execution(&self, execution: &mut JobExecution) -> Result<()>;

    /// Update status/timestamps/exit status; bumps the version
    async fn update_job_execution(&self, execution: &mut JobExecution) -> Result<()>;

    /// Insert a new step execution; the owning JobExecution must exist
    async fn save_step_execution(&self, step_execution: &mut StepExecution) -> Result<()>;

    /// Update status/counters/exit status; bumps the version
    async fn update_step_execution(&self, step_execution: &mut StepExecution) -> Result<()>;

    /// Persist the job checkpoint independently of status updates
    async fn update_job_execution_context(&self, execution: &JobExecution) -> Result<()>;

    /// Persist the step checkpoint independently of counter updates
    async fn update_step_execution_context(&self, step_execution: &StepExecution) -> Result<()>;

    /// Most recent step execution for `(instance, step_name)` across all job executions
    async fn get_last_step_execution(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>>;

    /// Number of step executions for `(instance, step_name)`
    async fn get_step_execution_count(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> Result<i64>;

    /// All executions of an instance, most recent first
    async fn find_job_executions(&self, job_instance: &JobInstance) -> Result<Vec<JobExecution>>;

    async fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>>;

    async fn get_job_execution(&self, id: ExecutionId) -> Result<Option<JobExecution>>;

    /// Step executions of one job execution, in creation order
    async fn get_step_executions(&self, job_execution_id: ExecutionId)
        -> Result<Vec<StepExecution>>;

    async fn get_last_job_execution(
        &self,
        job_instance: &JobInstance,
    ) -> Result<Option<JobExecution>> {
        Ok(self
            .find_job_executions(job_instance)
            .await?
            .into_iter()
            .next())
    }
}

/// Launch rules for an existing instance, given its executions. Repositories
/// apply them inside the atomic section of `create_job_execution`.
pub fn check_launch(
    instance: &JobInstance,
    restartable: bool,
    executions: &[JobExecution],
) -> Result<()> {
    if let Some(running) = executions.iter().find(|e| e.status.is_running()) {
        return Err(BatchError::JobExecutionAlreadyRunning(format!(
            "{} has execution {:?} in status {}",
            instance, running.id, running.status
        )));
    }
    if !restartable && !executions.is_empty() {
        return Err(BatchError::JobRestart(format!(
            "{} already ran and the job is not restartable",
            instance
        )));
    }
    let last = executions
        .iter()
        .max_by_key(|e| (e.create_time, e.id));
    if last.is_some_and(|e| e.status == BatchStatus::Completed) {
        return Err(BatchError::JobInstanceAlreadyComplete(format!(
            "{} completed; use different parameters to run again",
            instance
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(id: ExecutionId, create_time: i64, status: BatchStatus) -> JobExecution {
        let instance = JobInstance::new(1, "import", JobParameters::new());
        let mut execution = JobExecution::new(instance, create_time);
        execution.id = Some(id);
        execution.status = status;
        execution
    }

    #[test]
    fn test_launch_refused_when_last_execution_completed() {
        let instance = JobInstance::new(1, "import", JobParameters::new());
        let executions = vec![
            execution(2, 200, BatchStatus::Completed),
            execution(1, 100, BatchStatus::Failed),
        ];
        assert!(matches!(
            check_launch(&instance, true, &executions),
            Err(BatchError::JobInstanceAlreadyComplete(_))
        ));
    }

    #[test]
    fn test_launch_decided_by_last_execution_only() {
        let instance = JobInstance::new(1, "import", JobParameters::new());
        // An older COMPLETED execution does not block a restart once a later
        // one has failed
        let executions = vec![
            execution(1, 100, BatchStatus::Completed),
            execution(2, 200, BatchStatus::Failed),
        ];
        assert!(check_launch(&instance, true, &executions).is_ok());
    }

    #[test]
    fn test_launch_refused_while_running() {
        let instance = JobInstance::new(1, "import", JobParameters::new());
        let executions = vec![execution(3, 300, BatchStatus::Stopping)];
        assert!(matches!(
            check_launch(&instance, true, &executions),
            Err(BatchError::JobExecutionAlreadyRunning(_))
        ));
        assert!(check_launch(&instance, true, &[]).is_ok());
    }

    #[test]
    fn test_non_restartable_instance_refused() {
        let instance = JobInstance::new(1, "import", JobParameters::new());
        let executions = vec![execution(1, 100, BatchStatus::Failed)];
        assert!(matches!(
            check_launch(&instance, false, &executions),
            Err(BatchError::JobRestart(_))
        ));
    }
}

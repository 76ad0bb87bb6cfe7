// Job / Step Execution Domain Model

use crate::domain::context::ExecutionContext;
use crate::domain::error::{DomainError, Result};
use crate::domain::parameters::JobParameters;
use crate::domain::status::{BatchStatus, ExitStatus};
use serde::{Deserialize, Serialize};

/// Surrogate id assigned by the repository
pub type ExecutionId = i64;

/// Identity unit: (job name, job parameters). Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: ExecutionId,
    pub job_name: String,
    pub job_parameters: JobParameters,
    pub version: i32,
}

impl JobInstance {
    pub fn new(id: ExecutionId, job_name: impl Into<String>, job_parameters: JobParameters) -> Self {
        Self {
            id,
            job_name: job_name.into(),
            job_parameters,
            version: 0,
        }
    }
}

impl std::fmt::Display for JobInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "JobInstance[id={}, job={}, parameters={}]",
            self.id, self.job_name, self.job_parameters
        )
    }
}

/// One attempt to run a JobInstance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    /// None until saved by a repository
    pub id: Option<ExecutionId>,
    pub job_instance: JobInstance,
    pub status: BatchStatus,

    pub create_time: i64, // epoch ms
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub last_updated: Option<i64>,

    pub exit_status: ExitStatus,
    /// Optimistic-lock version, incremented by every persisted update
    pub version: i32,
    pub execution_context: ExecutionContext,
}

impl JobExecution {
    pub fn new(job_instance: JobInstance, create_time: i64) -> Self {
        Self {
            id: None,
            job_instance,
            status: BatchStatus::Starting,
            create_time,
            start_time: None,
            end_time: None,
            last_updated: None,
            exit_status: ExitStatus::unknown(),
            version: 0,
            execution_context: ExecutionContext::new(),
        }
    }

    /// Id of a persisted execution
    pub fn require_id(&self) -> Result<ExecutionId> {
        self.id.ok_or_else(|| {
            DomainError::ValidationError(format!(
                "JobExecution for {} has not been saved",
                self.job_instance.job_name
            ))
        })
    }

    pub fn job_name(&self) -> &str {
        &self.job_instance.job_name
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// STARTING -> STARTED
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        if self.status != BatchStatus::Starting {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: BatchStatus::Started.to_string(),
            });
        }
        self.status = BatchStatus::Started;
        self.start_time = Some(now_millis);
        self.exit_status = ExitStatus::executing();
        Ok(())
    }

    /// Request a cooperative stop; only running executions can be stopped
    pub fn request_stop(&mut self) -> Result<()> {
        if !self.status.is_running() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: BatchStatus::Stopping.to_string(),
            });
        }
        self.status = BatchStatus::Stopping;
        Ok(())
    }

    /// Move to a terminal status with explicit timestamp
    pub fn finish(&mut self, status: BatchStatus, exit_status: ExitStatus, now_millis: i64) {
        self.status = status;
        self.exit_status = exit_status;
        self.end_time = Some(now_millis);
    }

    /// New step execution owned by this job execution
    pub fn create_step_execution(&self, step_name: impl Into<String>) -> Result<StepExecution> {
        let id = self.require_id()?;
        Ok(StepExecution::new(step_name, id, self.job_instance.id))
    }
}

/// Per-chunk counter deltas; folded into the StepExecution only on commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepContribution {
    pub read_count: i64,
    pub write_count: i64,
    pub filter_count: i64,
    pub read_skip_count: i64,
    pub process_skip_count: i64,
    pub write_skip_count: i64,
}

impl StepContribution {
    pub fn skip_count(&self) -> i64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }
}

/// One attempt to run a step within a JobExecution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Option<ExecutionId>,
    pub job_execution_id: ExecutionId,
    pub job_instance_id: ExecutionId,
    pub step_name: String,
    pub status: BatchStatus,

    pub read_count: i64,
    pub write_count: i64,
    pub commit_count: i64,
    pub rollback_count: i64,
    pub read_skip_count: i64,
    pub process_skip_count: i64,
    pub write_skip_count: i64,
    pub filter_count: i64,

    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub last_updated: Option<i64>,

    pub exit_status: ExitStatus,
    pub version: i32,
    pub execution_context: ExecutionContext,

    /// Set when a stop has been requested for this step
    #[serde(default)]
    pub terminate_only: bool,
}

impl StepExecution {
    pub fn new(
        step_name: impl Into<String>,
        job_execution_id: ExecutionId,
        job_instance_id: ExecutionId,
    ) -> Self {
        Self {
            id: None,
            job_execution_id,
            job_instance_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            read_count: 0,
            write_count: 0,
            commit_count: 0,
            rollback_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            filter_count: 0,
            start_time: None,
            end_time: None,
            last_updated: None,
            exit_status: ExitStatus::executing(),
            version: 0,
            execution_context: ExecutionContext::new(),
            terminate_only: false,
        }
    }

    pub fn require_id(&self) -> Result<ExecutionId> {
        self.id.ok_or_else(|| {
            DomainError::ValidationError(format!(
                "StepExecution {} has not been saved",
                self.step_name
            ))
        })
    }

    pub fn skip_count(&self) -> i64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Fold a committed chunk's contribution into the durable counters
    pub fn apply(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.read_skip_count += contribution.read_skip_count;
        self.process_skip_count += contribution.process_skip_count;
        self.write_skip_count += contribution.write_skip_count;
        self.commit_count += 1;
    }

    /// Every item read was written, filtered or skipped after the read
    pub fn is_balanced(&self) -> bool {
        self.read_count
            == self.write_count + self.write_skip_count + self.filter_count + self.process_skip_count
    }

    /// STARTING -> STARTED
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        if self.status != BatchStatus::Starting {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: BatchStatus::Started.to_string(),
            });
        }
        self.status = BatchStatus::Started;
        self.start_time = Some(now_millis);
        Ok(())
    }

    pub fn finish(&mut self, status: BatchStatus, exit_status: ExitStatus, now_millis: i64) {
        self.status = status;
        self.exit_status = exit_status;
        self.end_time = Some(now_millis);
    }
}

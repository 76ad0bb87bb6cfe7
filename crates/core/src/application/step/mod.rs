// Step abstraction: one execution contract, two variants (chunk and tasklet)

pub mod chunk;
mod items;
pub mod tasklet;

use crate::application::stop::StopToken;
use crate::domain::{BatchStatus, ExitStatus, StepExecution};
use crate::error::{BatchError, Result};
use crate::port::{Composite, ExecutionRepository, StepListener};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub use chunk::{ChunkStep, ChunkStepBuilder, PassThroughProcessor};
pub use tasklet::{Tasklet, TaskletStep};

/// Restart and lifecycle settings shared by every step kind
#[derive(Clone)]
pub struct StepSettings {
    /// Re-run the step on restart even if its last execution completed
    pub allow_start_if_complete: bool,
    /// Maximum executions of this step per job instance
    pub start_limit: u32,
    pub listeners: Composite<dyn StepListener>,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            allow_start_if_complete: false,
            start_limit: u32::MAX,
            listeners: Composite::new(),
        }
    }
}

impl StepSettings {
    pub fn register_listener(&mut self, listener: Arc<dyn StepListener>) {
        self.listeners.register(listener);
    }
}

/// A unit of work within a job.
///
/// `execute` runs the step body against an already persisted, STARTED
/// execution and returns its exit status. Lifecycle (restart lookup,
/// listeners, final persistence) is handled by the job's step handler.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn settings(&self) -> &StepSettings;

    async fn execute(
        &self,
        step_execution: &mut StepExecution,
        stop: &StopToken,
    ) -> Result<ExitStatus>;
}

/// Terminal status for a step that failed with `error`
pub fn status_for_error(error: &BatchError) -> BatchStatus {
    match error {
        BatchError::Interrupted(_) => BatchStatus::Stopped,
        e if e.leaves_unknown_state() => BatchStatus::Unknown,
        _ => BatchStatus::Failed,
    }
}

/// Flag `step_execution` terminate-only once its job execution is STOPPING
/// in the repository. A stop requested through another launcher only reaches
/// the running step this way.
pub(crate) async fn check_for_stop(
    repository: &dyn ExecutionRepository,
    step_execution: &mut StepExecution,
) -> Result<()> {
    if step_execution.terminate_only {
        return Ok(());
    }
    let stored = repository
        .get_job_execution(step_execution.job_execution_id)
        .await?;
    if stored.is_some_and(|job| job.status == BatchStatus::Stopping) {
        info!(
            step = %step_execution.step_name,
            job_execution_id = step_execution.job_execution_id,
            "Job execution is stopping; step ends at the next boundary"
        );
        step_execution.terminate_only = true;
    }
    Ok(())
}

/// Exit status recorded for a step that failed with `error`
pub fn exit_status_for_error(error: &BatchError) -> ExitStatus {
    let base = match status_for_error(error) {
        BatchStatus::Stopped => ExitStatus::stopped(),
        BatchStatus::Unknown => ExitStatus::unknown(),
        _ => ExitStatus::failed(),
    };
    base.with_description(error.describe())
}

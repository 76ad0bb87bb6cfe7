// Line-copy job wiring

use crate::config::RunnerConfig;
use crate::lines::{Line, LineFileReader, LineFileWriter, MalformedLine, NormalizeLine};
use chunkline_core::application::classify::{ErrorMatcher, LimitCheckingSkipPolicy};
use chunkline_core::application::{ChunkStep, Job};
use chunkline_core::domain::JobParameters;
use chunkline_core::port::{ExecutionRepository, TransactionManager};
use chunkline_core::Result;
use std::sync::Arc;

pub const STEP_NAME: &str = "copy-lines";

/// Identifying parameters: the two files, plus the optional run id
pub fn job_parameters(config: &RunnerConfig) -> JobParameters {
    let parameters = JobParameters::new()
        .with_string("input", config.input.clone())
        .with_string("output", config.output.clone());
    match &config.run_id {
        Some(run_id) => parameters.with_string("run.id", run_id.clone()),
        None => parameters,
    }
}

/// Single chunk step: read lines, normalize, append to the output file.
/// Malformed lines are skipped up to the configured limit.
pub fn build_job<R>(config: &RunnerConfig, repository: Arc<R>) -> Result<Job>
where
    R: ExecutionRepository + TransactionManager + 'static,
{
    let skip_policy = LimitCheckingSkipPolicy::new(config.skip_limit)
        .skip(ErrorMatcher::of::<MalformedLine>());

    let step = ChunkStep::<Line, String>::builder_with_processor(
        STEP_NAME,
        repository.clone(),
        repository,
        Arc::new(NormalizeLine),
    )
    .reader(LineFileReader::new(&config.input))
    .writer(LineFileWriter::new(&config.output))
    .commit_interval(config.commit_interval)
    .skip_policy(Arc::new(skip_policy))
    .build()?;

    Job::builder(config.job_name.clone())
        .step(Arc::new(step))
        .build()
}

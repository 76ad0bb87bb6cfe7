//! Chunkline Runner - Main Entry Point
//! Launches one line-copy job against a SQLite job repository

mod config;
mod job;
mod lines;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chunkline_core::application::JobLauncher;
use chunkline_core::port::time_provider::SystemTimeProvider;
use chunkline_core::BatchError;
use chunkline_infra_sqlite::{create_pool, run_migrations, SqliteExecutionRepository};
use config::RunnerConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let log_format = std::env::var("CHUNKLINE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("chunkline=info"))
        .map_err(|e| anyhow::anyhow!("Invalid log filter: {}", e))?;

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Chunkline runner v{} starting...", VERSION);

    // 2. Load configuration
    let config = RunnerConfig::from_env()?;
    info!(
        db_path = %config.db_path,
        input = %config.input,
        output = %config.output,
        job = %config.job_name,
        commit_interval = config.commit_interval,
        skip_limit = config.skip_limit,
        "Configuration loaded"
    );

    // 3. Initialize database
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let pool = create_pool(&config.database_url())
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Wire repository, job and launcher
    let repository = Arc::new(SqliteExecutionRepository::new(
        pool,
        Arc::new(SystemTimeProvider),
    ));
    let job = Arc::new(
        job::build_job(&config, repository.clone())
            .map_err(|e| anyhow::anyhow!("Job configuration failed: {}", e))?,
    );
    let launcher = JobLauncher::new(repository);

    // 5. Launch; Ctrl+C requests a cooperative stop at the next chunk boundary
    let (started, mut handle) = launcher
        .spawn(job, &job::job_parameters(&config))
        .await
        .map_err(|e| anyhow::anyhow!("Launch failed: {}", e))?;
    let execution_id = started.require_id()?;
    info!(job_execution_id = execution_id, "Job launched. Press Ctrl+C to stop");

    let outcome = tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            warn!(job_execution_id = execution_id, "Stop requested");
            if let Err(e) = launcher.stop(execution_id).await {
                // Usually the job finished first
                warn!(job_execution_id = execution_id, error = %e, "Stop request not delivered");
            }
            handle.await?
        }
    };

    // 6. Report
    match outcome {
        Ok(execution) => {
            info!(
                job_execution_id = execution_id,
                status = %execution.status,
                exit_code = %execution.exit_status.exit_code,
                "Job finished"
            );
            Ok(())
        }
        Err(BatchError::JobFailed { status, cause, .. }) => {
            error!(job_execution_id = execution_id, status = %status, cause = %cause, "Job failed");
            Err(anyhow::anyhow!("Job execution {} ended {}: {}", execution_id, status, cause))
        }
        Err(e) => Err(e.into()),
    }
}

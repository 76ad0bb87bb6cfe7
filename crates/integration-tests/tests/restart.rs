//! Restart semantics: resume from the last committed chunk, refuse reuse of
//! non-restartable instances

mod common;

use chunkline_core::application::{ChunkStep, Job, JobLauncher};
use chunkline_core::domain::{BatchStatus, JobParameters};
use chunkline_core::support::{CollectingItemWriter, ListItemReader};
use chunkline_core::BatchError;
use common::{backends, items, Backend, ScriptedWriter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn numbers() -> Vec<String> {
    (1..=10).map(|n| n.to_string()).collect()
}

fn load_job(backend: &Backend, writer: ScriptedWriter, restartable: bool) -> Job {
    let step = ChunkStep::<String, String>::builder(
        "load",
        backend.repository.clone(),
        backend.transactions.clone(),
    )
    .reader(ListItemReader::new(numbers()))
    .writer(writer)
    .commit_interval(3)
    .build()
    .unwrap();
    Job::builder("numbers")
        .step(Arc::new(step))
        .restartable(restartable)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_restart_processes_remaining_items_once() {
    for backend in backends().await {
        let collecting = CollectingItemWriter::new();
        let collected = collecting.collected();
        let armed = Arc::new(AtomicBool::new(true));
        let mut writer = ScriptedWriter::new(collecting);
        writer.fatal = items(&["7"]);
        writer.armed = armed.clone();

        let job = load_job(&backend, writer, true);
        let launcher = JobLauncher::new(backend.repository.clone());
        let parameters = JobParameters::new().with_long("run", 1);

        let failed = match launcher.run(&job, &parameters).await {
            Err(BatchError::JobFailed { execution, .. }) => *execution,
            other => panic!("[{}] expected JobFailed, got {:?}", backend.name, other.is_ok()),
        };
        assert_eq!(failed.status, BatchStatus::Failed, "[{}]", backend.name);
        let first = backend
            .repository
            .get_step_executions(failed.id.unwrap())
            .await
            .unwrap();
        assert_eq!(first[0].commit_count, 2, "[{}]", backend.name);
        assert_eq!(first[0].write_count, 6, "[{}]", backend.name);
        assert_eq!(first[0].rollback_count, 1, "[{}]", backend.name);
        assert_eq!(collected.len(), 6, "[{}]", backend.name);

        armed.store(false, Ordering::SeqCst);
        let completed = launcher.run(&job, &parameters).await.unwrap();
        assert_eq!(completed.status, BatchStatus::Completed, "[{}]", backend.name);
        assert_eq!(
            completed.job_instance.id, failed.job_instance.id,
            "[{}] restart must reuse the instance",
            backend.name
        );

        let second = backend
            .repository
            .get_step_executions(completed.id.unwrap())
            .await
            .unwrap();
        assert_eq!(second[0].read_count, 4, "[{}]", backend.name);
        assert_eq!(
            first[0].write_count + second[0].write_count,
            10,
            "[{}]",
            backend.name
        );
        assert_eq!(collected.snapshot(), numbers(), "[{}]", backend.name);
    }
}

#[tokio::test]
async fn test_non_restartable_instance_cannot_run_again() {
    for backend in backends().await {
        let job = load_job(
            &backend,
            ScriptedWriter::new(CollectingItemWriter::new()),
            false,
        );
        let launcher = JobLauncher::new(backend.repository.clone());
        let parameters = JobParameters::new().with_string("file", "numbers.txt");

        let execution = launcher.run(&job, &parameters).await.unwrap();
        assert_eq!(execution.status, BatchStatus::Completed, "[{}]", backend.name);

        let again = launcher.run(&job, &parameters).await;
        assert!(
            matches!(again, Err(BatchError::JobRestart(_))),
            "[{}] expected JobRestart",
            backend.name
        );

        // Different identifying parameters make a new instance
        let other = JobParameters::new().with_string("file", "other.txt");
        assert!(launcher.run(&job, &other).await.is_ok(), "[{}]", backend.name);
    }
}

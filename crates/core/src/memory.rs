// In-process execution repository (non-durable), for tests and embedded use

use crate::application::constants::MAX_EXIT_DESCRIPTION_LENGTH;
use crate::domain::{
    ExecutionContext, ExecutionId, JobExecution, JobInstance, JobParameters, StepExecution,
};
use crate::error::{BatchError, Result};
use crate::port::execution_repository::check_launch;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{
    ExecutionRepository, StepTransaction, TimeProvider, Transaction, TransactionManager,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Default)]
struct Store {
    last_id: ExecutionId,
    instances: BTreeMap<ExecutionId, JobInstance>,
    instance_keys: HashMap<(String, String), ExecutionId>,
    job_executions: BTreeMap<ExecutionId, JobExecution>,
    job_contexts: HashMap<ExecutionId, ExecutionContext>,
    step_executions: BTreeMap<ExecutionId, StepExecution>,
    step_contexts: HashMap<ExecutionId, ExecutionContext>,
}

impl Store {
    fn next_id(&mut self) -> ExecutionId {
        self.last_id += 1;
        self.last_id
    }

    fn executions_of(&self, instance_id: ExecutionId) -> Vec<JobExecution> {
        let mut executions: Vec<JobExecution> = self
            .job_executions
            .values()
            .filter(|e| e.job_instance.id == instance_id)
            .map(|e| self.hydrate_job(e))
            .collect();
        executions.sort_by(|a, b| (b.create_time, b.id).cmp(&(a.create_time, a.id)));
        executions
    }

    fn hydrate_job(&self, execution: &JobExecution) -> JobExecution {
        let mut execution = execution.clone();
        execution.execution_context = execution
            .id
            .and_then(|id| self.job_contexts.get(&id).cloned())
            .unwrap_or_default();
        execution
    }

    fn hydrate_step(&self, step_execution: &StepExecution) -> StepExecution {
        let mut step_execution = step_execution.clone();
        step_execution.execution_context = step_execution
            .id
            .and_then(|id| self.step_contexts.get(&id).cloned())
            .unwrap_or_default();
        step_execution
    }
}

/// Non-durable [`ExecutionRepository`] guarded by one mutex.
///
/// Cloning yields another handle to the same store. It is also a
/// [`TransactionManager`] whose transactions stage step checkpoints and apply
/// them on commit.
#[derive(Clone)]
pub struct InMemoryExecutionRepository {
    store: Arc<Mutex<Store>>,
    time_provider: Arc<dyn TimeProvider>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::with_time_provider(Arc::new(SystemTimeProvider))
    }

    pub fn with_time_provider(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            time_provider,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        lock_store(&self.store)
    }
}

impl Default for InMemoryExecutionRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_store(store: &Mutex<Store>) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn stale(kind: &str, id: ExecutionId, expected: i32, found: i32) -> BatchError {
    BatchError::OptimisticLockingFailure(format!(
        "{} {} has version {} but update carried version {}",
        kind, id, found, expected
    ))
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create_job_execution(
        &self,
        job_name: &str,
        restartable: bool,
        parameters: &JobParameters,
    ) -> Result<JobExecution> {
        let now = self.time_provider.now_millis();
        let mut store = self.lock();
        let key = (job_name.to_string(), parameters.signature());

        let instance = match store.instance_keys.get(&key).copied() {
            Some(instance_id) => {
                let instance = store
                    .instances
                    .get(&instance_id)
                    .cloned()
                    .ok_or_else(|| BatchError::NotFound(format!("JobInstance {}", instance_id)))?;
                check_launch(&instance, restartable, &store.executions_of(instance_id))?;
                instance
            }
            None => {
                let id = store.next_id();
                let instance = JobInstance::new(id, job_name, parameters.clone());
                store.instances.insert(id, instance.clone());
                store.instance_keys.insert(key, id);
                instance
            }
        };

        let mut execution = JobExecution::new(instance, now);
        let id = store.next_id();
        execution.id = Some(id);
        execution.last_updated = Some(now);
        store.job_executions.insert(id, execution.clone());
        store
            .job_contexts
            .insert(id, execution.execution_context.clone());
        debug!(job = %job_name, job_execution_id = id, "Created job execution");
        Ok(execution)
    }

    async fn save_job_execution(&self, execution: &mut JobExecution) -> Result<()> {
        if execution.id.is_some() {
            return Err(BatchError::Validation(
                "JobExecution already saved; use update".to_string(),
            ));
        }
        let now = self.time_provider.now_millis();
        let mut store = self.lock();
        if !store.instances.contains_key(&execution.job_instance.id) {
            return Err(BatchError::NotFound(format!(
                "JobInstance {}",
                execution.job_instance.id
            )));
        }
        let id = store.next_id();
        execution.id = Some(id);
        execution.version = 0;
        execution.last_updated = Some(now);
        let mut stored = execution.clone();
        stored.exit_status = stored.exit_status.truncated(MAX_EXIT_DESCRIPTION_LENGTH);
        store.job_executions.insert(id, stored);
        store
            .job_contexts
            .insert(id, execution.execution_context.clone());
        Ok(())
    }

    async fn update_job_execution(&self, execution: &mut JobExecution) -> Result<()> {
        let id = execution.require_id()?;
        let now = self.time_provider.now_millis();
        let mut store = self.lock();
        let current = store
            .job_executions
            .get(&id)
            .ok_or_else(|| BatchError::NotFound(format!("JobExecution {}", id)))?;
        if current.version != execution.version {
            return Err(stale("JobExecution", id, execution.version, current.version));
        }
        execution.version += 1;
        execution.last_updated = Some(now);
        let mut stored = execution.clone();
        stored.exit_status = stored.exit_status.truncated(MAX_EXIT_DESCRIPTION_LENGTH);
        store.job_executions.insert(id, stored);
        Ok(())
    }

    async fn save_step_execution(&self, step_execution: &mut StepExecution) -> Result<()> {
        if step_execution.id.is_some() {
            return Err(BatchError::Validation(
                "StepExecution already saved; use update".to_string(),
            ));
        }
        let now = self.time_provider.now_millis();
        let mut store = self.lock();
        if !store
            .job_executions
            .contains_key(&step_execution.job_execution_id)
        {
            return Err(BatchError::NotFound(format!(
                "JobExecution {} owning step {}",
                step_execution.job_execution_id, step_execution.step_name
            )));
        }
        let id = store.next_id();
        step_execution.id = Some(id);
        step_execution.version = 0;
        step_execution.last_updated = Some(now);
        let mut stored = step_execution.clone();
        stored.exit_status = stored.exit_status.truncated(MAX_EXIT_DESCRIPTION_LENGTH);
        store.step_executions.insert(id, stored);
        store
            .step_contexts
            .insert(id, step_execution.execution_context.clone());
        Ok(())
    }

    async fn update_step_execution(&self, step_execution: &mut StepExecution) -> Result<()> {
        let id = step_execution.require_id()?;
        let now = self.time_provider.now_millis();
        let mut store = self.lock();
        let current = store
            .step_executions
            .get(&id)
            .ok_or_else(|| BatchError::NotFound(format!("StepExecution {}", id)))?;
        if current.version != step_execution.version {
            return Err(stale(
                "StepExecution",
                id,
                step_execution.version,
                current.version,
            ));
        }
        step_execution.version += 1;
        step_execution.last_updated = Some(now);
        let mut stored = step_execution.clone();
        stored.exit_status = stored.exit_status.truncated(MAX_EXIT_DESCRIPTION_LENGTH);
        store.step_executions.insert(id, stored);
        Ok(())
    }

    async fn update_job_execution_context(&self, execution: &JobExecution) -> Result<()> {
        let id = execution.require_id()?;
        let mut store = self.lock();
        if !store.job_executions.contains_key(&id) {
            return Err(BatchError::NotFound(format!("JobExecution {}", id)));
        }
        store
            .job_contexts
            .insert(id, execution.execution_context.clone());
        Ok(())
    }

    async fn update_step_execution_context(&self, step_execution: &StepExecution) -> Result<()> {
        let id = step_execution.require_id()?;
        let mut store = self.lock();
        if !store.step_executions.contains_key(&id) {
            return Err(BatchError::NotFound(format!("StepExecution {}", id)));
        }
        store
            .step_contexts
            .insert(id, step_execution.execution_context.clone());
        Ok(())
    }

    async fn get_last_step_execution(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>> {
        let store = self.lock();
        Ok(store
            .step_executions
            .values()
            .filter(|s| s.job_instance_id == job_instance.id && s.step_name == step_name)
            .max_by_key(|s| s.id)
            .map(|s| store.hydrate_step(s)))
    }

    async fn get_step_execution_count(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> Result<i64> {
        let store = self.lock();
        Ok(store
            .step_executions
            .values()
            .filter(|s| s.job_instance_id == job_instance.id && s.step_name == step_name)
            .count() as i64)
    }

    async fn find_job_executions(&self, job_instance: &JobInstance) -> Result<Vec<JobExecution>> {
        Ok(self.lock().executions_of(job_instance.id))
    }

    async fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>> {
        let store = self.lock();
        let key = (job_name.to_string(), parameters.signature());
        Ok(store
            .instance_keys
            .get(&key)
            .and_then(|id| store.instances.get(id))
            .cloned())
    }

    async fn get_job_execution(&self, id: ExecutionId) -> Result<Option<JobExecution>> {
        let store = self.lock();
        Ok(store.job_executions.get(&id).map(|e| store.hydrate_job(e)))
    }

    async fn get_step_executions(
        &self,
        job_execution_id: ExecutionId,
    ) -> Result<Vec<StepExecution>> {
        let store = self.lock();
        Ok(store
            .step_executions
            .values()
            .filter(|s| s.job_execution_id == job_execution_id)
            .map(|s| store.hydrate_step(s))
            .collect())
    }
}

struct InMemoryTransaction {
    store: Arc<Mutex<Store>>,
    staged: Vec<(ExecutionId, ExecutionContext)>,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let mut store = lock_store(&self.store);
        for (id, _) in &self.staged {
            if !store.step_executions.contains_key(id) {
                return Err(BatchError::CommitFailed(format!(
                    "StepExecution {} no longer exists",
                    id
                )));
            }
        }
        for (id, context) in self.staged {
            store.step_contexts.insert(id, context);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl StepTransaction for InMemoryTransaction {
    async fn save_step_context(&mut self, step_execution: &StepExecution) -> Result<()> {
        let id = step_execution.require_id()?;
        self.staged
            .push((id, step_execution.execution_context.clone()));
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for InMemoryExecutionRepository {
    async fn begin_transaction(&self) -> Result<Box<dyn StepTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            store: self.store.clone(),
            staged: Vec::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchStatus, ExitStatus};
    use crate::port::time_provider::SteppingTimeProvider;

    fn repository() -> InMemoryExecutionRepository {
        InMemoryExecutionRepository::with_time_provider(Arc::new(SteppingTimeProvider::new(
            1_000, 10,
        )))
    }

    fn params(run: i64) -> JobParameters {
        JobParameters::new().with_long("run", run)
    }

    async fn finish(
        repo: &InMemoryExecutionRepository,
        execution: &mut JobExecution,
        status: BatchStatus,
    ) {
        execution.start(1).unwrap();
        execution.finish(status, ExitStatus::from(status), 2);
        repo.update_job_execution(execution).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_rejects_running_instance() {
        let repo = repository();
        let first = repo.create_job_execution("import", true, &params(1)).await.unwrap();
        assert_eq!(first.status, BatchStatus::Starting);

        let err = repo
            .create_job_execution("import", true, &params(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::JobExecutionAlreadyRunning(_)));

        // Different parameters identify a different instance
        repo.create_job_execution("import", true, &params(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_rules() {
        let repo = repository();
        let mut first = repo.create_job_execution("import", true, &params(1)).await.unwrap();
        finish(&repo, &mut first, BatchStatus::Failed).await;

        let mut second = repo.create_job_execution("import", true, &params(1)).await.unwrap();
        assert_eq!(second.job_instance.id, first.job_instance.id);
        finish(&repo, &mut second, BatchStatus::Completed).await;

        let err = repo
            .create_job_execution("import", true, &params(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::JobInstanceAlreadyComplete(_)));

        let executions = repo.find_job_executions(&first.job_instance).await.unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].id, second.id, "most recent first");
        let last = repo.get_last_job_execution(&first.job_instance).await.unwrap();
        assert_eq!(last.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_non_restartable_instance_cannot_rerun() {
        let repo = repository();
        let mut first = repo.create_job_execution("once", false, &params(1)).await.unwrap();
        finish(&repo, &mut first, BatchStatus::Failed).await;

        let err = repo
            .create_job_execution("once", false, &params(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::JobRestart(_)));
    }

    #[tokio::test]
    async fn test_step_execution_optimistic_locking() {
        let repo = repository();
        let job = repo.create_job_execution("import", true, &params(1)).await.unwrap();
        let mut step = job.create_step_execution("load").unwrap();
        repo.save_step_execution(&mut step).await.unwrap();
        assert_eq!(step.version, 0);

        let mut stale_copy = step.clone();
        step.read_count = 5;
        repo.update_step_execution(&mut step).await.unwrap();
        assert_eq!(step.version, 1);

        let err = repo.update_step_execution(&mut stale_copy).await.unwrap_err();
        assert!(matches!(err, BatchError::OptimisticLockingFailure(_)));
        assert_eq!(stale_copy.version, 0);

        let stored = repo.get_step_executions(job.id.unwrap()).await.unwrap();
        assert_eq!(stored[0].read_count, 5);
        assert_eq!(stored[0].version, 1);
    }

    #[tokio::test]
    async fn test_save_step_requires_persisted_job() {
        let repo = repository();
        let mut orphan = StepExecution::new("load", 999, 1);
        assert!(matches!(
            repo.save_step_execution(&mut orphan).await,
            Err(BatchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_transaction_applies_checkpoint_only_on_commit() {
        let repo = repository();
        let job = repo.create_job_execution("import", true, &params(1)).await.unwrap();
        let mut step = job.create_step_execution("load").unwrap();
        repo.save_step_execution(&mut step).await.unwrap();

        step.execution_context.put_long("offset", 3);
        let mut rolled_back = repo.begin_transaction().await.unwrap();
        rolled_back.save_step_context(&step).await.unwrap();
        rolled_back.rollback().await.unwrap();
        let last = repo
            .get_last_step_execution(&job.job_instance, "load")
            .await
            .unwrap()
            .unwrap();
        assert!(last.execution_context.is_empty());

        let mut committed = repo.begin_transaction().await.unwrap();
        committed.save_step_context(&step).await.unwrap();
        committed.commit().await.unwrap();
        let last = repo
            .get_last_step_execution(&job.job_instance, "load")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.execution_context.get_long("offset").unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_exit_description_truncated_on_write() {
        let repo = repository();
        let mut job = repo.create_job_execution("import", true, &params(1)).await.unwrap();
        job.exit_status = ExitStatus::failed().with_description("x".repeat(5000));
        repo.update_job_execution(&mut job).await.unwrap();
        assert_eq!(job.exit_status.exit_description.len(), 5000);

        let stored = repo.get_job_execution(job.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(
            stored.exit_status.exit_description.len(),
            MAX_EXIT_DESCRIPTION_LENGTH
        );
    }
}

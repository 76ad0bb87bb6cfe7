// SQLite ExecutionRepository Implementation

use crate::context::{load_context, write_context, ContextKind};
use crate::error::{is_foreign_key_violation, is_unique_violation, map_sqlx_error};
use crate::transaction::SqliteStepTransaction;
use async_trait::async_trait;
use chunkline_core::application::constants::MAX_EXIT_DESCRIPTION_LENGTH;
use chunkline_core::domain::{
    BatchStatus, ExecutionContext, ExecutionId, ExitStatus, JobExecution, JobInstance,
    JobParameters, StepExecution,
};
use chunkline_core::error::{BatchError, Result};
use chunkline_core::port::execution_repository::check_launch;
use chunkline_core::port::{ExecutionRepository, StepTransaction, TimeProvider, TransactionManager};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;

const JOB_EXECUTION_SELECT: &str = r#"
    SELECT e.id, e.job_instance_id, i.job_name, i.parameters, i.version AS instance_version,
           e.status, e.create_time, e.start_time, e.end_time, e.last_updated,
           e.exit_code, e.exit_description, e.version
    FROM job_execution e
    JOIN job_instance i ON i.id = e.job_instance_id
"#;

const STEP_EXECUTION_SELECT: &str = r#"
    SELECT id, job_execution_id, job_instance_id, step_name, status,
           read_count, write_count, commit_count, rollback_count,
           read_skip_count, process_skip_count, write_skip_count, filter_count,
           start_time, end_time, last_updated, exit_code, exit_description,
           terminate_only, version
    FROM step_execution
"#;

/// Durable repository backed by SQLite.
///
/// `create_job_execution` runs in one write transaction and a partial unique
/// index admits a single running execution per instance, so concurrent
/// launchers sharing the database file cannot both start the same instance.
#[derive(Clone)]
pub struct SqliteExecutionRepository {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn connection(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.pool.acquire().await.map_err(map_sqlx_error)
    }

    /// Executions of an instance, most recent first, optionally with contexts
    async fn fetch_job_executions(
        conn: &mut SqliteConnection,
        job_instance_id: ExecutionId,
        with_context: bool,
    ) -> Result<Vec<JobExecution>> {
        let rows: Vec<JobExecutionRow> = sqlx::query_as(&format!(
            "{} WHERE e.job_instance_id = ? ORDER BY e.create_time DESC, e.id DESC",
            JOB_EXECUTION_SELECT
        ))
        .bind(job_instance_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in rows {
            let context = if with_context {
                load_context(&mut *conn, row.id, ContextKind::Job).await?
            } else {
                ExecutionContext::new()
            };
            executions.push(row.into_execution(context)?);
        }
        Ok(executions)
    }

    /// Distinguish a stale version from a missing row after a 0-row update
    async fn version_conflict(
        &self,
        table: &'static str,
        id: ExecutionId,
        expected: i32,
    ) -> BatchError {
        let found: std::result::Result<Option<i32>, sqlx::Error> =
            sqlx::query_scalar(&format!("SELECT version FROM {} WHERE id = ?", table))
                .bind(id)
                .fetch_optional(&self.pool)
                .await;
        match found {
            Ok(Some(version)) => BatchError::OptimisticLockingFailure(format!(
                "{} {} has version {} but update carried version {}",
                table, id, version, expected
            )),
            Ok(None) => BatchError::NotFound(format!("{} {}", table, id)),
            Err(err) => map_sqlx_error(err),
        }
    }

    async fn ensure_exists(&self, table: &'static str, id: ExecutionId) -> Result<()> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE id = ?", table))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if count == 0 {
            return Err(BatchError::NotFound(format!("{} {}", table, id)));
        }
        Ok(())
    }

    async fn replace_context(
        &self,
        id: ExecutionId,
        kind: ContextKind,
        context: &ExecutionContext,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        write_context(&mut *tx, id, kind, context).await?;
        tx.commit().await.map_err(map_sqlx_error)
    }
}

fn already_running(err: sqlx::Error, instance: &JobInstance) -> BatchError {
    if is_unique_violation(&err) {
        BatchError::JobExecutionAlreadyRunning(format!(
            "{} already has a running execution",
            instance
        ))
    } else {
        map_sqlx_error(err)
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_job_execution(
        &self,
        job_name: &str,
        restartable: bool,
        parameters: &JobParameters,
    ) -> Result<JobExecution> {
        let now = self.time_provider.now_millis();
        let job_key = parameters.signature();
        let parameters_json = serde_json::to_string(parameters)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Writing first takes the database write lock for the whole check-and-insert
        sqlx::query(
            r#"
            INSERT INTO job_instance (job_name, job_key, parameters, version)
            VALUES (?, ?, ?, 0)
            ON CONFLICT (job_name, job_key) DO NOTHING
            "#,
        )
        .bind(job_name)
        .bind(&job_key)
        .bind(&parameters_json)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let instance: JobInstanceRow = sqlx::query_as(
            "SELECT id, job_name, parameters, version FROM job_instance WHERE job_name = ? AND job_key = ?",
        )
        .bind(job_name)
        .bind(&job_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let instance = instance.into_instance()?;

        let executions = Self::fetch_job_executions(&mut *tx, instance.id, false).await?;
        check_launch(&instance, restartable, &executions)?;

        let mut execution = JobExecution::new(instance, now);
        execution.last_updated = Some(now);
        let result = sqlx::query(
            r#"
            INSERT INTO job_execution (
                job_instance_id, status, create_time, last_updated,
                exit_code, exit_description, version
            ) VALUES (?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(execution.job_instance.id)
        .bind(execution.status.as_str())
        .bind(execution.create_time)
        .bind(execution.last_updated)
        .bind(&execution.exit_status.exit_code)
        .bind(&execution.exit_status.exit_description)
        .execute(&mut *tx)
        .await
        .map_err(|e| already_running(e, &execution.job_instance))?;

        tx.commit().await.map_err(map_sqlx_error)?;
        execution.id = Some(result.last_insert_rowid());
        debug!(
            job = %job_name,
            job_execution_id = ?execution.id,
            job_instance_id = execution.job_instance.id,
            "Created job execution"
        );
        Ok(execution)
    }

    async fn save_job_execution(&self, execution: &mut JobExecution) -> Result<()> {
        if execution.id.is_some() {
            return Err(BatchError::Validation(
                "JobExecution already saved; use update".to_string(),
            ));
        }
        let now = self.time_provider.now_millis();
        let exit_status = execution.exit_status.truncated(MAX_EXIT_DESCRIPTION_LENGTH);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let result = sqlx::query(
            r#"
            INSERT INTO job_execution (
                job_instance_id, status, create_time, start_time, end_time, last_updated,
                exit_code, exit_description, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(execution.job_instance.id)
        .bind(execution.status.as_str())
        .bind(execution.create_time)
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(now)
        .bind(&exit_status.exit_code)
        .bind(&exit_status.exit_description)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                BatchError::NotFound(format!("JobInstance {}", execution.job_instance.id))
            } else {
                already_running(e, &execution.job_instance)
            }
        })?;
        let id = result.last_insert_rowid();
        write_context(&mut *tx, id, ContextKind::Job, &execution.execution_context).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        execution.id = Some(id);
        execution.version = 0;
        execution.last_updated = Some(now);
        Ok(())
    }

    async fn update_job_execution(&self, execution: &mut JobExecution) -> Result<()> {
        let id = execution.require_id()?;
        let now = self.time_provider.now_millis();
        let exit_status = execution.exit_status.truncated(MAX_EXIT_DESCRIPTION_LENGTH);

        let result = sqlx::query(
            r#"
            UPDATE job_execution
            SET status = ?, start_time = ?, end_time = ?, last_updated = ?,
                exit_code = ?, exit_description = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(execution.status.as_str())
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(now)
        .bind(&exit_status.exit_code)
        .bind(&exit_status.exit_description)
        .bind(id)
        .bind(execution.version)
        .execute(&self.pool)
        .await
        .map_err(|e| already_running(e, &execution.job_instance))?;

        if result.rows_affected() == 0 {
            return Err(self
                .version_conflict("job_execution", id, execution.version)
                .await);
        }
        execution.version += 1;
        execution.last_updated = Some(now);
        Ok(())
    }

    async fn save_step_execution(&self, step_execution: &mut StepExecution) -> Result<()> {
        if step_execution.id.is_some() {
            return Err(BatchError::Validation(
                "StepExecution already saved; use update".to_string(),
            ));
        }
        let now = self.time_provider.now_millis();
        let exit_status = step_execution
            .exit_status
            .truncated(MAX_EXIT_DESCRIPTION_LENGTH);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let result = sqlx::query(
            r#"
            INSERT INTO step_execution (
                job_execution_id, job_instance_id, step_name, status,
                read_count, write_count, commit_count, rollback_count,
                read_skip_count, process_skip_count, write_skip_count, filter_count,
                start_time, end_time, last_updated, exit_code, exit_description,
                terminate_only, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(step_execution.job_execution_id)
        .bind(step_execution.job_instance_id)
        .bind(&step_execution.step_name)
        .bind(step_execution.status.as_str())
        .bind(step_execution.read_count)
        .bind(step_execution.write_count)
        .bind(step_execution.commit_count)
        .bind(step_execution.rollback_count)
        .bind(step_execution.read_skip_count)
        .bind(step_execution.process_skip_count)
        .bind(step_execution.write_skip_count)
        .bind(step_execution.filter_count)
        .bind(step_execution.start_time)
        .bind(step_execution.end_time)
        .bind(now)
        .bind(&exit_status.exit_code)
        .bind(&exit_status.exit_description)
        .bind(if step_execution.terminate_only { 1 } else { 0 })
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                BatchError::NotFound(format!(
                    "JobExecution {} owning step {}",
                    step_execution.job_execution_id, step_execution.step_name
                ))
            } else {
                map_sqlx_error(e)
            }
        })?;
        let id = result.last_insert_rowid();
        write_context(
            &mut *tx,
            id,
            ContextKind::Step,
            &step_execution.execution_context,
        )
        .await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        step_execution.id = Some(id);
        step_execution.version = 0;
        step_execution.last_updated = Some(now);
        Ok(())
    }

    async fn update_step_execution(&self, step_execution: &mut StepExecution) -> Result<()> {
        let id = step_execution.require_id()?;
        let now = self.time_provider.now_millis();
        let exit_status = step_execution
            .exit_status
            .truncated(MAX_EXIT_DESCRIPTION_LENGTH);

        let result = sqlx::query(
            r#"
            UPDATE step_execution
            SET status = ?, read_count = ?, write_count = ?, commit_count = ?,
                rollback_count = ?, read_skip_count = ?, process_skip_count = ?,
                write_skip_count = ?, filter_count = ?, start_time = ?, end_time = ?,
                last_updated = ?, exit_code = ?, exit_description = ?,
                terminate_only = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(step_execution.status.as_str())
        .bind(step_execution.read_count)
        .bind(step_execution.write_count)
        .bind(step_execution.commit_count)
        .bind(step_execution.rollback_count)
        .bind(step_execution.read_skip_count)
        .bind(step_execution.process_skip_count)
        .bind(step_execution.write_skip_count)
        .bind(step_execution.filter_count)
        .bind(step_execution.start_time)
        .bind(step_execution.end_time)
        .bind(now)
        .bind(&exit_status.exit_code)
        .bind(&exit_status.exit_description)
        .bind(if step_execution.terminate_only { 1 } else { 0 })
        .bind(id)
        .bind(step_execution.version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self
                .version_conflict("step_execution", id, step_execution.version)
                .await);
        }
        step_execution.version += 1;
        step_execution.last_updated = Some(now);
        Ok(())
    }

    async fn update_job_execution_context(&self, execution: &JobExecution) -> Result<()> {
        let id = execution.require_id()?;
        self.ensure_exists("job_execution", id).await?;
        self.replace_context(id, ContextKind::Job, &execution.execution_context)
            .await
    }

    async fn update_step_execution_context(&self, step_execution: &StepExecution) -> Result<()> {
        let id = step_execution.require_id()?;
        self.ensure_exists("step_execution", id).await?;
        self.replace_context(id, ContextKind::Step, &step_execution.execution_context)
            .await
    }

    async fn get_last_step_execution(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>> {
        let mut conn = self.connection().await?;
        let row: Option<StepExecutionRow> = sqlx::query_as(&format!(
            "{} WHERE job_instance_id = ? AND step_name = ? ORDER BY id DESC LIMIT 1",
            STEP_EXECUTION_SELECT
        ))
        .bind(job_instance.id)
        .bind(step_name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                let context = load_context(&mut *conn, row.id, ContextKind::Step).await?;
                Ok(Some(row.into_step_execution(context)))
            }
            None => Ok(None),
        }
    }

    async fn get_step_execution_count(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM step_execution WHERE job_instance_id = ? AND step_name = ?",
        )
        .bind(job_instance.id)
        .bind(step_name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_job_executions(&self, job_instance: &JobInstance) -> Result<Vec<JobExecution>> {
        let mut conn = self.connection().await?;
        Self::fetch_job_executions(&mut *conn, job_instance.id, true).await
    }

    async fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>> {
        let row: Option<JobInstanceRow> = sqlx::query_as(
            "SELECT id, job_name, parameters, version FROM job_instance WHERE job_name = ? AND job_key = ?",
        )
        .bind(job_name)
        .bind(parameters.signature())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(JobInstanceRow::into_instance).transpose()
    }

    async fn get_job_execution(&self, id: ExecutionId) -> Result<Option<JobExecution>> {
        let mut conn = self.connection().await?;
        let row: Option<JobExecutionRow> =
            sqlx::query_as(&format!("{} WHERE e.id = ?", JOB_EXECUTION_SELECT))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                let context = load_context(&mut *conn, row.id, ContextKind::Job).await?;
                Ok(Some(row.into_execution(context)?))
            }
            None => Ok(None),
        }
    }

    async fn get_step_executions(
        &self,
        job_execution_id: ExecutionId,
    ) -> Result<Vec<StepExecution>> {
        let mut conn = self.connection().await?;
        let rows: Vec<StepExecutionRow> = sqlx::query_as(&format!(
            "{} WHERE job_execution_id = ? ORDER BY id",
            STEP_EXECUTION_SELECT
        ))
        .bind(job_execution_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        let mut step_executions = Vec::with_capacity(rows.len());
        for row in rows {
            let context = load_context(&mut *conn, row.id, ContextKind::Step).await?;
            step_executions.push(row.into_step_execution(context));
        }
        Ok(step_executions)
    }
}

#[async_trait]
impl TransactionManager for SqliteExecutionRepository {
    async fn begin_transaction(&self) -> Result<Box<dyn StepTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqliteStepTransaction::new(tx)))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobInstanceRow {
    id: i64,
    job_name: String,
    parameters: String,
    version: i32,
}

impl JobInstanceRow {
    fn into_instance(self) -> Result<JobInstance> {
        let parameters: JobParameters = serde_json::from_str(&self.parameters)?;
        let mut instance = JobInstance::new(self.id, self.job_name, parameters);
        instance.version = self.version;
        Ok(instance)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobExecutionRow {
    id: i64,
    job_instance_id: i64,
    job_name: String,
    parameters: String,
    instance_version: i32,
    status: String,
    create_time: i64,
    start_time: Option<i64>,
    end_time: Option<i64>,
    last_updated: Option<i64>,
    exit_code: String,
    exit_description: String,
    version: i32,
}

impl JobExecutionRow {
    fn into_execution(self, execution_context: ExecutionContext) -> Result<JobExecution> {
        let instance = JobInstanceRow {
            id: self.job_instance_id,
            job_name: self.job_name,
            parameters: self.parameters,
            version: self.instance_version,
        }
        .into_instance()?;

        Ok(JobExecution {
            id: Some(self.id),
            job_instance: instance,
            status: BatchStatus::parse(&self.status),
            create_time: self.create_time,
            start_time: self.start_time,
            end_time: self.end_time,
            last_updated: self.last_updated,
            exit_status: ExitStatus::new(self.exit_code).with_description(self.exit_description),
            version: self.version,
            execution_context,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StepExecutionRow {
    id: i64,
    job_execution_id: i64,
    job_instance_id: i64,
    step_name: String,
    status: String,
    read_count: i64,
    write_count: i64,
    commit_count: i64,
    rollback_count: i64,
    read_skip_count: i64,
    process_skip_count: i64,
    write_skip_count: i64,
    filter_count: i64,
    start_time: Option<i64>,
    end_time: Option<i64>,
    last_updated: Option<i64>,
    exit_code: String,
    exit_description: String,
    terminate_only: i64,
    version: i32,
}

impl StepExecutionRow {
    fn into_step_execution(self, execution_context: ExecutionContext) -> StepExecution {
        StepExecution {
            id: Some(self.id),
            job_execution_id: self.job_execution_id,
            job_instance_id: self.job_instance_id,
            step_name: self.step_name,
            status: BatchStatus::parse(&self.status),
            read_count: self.read_count,
            write_count: self.write_count,
            commit_count: self.commit_count,
            rollback_count: self.rollback_count,
            read_skip_count: self.read_skip_count,
            process_skip_count: self.process_skip_count,
            write_skip_count: self.write_skip_count,
            filter_count: self.filter_count,
            start_time: self.start_time,
            end_time: self.end_time,
            last_updated: self.last_updated,
            exit_status: ExitStatus::new(self.exit_code).with_description(self.exit_description),
            version: self.version,
            execution_context,
            terminate_only: self.terminate_only != 0,
        }
    }
}

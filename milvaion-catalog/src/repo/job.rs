use crate::error::{CatalogError, CatalogResult};
use crate::pool::CatalogPool;
use crate::rows::JobRow;
use async_trait::async_trait;
use milvaion_common::model::{Job, JobId, Schedule};
use std::sync::Arc;

/// Persistence for job definitions: creation, lookup, optimistic-versioned updates
/// and the auto-disable bookkeeping that rides along with status reports.
#[async_trait]
pub trait JobRepo: Send + Sync {
    async fn create(&self, job: &Job) -> CatalogResult<()>;
    async fn get(&self, id: JobId) -> CatalogResult<Job>;
    async fn find(&self, id: JobId) -> CatalogResult<Option<Job>>;
    async fn list_schedulable(&self) -> CatalogResult<Vec<Job>>;
    async fn list_all(&self) -> CatalogResult<Vec<Job>>;

    /// Applies an edit to a job, bumping its version. Returns `Ok(None)` if `expected_version`
    /// no longer matches what is stored, signalling the caller should reload and retry.
    async fn update_if_version(
        &self,
        id: JobId,
        expected_version: i64,
        edit: JobEdit,
    ) -> CatalogResult<Option<Job>>;

    async fn record_auto_disable_outcome(
        &self,
        id: JobId,
        consecutive_failure_count: u32,
        last_failure_time: Option<chrono::DateTime<chrono::Utc>>,
        disabled_at: Option<chrono::DateTime<chrono::Utc>>,
        deactivate: bool,
    ) -> CatalogResult<()>;

    async fn reset_auto_disable_state(&self, id: JobId) -> CatalogResult<()>;
}

/// A partial update to a job's mutable fields. `None` leaves a field unchanged.
#[derive(Debug, Default, Clone)]
pub struct JobEdit {
    pub description: Option<Option<String>>,
    pub schedule: Option<Schedule>,
    pub is_active: Option<bool>,
    pub concurrent_policy: Option<milvaion_common::model::ConcurrentPolicy>,
    pub execution_timeout_seconds: Option<Option<i64>>,
    pub zombie_timeout_minutes: Option<Option<i64>>,
}

pub struct PostgresJobRepo {
    pool: CatalogPool,
}

impl PostgresJobRepo {
    pub fn new(pool: CatalogPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl JobRepo for PostgresJobRepo {
    async fn create(&self, job: &Job) -> CatalogResult<()> {
        let (cron_expression, execute_at) = match &job.schedule {
            Schedule::Cron(expr) => (Some(expr.clone()), None),
            Schedule::Once(at) => (None, Some(*at)),
        };
        let tags = serde_json::to_value(job.tags.iter().collect::<Vec<_>>())
            .map_err(|e| CatalogError::Database(sqlx::Error::Decode(Box::new(e))))?;
        sqlx::query(
            r#"
            insert into jobs (
                id, name, description, tags, owner_user, worker_class, job_kind, job_data,
                cron_expression, execute_at, is_active, concurrent_policy,
                execution_timeout_seconds, zombie_timeout_minutes, version, created_at, updated_at,
                auto_disable_enabled, auto_disable_threshold, auto_disable_window_minutes,
                consecutive_failure_count, last_failure_time, disabled_at
            ) values (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21, $22, $23
            )
            "#,
        )
        .bind(job.id.0)
        .bind(&job.name)
        .bind(&job.description)
        .bind(tags)
        .bind(&job.owner_user)
        .bind(&job.worker_class)
        .bind(&job.job_kind)
        .bind(&job.job_data)
        .bind(cron_expression)
        .bind(execute_at)
        .bind(job.is_active)
        .bind(job.concurrent_policy as i16)
        .bind(job.execution_timeout_seconds)
        .bind(job.zombie_timeout_minutes)
        .bind(job.version)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.auto_disable_config.enabled)
        .bind(job.auto_disable_config.threshold as i32)
        .bind(job.auto_disable_config.window_minutes)
        .bind(job.auto_disable_state.consecutive_failure_count as i32)
        .bind(job.auto_disable_state.last_failure_time)
        .bind(job.auto_disable_state.disabled_at)
        .execute(self.pool.raw())
        .await?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> CatalogResult<Job> {
        self.find(id).await?.ok_or(CatalogError::JobNotFound(id))
    }

    async fn find(&self, id: JobId) -> CatalogResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("select * from jobs where id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.raw())
            .await?;
        Ok(row.map(Job::from))
    }

    async fn list_schedulable(&self) -> CatalogResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "select * from jobs where is_active and disabled_at is null",
        )
        .fetch_all(self.pool.raw())
        .await?;
        Ok(rows.into_iter().map(Job::from).collect())
    }

    async fn list_all(&self) -> CatalogResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>("select * from jobs order by created_at")
            .fetch_all(self.pool.raw())
            .await?;
        Ok(rows.into_iter().map(Job::from).collect())
    }

    async fn update_if_version(
        &self,
        id: JobId,
        expected_version: i64,
        edit: JobEdit,
    ) -> CatalogResult<Option<Job>> {
        let mut tx = self.pool.raw().begin().await?;
        let current = sqlx::query_as::<_, JobRow>("select * from jobs where id = $1 for update")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(current) = current else {
            return Err(CatalogError::JobNotFound(id));
        };
        if current.version != expected_version {
            return Ok(None);
        }
        let mut job = Job::from(current);
        if let Some(description) = edit.description {
            job.description = description;
        }
        if let Some(schedule) = edit.schedule {
            job.schedule = schedule;
        }
        if let Some(is_active) = edit.is_active {
            job.is_active = is_active;
        }
        if let Some(policy) = edit.concurrent_policy {
            job.concurrent_policy = policy;
        }
        if let Some(timeout) = edit.execution_timeout_seconds {
            job.execution_timeout_seconds = timeout;
        }
        if let Some(timeout) = edit.zombie_timeout_minutes {
            job.zombie_timeout_minutes = timeout;
        }
        job.version += 1;
        job.updated_at = chrono::Utc::now();

        let (cron_expression, execute_at) = match &job.schedule {
            Schedule::Cron(expr) => (Some(expr.clone()), None),
            Schedule::Once(at) => (None, Some(*at)),
        };
        sqlx::query(
            r#"
            update jobs set
                description = $2,
                cron_expression = $3, execute_at = $4, is_active = $5, concurrent_policy = $6,
                execution_timeout_seconds = $7, zombie_timeout_minutes = $8, version = $9,
                updated_at = $10
            where id = $1
            "#,
        )
        .bind(id.0)
        .bind(&job.description)
        .bind(cron_expression)
        .bind(execute_at)
        .bind(job.is_active)
        .bind(job.concurrent_policy as i16)
        .bind(job.execution_timeout_seconds)
        .bind(job.zombie_timeout_minutes)
        .bind(job.version)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(job))
    }

    async fn record_auto_disable_outcome(
        &self,
        id: JobId,
        consecutive_failure_count: u32,
        last_failure_time: Option<chrono::DateTime<chrono::Utc>>,
        disabled_at: Option<chrono::DateTime<chrono::Utc>>,
        deactivate: bool,
    ) -> CatalogResult<()> {
        sqlx::query(
            r#"
            update jobs set
                consecutive_failure_count = $2,
                last_failure_time = $3,
                disabled_at = $4,
                is_active = case when $5 then false else is_active end,
                updated_at = now()
            where id = $1
            "#,
        )
        .bind(id.0)
        .bind(consecutive_failure_count as i32)
        .bind(last_failure_time)
        .bind(disabled_at)
        .bind(deactivate)
        .execute(self.pool.raw())
        .await?;
        Ok(())
    }

    async fn reset_auto_disable_state(&self, id: JobId) -> CatalogResult<()> {
        sqlx::query(
            r#"
            update jobs set
                consecutive_failure_count = 0,
                last_failure_time = null,
                updated_at = now()
            where id = $1
            "#,
        )
        .bind(id.0)
        .execute(self.pool.raw())
        .await?;
        Ok(())
    }
}

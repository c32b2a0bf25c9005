use crate::error::{CatalogError, CatalogResult};
use crate::pool::CatalogPool;
use crate::rows::{status_to_i16, OccurrenceRow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use milvaion_common::model::{
    JobId, LogEntry, Occurrence, OccurrenceId, OccurrenceStatus, StatusChange, WorkerInstanceId,
};
use std::sync::Arc;

/// Persistence for occurrences: the append-mostly execution records a Dispatcher
/// creates and workers report back against.
#[async_trait]
pub trait OccurrenceRepo: Send + Sync {
    async fn insert_queued(
        &self,
        job_id: JobId,
        job_version: i64,
        job_name: &str,
    ) -> CatalogResult<Occurrence>;

    async fn get(&self, id: OccurrenceId) -> CatalogResult<Occurrence>;
    async fn find(&self, id: OccurrenceId) -> CatalogResult<Option<Occurrence>>;

    /// Validates `self.status -> new_status` via [`OccurrenceStatus::can_transition_to`] and,
    /// if allowed, applies the report in one transaction: status, worker fields, result/exception,
    /// heartbeat, and an appended [`StatusChange`] row. Returns `Ok(None)` if the transition is
    /// illegal (stale or duplicate report).
    async fn apply_status_report(&self, report: StatusReport) -> CatalogResult<Option<Occurrence>>;

    async fn append_log(
        &self,
        id: OccurrenceId,
        entry: LogEntry,
        max_count: usize,
    ) -> CatalogResult<()>;

    async fn heartbeat(&self, id: OccurrenceId, at: DateTime<Utc>) -> CatalogResult<()>;

    /// Non-terminal occurrences whose effective timeout (the job's configured
    /// `zombieTimeoutMinutes`, falling back to the detector's default) has elapsed.
    async fn find_stale_nonterminal(
        &self,
        default_timeout: Duration,
    ) -> CatalogResult<Vec<Occurrence>>;

    /// Occurrences still `Queued` older than `grace`, used by startup recovery to find
    /// dispatches that may never have reached the bus.
    async fn find_stuck_queued(&self, grace: Duration) -> CatalogResult<Vec<Occurrence>>;

    async fn count_running_for_job(&self, job_id: JobId) -> CatalogResult<i64>;

    /// Terminally-failed occurrences (Failed/TimedOut/Unknown) that ended within
    /// `lookback` of now and have not yet been recorded in `failed_occurrences`.
    async fn find_unrecorded_failures(&self, lookback: Duration) -> CatalogResult<Vec<Occurrence>>;
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub occurrence_id: OccurrenceId,
    pub new_status: OccurrenceStatus,
    pub worker_instance_id: Option<WorkerInstanceId>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub exception: Option<String>,
    pub reason: String,
}

pub struct PostgresOccurrenceRepo {
    pool: CatalogPool,
}

impl PostgresOccurrenceRepo {
    pub fn new(pool: CatalogPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl OccurrenceRepo for PostgresOccurrenceRepo {
    async fn insert_queued(
        &self,
        job_id: JobId,
        job_version: i64,
        job_name: &str,
    ) -> CatalogResult<Occurrence> {
        let occurrence = Occurrence {
            id: OccurrenceId::new(),
            job_id,
            job_version,
            job_name: job_name.to_string(),
            worker_instance_id: None,
            status: OccurrenceStatus::Queued,
            start_time: None,
            end_time: None,
            duration_ms: None,
            result: None,
            exception: None,
            logs: vec![],
            status_change_log: vec![StatusChange {
                from: None,
                to: OccurrenceStatus::Queued,
                timestamp: Utc::now(),
                reason: "dispatched".to_string(),
            }],
            retry_count: 0,
            last_heartbeat: None,
            created_at: Utc::now(),
        };
        sqlx::query(
            r#"
            insert into occurrences (
                id, job_id, job_version, job_name, worker_instance_id, status, start_time,
                end_time, duration_ms, result, exception, logs, status_change_log, retry_count,
                last_heartbeat, created_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(occurrence.id.0)
        .bind(occurrence.job_id.0)
        .bind(occurrence.job_version)
        .bind(&occurrence.job_name)
        .bind(occurrence.worker_instance_id.as_ref().map(|w| w.0.clone()))
        .bind(status_to_i16(occurrence.status))
        .bind(occurrence.start_time)
        .bind(occurrence.end_time)
        .bind(occurrence.duration_ms)
        .bind(&occurrence.result)
        .bind(&occurrence.exception)
        .bind(serde_json::to_value(&occurrence.logs).unwrap())
        .bind(serde_json::to_value(&occurrence.status_change_log).unwrap())
        .bind(occurrence.retry_count)
        .bind(occurrence.last_heartbeat)
        .bind(occurrence.created_at)
        .execute(self.pool.raw())
        .await?;
        Ok(occurrence)
    }

    async fn get(&self, id: OccurrenceId) -> CatalogResult<Occurrence> {
        self.find(id)
            .await?
            .ok_or(CatalogError::OccurrenceNotFound(id))
    }

    async fn find(&self, id: OccurrenceId) -> CatalogResult<Option<Occurrence>> {
        let row = sqlx::query_as::<_, OccurrenceRow>("select * from occurrences where id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.raw())
            .await?;
        Ok(row.map(Occurrence::from))
    }

    async fn apply_status_report(&self, report: StatusReport) -> CatalogResult<Option<Occurrence>> {
        let mut tx = self.pool.raw().begin().await?;
        let row = sqlx::query_as::<_, OccurrenceRow>(
            "select * from occurrences where id = $1 for update",
        )
        .bind(report.occurrence_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Err(CatalogError::OccurrenceNotFound(report.occurrence_id));
        };
        let mut occurrence = Occurrence::from(row);
        if !occurrence.status.can_transition_to(report.new_status) {
            return Ok(None);
        }
        occurrence.status_change_log.push(StatusChange {
            from: Some(occurrence.status),
            to: report.new_status,
            timestamp: Utc::now(),
            reason: report.reason,
        });
        occurrence.status = report.new_status;
        if report.worker_instance_id.is_some() {
            occurrence.worker_instance_id = report.worker_instance_id;
        }
        if report.start_time.is_some() {
            occurrence.start_time = report.start_time;
        }
        if report.end_time.is_some() {
            occurrence.end_time = report.end_time;
            let end = report.end_time.unwrap();
            // A Queued occurrence that never started (e.g. a zombie sweep closing it out
            // before a worker picked it up) has no start_time to measure from; fall back
            // to created_at so a terminal occurrence always carries a duration.
            let elapsed_from = occurrence.start_time.unwrap_or(occurrence.created_at);
            if occurrence.status.is_terminal() {
                occurrence.duration_ms = Some((end - elapsed_from).num_milliseconds());
            }
        }
        if report.result.is_some() {
            occurrence.result = report.result;
        }
        // A successful terminal report clears any stale exception text from a prior attempt.
        occurrence.exception = if occurrence.status == OccurrenceStatus::Completed {
            None
        } else {
            report.exception.or(occurrence.exception)
        };

        sqlx::query(
            r#"
            update occurrences set
                status = $2, worker_instance_id = $3, start_time = $4, end_time = $5,
                duration_ms = $6, result = $7, exception = $8, status_change_log = $9
            where id = $1
            "#,
        )
        .bind(occurrence.id.0)
        .bind(status_to_i16(occurrence.status))
        .bind(occurrence.worker_instance_id.as_ref().map(|w| w.0.clone()))
        .bind(occurrence.start_time)
        .bind(occurrence.end_time)
        .bind(occurrence.duration_ms)
        .bind(&occurrence.result)
        .bind(&occurrence.exception)
        .bind(serde_json::to_value(&occurrence.status_change_log).unwrap())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(occurrence))
    }

    async fn append_log(
        &self,
        id: OccurrenceId,
        entry: LogEntry,
        max_count: usize,
    ) -> CatalogResult<()> {
        let mut tx = self.pool.raw().begin().await?;
        let row = sqlx::query_as::<_, OccurrenceRow>(
            "select * from occurrences where id = $1 for update",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Err(CatalogError::OccurrenceNotFound(id));
        };
        let mut occurrence = Occurrence::from(row);
        occurrence.push_log(entry, max_count);
        sqlx::query("update occurrences set logs = $2 where id = $1")
            .bind(id.0)
            .bind(serde_json::to_value(&occurrence.logs).unwrap())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn heartbeat(&self, id: OccurrenceId, at: DateTime<Utc>) -> CatalogResult<()> {
        sqlx::query("update occurrences set last_heartbeat = $2 where id = $1")
            .bind(id.0)
            .bind(at)
            .execute(self.pool.raw())
            .await?;
        Ok(())
    }

    async fn find_stale_nonterminal(
        &self,
        default_timeout: Duration,
    ) -> CatalogResult<Vec<Occurrence>> {
        let rows = sqlx::query_as::<_, OccurrenceRow>(
            r#"
            select o.* from occurrences o
            join jobs j on j.id = o.job_id
            where o.status in (0, 1)
              and coalesce(o.last_heartbeat, o.start_time, o.created_at) <
                  now() - make_interval(mins => coalesce(j.zombie_timeout_minutes, $1))
            "#,
        )
        .bind(default_timeout.num_minutes())
        .fetch_all(self.pool.raw())
        .await?;
        Ok(rows.into_iter().map(Occurrence::from).collect())
    }

    async fn find_stuck_queued(&self, grace: Duration) -> CatalogResult<Vec<Occurrence>> {
        let rows = sqlx::query_as::<_, OccurrenceRow>(
            "select * from occurrences where status = 0 and created_at < $1",
        )
        .bind(Utc::now() - grace)
        .fetch_all(self.pool.raw())
        .await?;
        Ok(rows.into_iter().map(Occurrence::from).collect())
    }

    async fn count_running_for_job(&self, job_id: JobId) -> CatalogResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "select count(*) from occurrences where job_id = $1 and status in (0, 1)",
        )
        .bind(job_id.0)
        .fetch_one(self.pool.raw())
        .await?;
        Ok(count)
    }

    async fn find_unrecorded_failures(&self, lookback: Duration) -> CatalogResult<Vec<Occurrence>> {
        let rows = sqlx::query_as::<_, OccurrenceRow>(
            r#"
            select o.* from occurrences o
            where o.status in (3, 5, 6)
              and coalesce(o.end_time, o.created_at) >= $1
              and not exists (
                  select 1 from failed_occurrences f where f.occurrence_id = o.id
              )
            "#,
        )
        .bind(Utc::now() - lookback)
        .fetch_all(self.pool.raw())
        .await?;
        Ok(rows.into_iter().map(Occurrence::from).collect())
    }
}

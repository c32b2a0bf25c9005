use crate::error::CatalogResult;
use crate::pool::CatalogPool;
use crate::rows::FailedOccurrenceRow;
use async_trait::async_trait;
use milvaion_common::model::{FailedOccurrence, JobId, OccurrenceId};
use std::sync::Arc;

/// The permanent record of occurrences that exhausted their retries, independent of
/// whatever the triggering job's current configuration happens to be.
#[async_trait]
pub trait FailedOccurrenceRepo: Send + Sync {
    /// Idempotent: recording the same occurrence twice (e.g. a redelivered status
    /// message after a crash) is a no-op on the second call.
    async fn record(&self, failure: &FailedOccurrence) -> CatalogResult<()>;

    async fn list_unresolved(&self, job_id: Option<JobId>) -> CatalogResult<Vec<FailedOccurrence>>;

    async fn mark_resolved(&self, occurrence_id: OccurrenceId) -> CatalogResult<()>;
}

pub struct PostgresFailedOccurrenceRepo {
    pool: CatalogPool,
}

impl PostgresFailedOccurrenceRepo {
    pub fn new(pool: CatalogPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl FailedOccurrenceRepo for PostgresFailedOccurrenceRepo {
    async fn record(&self, failure: &FailedOccurrence) -> CatalogResult<()> {
        sqlx::query(
            r#"
            insert into failed_occurrences (
                occurrence_id, job_id, occurred_at, last_exception, worker_instance_id,
                resolved, resolved_at
            ) values ($1, $2, $3, $4, $5, $6, $7)
            on conflict (occurrence_id) do nothing
            "#,
        )
        .bind(failure.occurrence_id.0)
        .bind(failure.job_id.0)
        .bind(failure.occurred_at)
        .bind(&failure.last_exception)
        .bind(failure.worker_instance_id.as_ref().map(|w| w.0.clone()))
        .bind(failure.resolved)
        .bind(failure.resolved_at)
        .execute(self.pool.raw())
        .await?;
        Ok(())
    }

    async fn list_unresolved(&self, job_id: Option<JobId>) -> CatalogResult<Vec<FailedOccurrence>> {
        let rows = match job_id {
            Some(job_id) => {
                sqlx::query_as::<_, FailedOccurrenceRow>(
                    "select * from failed_occurrences where not resolved and job_id = $1 order by occurred_at",
                )
                .bind(job_id.0)
                .fetch_all(self.pool.raw())
                .await?
            }
            None => {
                sqlx::query_as::<_, FailedOccurrenceRow>(
                    "select * from failed_occurrences where not resolved order by occurred_at",
                )
                .fetch_all(self.pool.raw())
                .await?
            }
        };
        Ok(rows.into_iter().map(FailedOccurrence::from).collect())
    }

    async fn mark_resolved(&self, occurrence_id: OccurrenceId) -> CatalogResult<()> {
        sqlx::query(
            "update failed_occurrences set resolved = true, resolved_at = now() where occurrence_id = $1",
        )
        .bind(occurrence_id.0)
        .execute(self.pool.raw())
        .await?;
        Ok(())
    }
}

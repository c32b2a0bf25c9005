use chrono::Duration;
use milvaion_catalog::repo::{FailedOccurrenceRepo, OccurrenceRepo};
use milvaion_common::model::FailedOccurrence;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;

const SWEEP_INTERVAL_SECONDS: u64 = 60;
/// How far back each sweep looks, in minutes; generous relative to the sweep interval
/// so a transient catalog hiccup on one pass cannot let a failure slip through.
const LOOKBACK_MINUTES: i64 = 10;

/// Moves terminal-failed occurrences into the resolution queue. Runs on every node
/// like ZombieDetector; insertion is idempotent on `occurrence_id` so no lease is
/// required.
pub struct FailedOccurrenceHandler {
    occurrences: Arc<dyn OccurrenceRepo>,
    failed: Arc<dyn FailedOccurrenceRepo>,
}

impl FailedOccurrenceHandler {
    pub fn new(
        occurrences: Arc<dyn OccurrenceRepo>,
        failed: Arc<dyn FailedOccurrenceRepo>,
    ) -> Arc<Self> {
        Arc::new(Self { occurrences, failed })
    }

    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECONDS));
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = tick.tick() => self.sweep_once().await,
            }
        }
    }

    pub async fn sweep_once(&self) {
        let recent = match self
            .occurrences
            .find_unrecorded_failures(Duration::minutes(LOOKBACK_MINUTES))
            .await
        {
            Ok(recent) => recent,
            Err(err) => {
                error!(error = %err, "failed occurrence sweep could not query the catalog");
                return;
            }
        };
        for occurrence in recent {
            let failure = FailedOccurrence {
                job_id: occurrence.job_id,
                occurrence_id: occurrence.id,
                occurred_at: occurrence.end_time.unwrap_or(occurrence.created_at),
                last_exception: occurrence.exception.clone(),
                worker_instance_id: occurrence.worker_instance_id.clone(),
                resolved: false,
                resolved_at: None,
            };
            if let Err(err) = self.failed.record(&failure).await {
                error!(occurrence_id = %occurrence.id, error = %err, "failed to record failed occurrence");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use milvaion_catalog::repo::StatusReport;
    use milvaion_catalog::CatalogResult;
    use milvaion_common::model::{JobId, LogEntry, Occurrence, OccurrenceId, OccurrenceStatus, WorkerInstanceId};
    use std::sync::Mutex;

    struct FakeOccurrenceRepo {
        occurrences: Vec<Occurrence>,
    }

    #[async_trait]
    impl OccurrenceRepo for FakeOccurrenceRepo {
        async fn insert_queued(&self, _: JobId, _: i64, _: &str) -> CatalogResult<Occurrence> {
            unimplemented!()
        }
        async fn get(&self, _: OccurrenceId) -> CatalogResult<Occurrence> {
            unimplemented!()
        }
        async fn find(&self, _: OccurrenceId) -> CatalogResult<Option<Occurrence>> {
            unimplemented!()
        }
        async fn apply_status_report(&self, _: StatusReport) -> CatalogResult<Option<Occurrence>> {
            unimplemented!()
        }
        async fn append_log(&self, _: OccurrenceId, _: LogEntry, _: usize) -> CatalogResult<()> {
            unimplemented!()
        }
        async fn heartbeat(&self, _: OccurrenceId, _: chrono::DateTime<Utc>) -> CatalogResult<()> {
            unimplemented!()
        }
        async fn find_stale_nonterminal(&self, _: Duration) -> CatalogResult<Vec<Occurrence>> {
            unimplemented!()
        }
        async fn find_stuck_queued(&self, _: Duration) -> CatalogResult<Vec<Occurrence>> {
            unimplemented!()
        }
        async fn count_running_for_job(&self, _: JobId) -> CatalogResult<i64> {
            unimplemented!()
        }
        async fn find_unrecorded_failures(&self, _: Duration) -> CatalogResult<Vec<Occurrence>> {
            Ok(self.occurrences.clone())
        }
    }

    #[derive(Default)]
    struct FakeFailedOccurrenceRepo {
        recorded: Mutex<Vec<FailedOccurrence>>,
    }

    #[async_trait]
    impl FailedOccurrenceRepo for FakeFailedOccurrenceRepo {
        async fn record(&self, failure: &FailedOccurrence) -> CatalogResult<()> {
            let mut recorded = self.recorded.lock().unwrap();
            if !recorded.iter().any(|f| f.occurrence_id == failure.occurrence_id) {
                recorded.push(failure.clone());
            }
            Ok(())
        }
        async fn list_unresolved(&self, _: Option<JobId>) -> CatalogResult<Vec<FailedOccurrence>> {
            Ok(self.recorded.lock().unwrap().clone())
        }
        async fn mark_resolved(&self, _: OccurrenceId) -> CatalogResult<()> {
            Ok(())
        }
    }

    fn terminal_occurrence(status: OccurrenceStatus) -> Occurrence {
        Occurrence {
            id: OccurrenceId::new(),
            job_id: JobId::new(),
            job_version: 1,
            job_name: "nightly-report".to_string(),
            worker_instance_id: Some(WorkerInstanceId("worker-1".to_string())),
            status,
            start_time: Some(Utc::now()),
            end_time: Some(Utc::now()),
            duration_ms: Some(1200),
            result: None,
            exception: Some("boom".to_string()),
            logs: vec![],
            status_change_log: vec![],
            retry_count: 0,
            last_heartbeat: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sweep_records_every_terminal_failure_returned_by_the_catalog() {
        let occurrences = Arc::new(FakeOccurrenceRepo {
            occurrences: vec![
                terminal_occurrence(OccurrenceStatus::Failed),
                terminal_occurrence(OccurrenceStatus::TimedOut),
                terminal_occurrence(OccurrenceStatus::Unknown),
            ],
        });
        let failed = Arc::new(FakeFailedOccurrenceRepo::default());
        let handler = FailedOccurrenceHandler::new(occurrences, failed.clone());

        handler.sweep_once().await;

        assert_eq!(failed.recorded.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn sweep_is_idempotent_across_repeated_runs() {
        let occurrence = terminal_occurrence(OccurrenceStatus::Failed);
        let occurrences = Arc::new(FakeOccurrenceRepo {
            occurrences: vec![occurrence],
        });
        let failed = Arc::new(FakeFailedOccurrenceRepo::default());
        let handler = FailedOccurrenceHandler::new(occurrences, failed.clone());

        handler.sweep_once().await;
        handler.sweep_once().await;

        assert_eq!(failed.recorded.lock().unwrap().len(), 1);
    }
}

use chrono::Duration;
use milvaion_bus::{DispatchMessage, MessageBus};
use milvaion_catalog::repo::{JobRepo, OccurrenceRepo};
use milvaion_catalog::CatalogResult;
use milvaion_common::config::StatusTrackerConfig;
use milvaion_common::model::{Job, LogEntry, Occurrence, OccurrenceId};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Published,
    PublishFailed,
}

/// Owns the seam between "catalog commit" and "bus publish" that the rest of the
/// Dispatcher treats as one logical step, plus the startup-recovery scan for
/// occurrences a prior leader may have committed but never published.
pub struct OutboxBridge {
    occurrences: Arc<dyn OccurrenceRepo>,
    jobs: Arc<dyn JobRepo>,
    bus: Arc<MessageBus>,
    execution_log_max_count: usize,
}

impl OutboxBridge {
    pub fn new(
        occurrences: Arc<dyn OccurrenceRepo>,
        jobs: Arc<dyn JobRepo>,
        bus: Arc<MessageBus>,
        status_tracker_config: &StatusTrackerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            occurrences,
            jobs,
            bus,
            execution_log_max_count: status_tracker_config.execution_log_max_count,
        })
    }

    fn dispatch_message(job: &Job, occurrence: &Occurrence) -> DispatchMessage {
        DispatchMessage {
            occurrence_id: occurrence.id,
            correlation_id: occurrence.correlation_id(),
            job_id: job.id,
            job_version: job.version,
            job_kind: job.job_kind.clone(),
            job_data: job.job_data.clone(),
            worker_class: job.worker_class.clone(),
            dispatched_at: occurrence.created_at,
            execution_timeout_seconds: job.execution_timeout_seconds,
            retry_count: occurrence.retry_count,
        }
    }

    /// Inserts a `Queued` occurrence and publishes its dispatch message. A publish
    /// failure does not roll back the insert and does not change the occurrence's
    /// status: it stays `Queued` so the next recovery scan can find and republish it,
    /// with the failure recorded as a log entry for operators to see.
    pub async fn dispatch_and_publish(&self, job: &Job) -> CatalogResult<DispatchOutcome> {
        let occurrence = self
            .occurrences
            .insert_queued(job.id, job.version, &job.name)
            .await?;

        let message = Self::dispatch_message(job, &occurrence);

        match self.bus.publish_dispatch(&message, &job.routing_key()).await {
            Ok(()) => Ok(DispatchOutcome::Published),
            Err(err) => {
                warn!(occurrence_id = %occurrence.id, error = %err, "dispatch publish failed");
                self.mark_publish_failed(occurrence.id, &err.to_string()).await?;
                Ok(DispatchOutcome::PublishFailed)
            }
        }
    }

    async fn mark_publish_failed(&self, occurrence_id: OccurrenceId, reason: &str) -> CatalogResult<()> {
        self.occurrences
            .append_log(
                occurrence_id,
                LogEntry::dispatcher(format!("dispatch publish failed: {reason}")),
                self.execution_log_max_count,
            )
            .await
    }

    /// Republishes `Queued` occurrences older than `grace` whose catalog commit may
    /// never have reached the bus because the leader crashed in between.
    pub async fn recover(&self, grace: Duration) -> CatalogResult<Vec<OccurrenceId>> {
        let stuck = self.occurrences.find_stuck_queued(grace).await?;
        let mut republished = Vec::with_capacity(stuck.len());
        for occurrence in stuck {
            let job = match self.jobs.get(occurrence.job_id).await {
                Ok(job) => job,
                Err(err) => {
                    error!(occurrence_id = %occurrence.id, error = %err, "recovery could not load job for stuck occurrence");
                    continue;
                }
            };
            let message = Self::dispatch_message(&job, &occurrence);
            match self.bus.publish_dispatch(&message, &job.routing_key()).await {
                Ok(()) => republished.push(occurrence.id),
                Err(err) => {
                    warn!(occurrence_id = %occurrence.id, error = %err, "recovery republish failed");
                    let _ = self.mark_publish_failed(occurrence.id, &err.to_string()).await;
                }
            }
        }
        Ok(republished)
    }
}

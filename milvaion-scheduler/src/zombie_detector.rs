use crate::auto_disable;
use chrono::{Duration, Utc};
use milvaion_catalog::repo::{JobRepo, OccurrenceRepo, StatusReport};
use milvaion_common::config::{StatusTrackerConfig, ZombieDetectorConfig};
use milvaion_common::model::{LogEntry, OccurrenceStatus};
use milvaion_coordination::{LockManager, RunningSet, ScheduleIndex, WorkerRegistry};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SWEEP_LOCK: &str = "zombie-detector/sweep";
const SWEEP_LOCK_TTL: StdDuration = StdDuration::from_secs(60);

/// Periodic sweep that marks abandoned `Queued`/`Running` occurrences `Unknown`. Runs
/// on every node (not only the dispatch leader): each sweep claims a short-TTL lock so
/// concurrent nodes don't double-process the same occurrence, but no node is
/// permanently pinned to the role.
pub struct ZombieDetector {
    node_id: String,
    config: ZombieDetectorConfig,
    execution_log_max_count: usize,
    occurrences: Arc<dyn OccurrenceRepo>,
    jobs: Arc<dyn JobRepo>,
    lock_manager: Arc<dyn LockManager>,
    running_set: Arc<dyn RunningSet>,
    worker_registry: Arc<dyn WorkerRegistry>,
    schedule_index: Arc<dyn ScheduleIndex>,
}

impl ZombieDetector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: String,
        config: ZombieDetectorConfig,
        status_tracker_config: &StatusTrackerConfig,
        occurrences: Arc<dyn OccurrenceRepo>,
        jobs: Arc<dyn JobRepo>,
        lock_manager: Arc<dyn LockManager>,
        running_set: Arc<dyn RunningSet>,
        worker_registry: Arc<dyn WorkerRegistry>,
        schedule_index: Arc<dyn ScheduleIndex>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            config,
            execution_log_max_count: status_tracker_config.execution_log_max_count,
            occurrences,
            jobs,
            lock_manager,
            running_set,
            worker_registry,
            schedule_index,
        })
    }

    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        if !self.config.enabled {
            info!("zombie detector disabled by configuration");
            return;
        }
        let mut tick = tokio::time::interval(StdDuration::from_secs(self.config.check_interval_seconds));
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = tick.tick() => self.sweep_once().await,
            }
        }
    }

    pub async fn sweep_once(&self) {
        if !self
            .lock_manager
            .try_acquire(SWEEP_LOCK, &self.node_id, SWEEP_LOCK_TTL)
            .await
        {
            return;
        }

        let default_timeout = Duration::minutes(self.config.zombie_timeout_minutes);
        let stale = match self.occurrences.find_stale_nonterminal(default_timeout).await {
            Ok(stale) => stale,
            Err(err) => {
                error!(error = %err, "zombie sweep failed to query stale occurrences");
                let _ = self.lock_manager.release(SWEEP_LOCK, &self.node_id).await;
                return;
            }
        };

        for occurrence in stale {
            let now = Utc::now();
            let report = StatusReport {
                occurrence_id: occurrence.id,
                new_status: OccurrenceStatus::Unknown,
                worker_instance_id: None,
                start_time: None,
                end_time: Some(now),
                result: None,
                exception: Some("Zombie occurrence detected".to_string()),
                reason: "zombie sweep".to_string(),
            };
            let updated = match self.occurrences.apply_status_report(report).await {
                Ok(Some(updated)) => updated,
                Ok(None) => continue,
                Err(err) => {
                    warn!(occurrence_id = %occurrence.id, error = %err, "failed to mark zombie occurrence");
                    continue;
                }
            };
            let _ = self
                .occurrences
                .append_log(
                    updated.id,
                    LogEntry::zombie_detector("occurrence exceeded its effective timeout"),
                    self.execution_log_max_count,
                )
                .await;

            self.running_set.mark_completed(updated.job_id).await;
            if let Ok(job) = self.jobs.get(updated.job_id).await {
                self.worker_registry
                    .decrement_consumer_counter(&job.worker_class, &job.job_kind)
                    .await;
                let outcome = auto_disable::evaluate(
                    &job.auto_disable_config,
                    &job.auto_disable_state,
                    now,
                    OccurrenceStatus::Unknown,
                );
                let _ = self
                    .jobs
                    .record_auto_disable_outcome(
                        job.id,
                        outcome.state.consecutive_failure_count,
                        outcome.state.last_failure_time,
                        outcome.state.disabled_at,
                        outcome.disable,
                    )
                    .await;
                if outcome.disable {
                    self.schedule_index.remove(job.id).await;
                }
            }
        }

        let _ = self.lock_manager.release(SWEEP_LOCK, &self.node_id).await;
    }
}

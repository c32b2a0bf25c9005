use crate::cron_engine::CronEngine;
use crate::outbox::{DispatchOutcome, OutboxBridge};
use chrono::Utc;
use milvaion_catalog::repo::JobRepo;
use milvaion_common::config::DispatcherConfig;
use milvaion_common::model::{ConcurrentPolicy, JobId};
use milvaion_coordination::{CachedJob, JobCache, LockManager, RunningSet, ScheduleIndex, WorkerRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const LEADER_LOCK: &str = "dispatcher/leader";

/// The central dispatch loop, run only by the node currently holding the
/// `dispatcher/leader` lease. Non-leaders keep attempting to acquire it so leadership
/// fails over automatically if the holder dies.
pub struct Dispatcher {
    node_id: String,
    config: DispatcherConfig,
    jobs: Arc<dyn JobRepo>,
    schedule_index: Arc<dyn ScheduleIndex>,
    job_cache: Arc<dyn JobCache>,
    lock_manager: Arc<dyn LockManager>,
    running_set: Arc<dyn RunningSet>,
    worker_registry: Arc<dyn WorkerRegistry>,
    outbox: Arc<OutboxBridge>,
    is_leader: AtomicBool,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: String,
        config: DispatcherConfig,
        jobs: Arc<dyn JobRepo>,
        schedule_index: Arc<dyn ScheduleIndex>,
        job_cache: Arc<dyn JobCache>,
        lock_manager: Arc<dyn LockManager>,
        running_set: Arc<dyn RunningSet>,
        worker_registry: Arc<dyn WorkerRegistry>,
        outbox: Arc<OutboxBridge>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            config,
            jobs,
            schedule_index,
            job_cache,
            lock_manager,
            running_set,
            worker_registry,
            outbox,
            is_leader: AtomicBool::new(false),
        })
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        if !self.config.enabled {
            info!("dispatcher disabled by configuration");
            return;
        }

        let mut lease_tick = tokio::time::interval(self.config.lease_tick_interval());
        let mut dispatch_tick = tokio::time::interval(self.config.polling_interval());

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    if self.is_leader() {
                        let _ = self.lock_manager.release(LEADER_LOCK, &self.node_id).await;
                    }
                    break;
                }
                _ = lease_tick.tick() => {
                    self.maintain_leadership().await;
                }
                _ = dispatch_tick.tick() => {
                    if self.is_leader() {
                        self.dispatch_once().await;
                    }
                }
            }
        }
    }

    async fn maintain_leadership(&self) {
        let ttl = StdDuration::from_secs(self.config.lease_ttl_seconds);
        if self.is_leader() {
            let extended = self.lock_manager.extend(LEADER_LOCK, &self.node_id, ttl).await;
            if !extended {
                warn!(node_id = %self.node_id, "lost dispatcher leadership, dropping to follower");
                self.is_leader.store(false, Ordering::Relaxed);
            }
            return;
        }

        let acquired = self
            .lock_manager
            .try_acquire(LEADER_LOCK, &self.node_id, ttl)
            .await;
        if acquired {
            info!(node_id = %self.node_id, "acquired dispatcher leadership");
            self.is_leader.store(true, Ordering::Relaxed);
            if self.config.enable_startup_recovery {
                self.recover_startup().await;
            }
        }
    }

    async fn recover_startup(&self) {
        let grace = chrono::Duration::seconds(self.config.recovery_grace_seconds);
        match self.outbox.recover(grace).await {
            Ok(ids) if !ids.is_empty() => {
                info!(count = ids.len(), "republished occurrences stuck since a prior leader");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "startup recovery scan failed"),
        }
    }

    async fn dispatch_once(&self) {
        let now = Utc::now();
        let due = self
            .schedule_index
            .get_due(now, self.config.batch_size as usize)
            .await;
        if due.is_empty() {
            return;
        }

        let cached = self.job_cache.get_bulk(&due).await;
        let mut missing = Vec::new();
        for id in &due {
            if !cached.contains_key(id) {
                missing.push(*id);
            }
        }
        let mut resolved = cached;
        for id in missing {
            if let Ok(job) = self.jobs.get(id).await {
                self.job_cache
                    .put(&job, StdDuration::from_secs(86_400))
                    .await;
                resolved.insert(id, CachedJob::from(&job));
            }
        }

        for job_id in due {
            let Some(cached_job) = resolved.get(&job_id) else {
                continue;
            };
            self.dispatch_job(job_id, cached_job.clone(), now).await;
        }
    }

    async fn dispatch_job(&self, job_id: JobId, cached: CachedJob, now: chrono::DateTime<Utc>) {
        if !cached.is_active || cached.disabled {
            self.schedule_index.remove(job_id).await;
            return;
        }

        if cached.concurrent_policy == ConcurrentPolicy::Skip
            && !self.running_set.try_mark_running(job_id).await
        {
            warn!(job_id = %job_id, "skipped: prior occurrence still running");
            self.reschedule(job_id, &cached, now).await;
            return;
        }

        if self.worker_registry.get_worker(&cached.worker_class).await.is_none() {
            warn!(job_id = %job_id, worker_class = %cached.worker_class, "no live worker class registered");
            return;
        }

        let job = match self.jobs.get(job_id).await {
            Ok(job) => job,
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "failed to load job for dispatch");
                return;
            }
        };

        match self.outbox.dispatch_and_publish(&job).await {
            Ok(DispatchOutcome::Published) | Ok(DispatchOutcome::PublishFailed) => {}
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "failed to record dispatched occurrence");
                return;
            }
        }

        self.reschedule(job_id, &cached, now).await;
    }

    async fn reschedule(&self, job_id: JobId, cached: &CachedJob, now: chrono::DateTime<Utc>) {
        match &cached.cron_expression {
            Some(expr) => match CronEngine::next(expr, now) {
                Ok(next_at) => self.schedule_index.update(job_id, next_at).await,
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "job has an invalid cron expression, removing from schedule");
                    self.schedule_index.remove(job_id).await;
                }
            },
            None => self.schedule_index.remove(job_id).await,
        }
    }
}

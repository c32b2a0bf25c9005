use milvaion_bus::MessageBus;
use milvaion_catalog::repo::{
    FailedOccurrenceRepo, JobRepo, OccurrenceRepo, PostgresFailedOccurrenceRepo, PostgresJobRepo,
    PostgresOccurrenceRepo,
};
use milvaion_catalog::CatalogPool;
use milvaion_common::config::RuntimeConfig;
use milvaion_coordination::{
    CircuitBreaker, CoordinationClient, JobCache, LockManager, RedisCancellationBus,
    RedisJobCache, RedisLockManager, RedisRunningSet, RedisScheduleIndex, RedisWorkerRegistry,
    RunningSet, ScheduleIndex, WorkerRegistry,
};
use milvaion_scheduler::{
    Dispatcher, FailedOccurrenceHandler, LogCollector, OutboxBridge, StatusTracker, Supervisor,
    ZombieDetector,
};
use std::sync::Arc;
use uuid::Uuid;

/// Every long-lived handle a node needs, built once at startup and handed to the
/// [`Supervisor`]. Kept as a flat struct (rather than threading individual `Arc`s
/// through each constructor call site) so `main` stays a straight line.
pub struct Services {
    pub node_id: String,
    pub jobs: Arc<dyn JobRepo>,
    pub occurrences: Arc<dyn OccurrenceRepo>,
    pub failed_occurrences: Arc<dyn FailedOccurrenceRepo>,
    pub schedule_index: Arc<dyn ScheduleIndex>,
    pub job_cache: Arc<dyn JobCache>,
    pub lock_manager: Arc<dyn LockManager>,
    pub running_set: Arc<dyn RunningSet>,
    pub worker_registry: Arc<dyn WorkerRegistry>,
    pub bus: Arc<MessageBus>,
    pub supervisor: Supervisor,
}

impl Services {
    pub async fn new(config: &RuntimeConfig) -> anyhow::Result<Self> {
        let node_id = std::env::var("MILVAION_NODE_ID").unwrap_or_else(|_| Uuid::new_v4().to_string());

        let catalog_pool = CatalogPool::configured(&config.catalog).await?;
        catalog_pool.migrate().await?;

        let jobs: Arc<dyn JobRepo> = PostgresJobRepo::new(catalog_pool.clone());
        let occurrences: Arc<dyn OccurrenceRepo> = PostgresOccurrenceRepo::new(catalog_pool.clone());
        let failed_occurrences: Arc<dyn FailedOccurrenceRepo> =
            PostgresFailedOccurrenceRepo::new(catalog_pool.clone());

        let coordination_client = CoordinationClient::configured(&config.coordination).await?;
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));

        let schedule_index: Arc<dyn ScheduleIndex> =
            RedisScheduleIndex::new(coordination_client.clone(), breaker.clone());
        let job_cache: Arc<dyn JobCache> =
            RedisJobCache::new(coordination_client.clone(), breaker.clone());
        let lock_manager: Arc<dyn LockManager> =
            RedisLockManager::new(coordination_client.clone(), breaker.clone());
        let running_set: Arc<dyn RunningSet> =
            RedisRunningSet::new(coordination_client.clone(), breaker.clone());
        let worker_registry: Arc<dyn WorkerRegistry> = RedisWorkerRegistry::new(
            coordination_client.clone(),
            breaker.clone(),
            config.worker_registry.clone(),
        );
        let cancellation_bus = RedisCancellationBus::new(coordination_client.clone());

        let bus = Arc::new(MessageBus::connect(&config.bus).await?);
        bus.declare_topology().await?;

        let outbox = OutboxBridge::new(
            occurrences.clone(),
            jobs.clone(),
            bus.clone(),
            &config.status_tracker,
        );

        let dispatcher = Dispatcher::new(
            node_id.clone(),
            config.dispatcher.clone(),
            jobs.clone(),
            schedule_index.clone(),
            job_cache.clone(),
            lock_manager.clone(),
            running_set.clone(),
            worker_registry.clone(),
            outbox,
        );

        let status_tracker = StatusTracker::new(
            config.status_tracker.clone(),
            bus.clone(),
            occurrences.clone(),
            jobs.clone(),
            running_set.clone(),
            worker_registry.clone(),
            schedule_index.clone(),
            cancellation_bus,
        );

        let log_collector = LogCollector::new(
            config.log_collector.clone(),
            &config.status_tracker,
            bus.clone(),
            occurrences.clone(),
        );

        let zombie_detector = ZombieDetector::new(
            node_id.clone(),
            config.zombie_detector.clone(),
            &config.status_tracker,
            occurrences.clone(),
            jobs.clone(),
            lock_manager.clone(),
            running_set.clone(),
            worker_registry.clone(),
            schedule_index.clone(),
        );

        let failed_occurrence_handler =
            FailedOccurrenceHandler::new(occurrences.clone(), failed_occurrences.clone());

        let supervisor = Supervisor::new(
            config.shutdown.clone(),
            dispatcher,
            status_tracker,
            log_collector,
            zombie_detector,
            failed_occurrence_handler,
        );

        Ok(Self {
            node_id,
            jobs,
            occurrences,
            failed_occurrences,
            schedule_index,
            job_cache,
            lock_manager,
            running_set,
            worker_registry,
            bus,
            supervisor,
        })
    }
}

use crate::dispatcher::Dispatcher;
use crate::failed_occurrence_handler::FailedOccurrenceHandler;
use crate::log_collector::LogCollector;
use crate::status_tracker::StatusTracker;
use crate::zombie_detector::ZombieDetector;
use milvaion_common::config::ShutdownConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the lifetime of every background task on a node: spawns them into a single
/// `JoinSet`, fans a shared cancellation out on shutdown, and gives each task a grace
/// period to wind down before the process gives up on it.
pub struct Supervisor {
    shutdown: ShutdownConfig,
    dispatcher: Arc<Dispatcher>,
    status_tracker: Arc<StatusTracker>,
    log_collector: Arc<LogCollector>,
    zombie_detector: Arc<ZombieDetector>,
    failed_occurrence_handler: Arc<FailedOccurrenceHandler>,
}

impl Supervisor {
    pub fn new(
        shutdown: ShutdownConfig,
        dispatcher: Arc<Dispatcher>,
        status_tracker: Arc<StatusTracker>,
        log_collector: Arc<LogCollector>,
        zombie_detector: Arc<ZombieDetector>,
        failed_occurrence_handler: Arc<FailedOccurrenceHandler>,
    ) -> Self {
        Self {
            shutdown,
            dispatcher,
            status_tracker,
            log_collector,
            zombie_detector,
            failed_occurrence_handler,
        }
    }

    /// Runs every component until `cancellation` fires, then waits up to
    /// `shutdownTimeoutSeconds` for them to exit cleanly before abandoning whatever is
    /// still outstanding.
    pub async fn run(self, cancellation: CancellationToken) {
        let mut tasks = JoinSet::new();

        let dispatcher = self.dispatcher.clone();
        let token = cancellation.clone();
        tasks.spawn(async move { dispatcher.run(token).await });

        let status_tracker = self.status_tracker.clone();
        let token = cancellation.clone();
        tasks.spawn(async move { status_tracker.run(token).await });

        let log_collector = self.log_collector.clone();
        let token = cancellation.clone();
        tasks.spawn(async move { log_collector.run(token).await });

        let zombie_detector = self.zombie_detector.clone();
        let token = cancellation.clone();
        tasks.spawn(async move { zombie_detector.run(token).await });

        let failed_occurrence_handler = self.failed_occurrence_handler.clone();
        let token = cancellation.clone();
        tasks.spawn(async move { failed_occurrence_handler.run(token).await });

        info!(task_count = tasks.len(), "supervisor started background tasks");

        cancellation.cancelled().await;
        info!("shutdown requested, waiting for background tasks to exit");

        let deadline = Duration::from_secs(self.shutdown.shutdown_timeout_seconds);
        match tokio::time::timeout(deadline, Self::drain(&mut tasks)).await {
            Ok(()) => info!("all background tasks exited cleanly"),
            Err(_) => {
                let abandoned = tasks.len();
                warn!(
                    abandoned,
                    timeout_seconds = self.shutdown.shutdown_timeout_seconds,
                    "shutdown grace period elapsed, abandoning remaining tasks"
                );
                tasks.shutdown().await;
            }
        }
    }

    async fn drain(tasks: &mut JoinSet<()>) {
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                warn!(error = %err, "background task panicked");
            }
        }
    }
}

pub mod auto_disable;
pub mod cron_engine;
pub mod dispatcher;
pub mod failed_occurrence_handler;
pub mod log_collector;
pub mod outbox;
pub mod redelivery;
pub mod status_tracker;
pub mod supervisor;
pub mod zombie_detector;

pub use auto_disable::AutoDisableOutcome;
pub use cron_engine::{CronEngine, CronError};
pub use dispatcher::Dispatcher;
pub use failed_occurrence_handler::FailedOccurrenceHandler;
pub use log_collector::LogCollector;
pub use outbox::{DispatchOutcome, OutboxBridge};
pub use status_tracker::StatusTracker;
pub use supervisor::Supervisor;
pub use zombie_detector::ZombieDetector;

pub mod cancellation;
pub mod circuit_breaker;
pub mod client;
pub mod error;
pub mod job_cache;
pub mod lock;
pub mod running_set;
pub mod schedule_index;
pub mod worker_registry;

pub use cancellation::{CancellationBus, CancellationSignal, RedisCancellationBus};
pub use circuit_breaker::CircuitBreaker;
pub use client::CoordinationClient;
pub use error::{CoordinationError, CoordinationResult};
pub use job_cache::{CachedJob, JobCache, RedisJobCache};
pub use lock::{LockManager, RedisLockManager};
pub use running_set::{RedisRunningSet, RunningSet};
pub use schedule_index::{RedisScheduleIndex, ScheduleIndex};
pub use worker_registry::{RedisWorkerRegistry, WorkerRegistry};

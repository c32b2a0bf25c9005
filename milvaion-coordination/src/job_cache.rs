use crate::circuit_breaker::CircuitBreaker;
use crate::client::CoordinationClient;
use async_trait::async_trait;
use milvaion_common::model::{ConcurrentPolicy, Job, JobId, Schedule};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Denormalized read-through cache of the job fields the Dispatcher needs on its hot
/// path, stored as a Redis hash per job with a TTL.
#[async_trait]
pub trait JobCache: Send + Sync {
    async fn put(&self, job: &Job, ttl: Duration);
    async fn get(&self, job_id: JobId) -> Option<CachedJob>;
    async fn get_bulk(&self, job_ids: &[JobId]) -> HashMap<JobId, CachedJob>;
    async fn remove(&self, job_id: JobId);
    async fn remove_bulk(&self, job_ids: &[JobId]);
}

#[derive(Debug, Clone)]
pub struct CachedJob {
    pub id: JobId,
    pub worker_class: String,
    pub job_kind: String,
    pub job_data: Option<String>,
    pub version: i64,
    pub is_active: bool,
    pub disabled: bool,
    pub concurrent_policy: ConcurrentPolicy,
    pub cron_expression: Option<String>,
    pub execution_timeout_seconds: Option<i64>,
    pub zombie_timeout_minutes: Option<i64>,
}

impl From<&Job> for CachedJob {
    fn from(job: &Job) -> Self {
        let cron_expression = match &job.schedule {
            Schedule::Cron(expr) => Some(expr.clone()),
            Schedule::Once(_) => None,
        };
        CachedJob {
            id: job.id,
            worker_class: job.worker_class.clone(),
            job_kind: job.job_kind.clone(),
            job_data: job.job_data.clone(),
            version: job.version,
            is_active: job.is_active,
            disabled: job.auto_disable_state.disabled_at.is_some(),
            concurrent_policy: job.concurrent_policy,
            cron_expression,
            execution_timeout_seconds: job.execution_timeout_seconds,
            zombie_timeout_minutes: job.zombie_timeout_minutes,
        }
    }
}

pub struct RedisJobCache {
    client: CoordinationClient,
    breaker: Arc<CircuitBreaker>,
}

impl RedisJobCache {
    pub fn new(client: CoordinationClient, breaker: Arc<CircuitBreaker>) -> Arc<Self> {
        Arc::new(Self { client, breaker })
    }

    fn key(&self, job_id: JobId) -> String {
        self.client.key(&format!("jobcache:{job_id}"))
    }
}

fn serialize(cached: &CachedJob) -> Vec<(&'static str, String)> {
    vec![
        ("worker_class", cached.worker_class.clone()),
        ("job_kind", cached.job_kind.clone()),
        ("job_data", cached.job_data.clone().unwrap_or_default()),
        ("version", cached.version.to_string()),
        ("is_active", (cached.is_active as u8).to_string()),
        ("disabled", (cached.disabled as u8).to_string()),
        (
            "concurrent_policy",
            (cached.concurrent_policy as i32).to_string(),
        ),
        (
            "cron_expression",
            cached.cron_expression.clone().unwrap_or_default(),
        ),
        (
            "execution_timeout_seconds",
            cached
                .execution_timeout_seconds
                .map(|v| v.to_string())
                .unwrap_or_default(),
        ),
        (
            "zombie_timeout_minutes",
            cached
                .zombie_timeout_minutes
                .map(|v| v.to_string())
                .unwrap_or_default(),
        ),
    ]
}

fn deserialize(id: JobId, fields: HashMap<String, String>) -> Option<CachedJob> {
    if fields.is_empty() {
        return None;
    }
    let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
    Some(CachedJob {
        id,
        worker_class: get("worker_class"),
        job_kind: get("job_kind"),
        job_data: Some(get("job_data")).filter(|s| !s.is_empty()),
        version: get("version").parse().unwrap_or(0),
        is_active: get("is_active") == "1",
        disabled: get("disabled") == "1",
        concurrent_policy: if get("concurrent_policy") == "1" {
            ConcurrentPolicy::Queue
        } else {
            ConcurrentPolicy::Skip
        },
        cron_expression: Some(get("cron_expression")).filter(|s| !s.is_empty()),
        execution_timeout_seconds: get("execution_timeout_seconds").parse().ok(),
        zombie_timeout_minutes: get("zombie_timeout_minutes").parse().ok(),
    })
}

#[async_trait]
impl JobCache for RedisJobCache {
    async fn put(&self, job: &Job, ttl: Duration) {
        let key = self.key(job.id);
        let cached = CachedJob::from(job);
        let fields = serialize(&cached);
        let ttl_secs = ttl.as_secs();
        self.breaker
            .call("job_cache.put", (), || async {
                let mut conn = self.client.conn();
                let _: () = redis::pipe()
                    .atomic()
                    .hset_multiple(&key, &fields)
                    .expire(&key, ttl_secs as i64)
                    .query_async(&mut conn)
                    .await?;
                Ok::<(), redis::RedisError>(())
            })
            .await
    }

    async fn get(&self, job_id: JobId) -> Option<CachedJob> {
        let key = self.key(job_id);
        self.breaker
            .call("job_cache.get", None, || async {
                let mut conn = self.client.conn();
                let fields: HashMap<String, String> = conn.hgetall(&key).await?;
                Ok::<Option<CachedJob>, redis::RedisError>(deserialize(job_id, fields))
            })
            .await
    }

    async fn get_bulk(&self, job_ids: &[JobId]) -> HashMap<JobId, CachedJob> {
        if job_ids.is_empty() {
            return HashMap::new();
        }
        let ids = job_ids.to_vec();
        self.breaker
            .call("job_cache.get_bulk", HashMap::new(), || async {
                let mut conn = self.client.conn();
                let mut pipe = redis::pipe();
                for id in &ids {
                    pipe.hgetall(self.key(*id));
                }
                let results: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;
                let mut out = HashMap::new();
                for (id, fields) in ids.into_iter().zip(results) {
                    if let Some(cached) = deserialize(id, fields) {
                        out.insert(id, cached);
                    }
                }
                Ok::<HashMap<JobId, CachedJob>, redis::RedisError>(out)
            })
            .await
    }

    async fn remove(&self, job_id: JobId) {
        let key = self.key(job_id);
        self.breaker
            .call("job_cache.remove", (), || async {
                let mut conn = self.client.conn();
                let _: () = conn.del(&key).await?;
                Ok::<(), redis::RedisError>(())
            })
            .await
    }

    async fn remove_bulk(&self, job_ids: &[JobId]) {
        if job_ids.is_empty() {
            return;
        }
        let keys: Vec<String> = job_ids.iter().map(|id| self.key(*id)).collect();
        self.breaker
            .call("job_cache.remove_bulk", (), || async {
                let mut conn = self.client.conn();
                let _: () = conn.del(keys).await?;
                Ok::<(), redis::RedisError>(())
            })
            .await
    }
}

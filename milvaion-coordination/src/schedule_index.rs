use crate::circuit_breaker::CircuitBreaker;
use crate::client::CoordinationClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use milvaion_common::model::JobId;
use redis::AsyncCommands;
use std::sync::Arc;
use uuid::Uuid;

/// Ordered set of `(jobId -> nextFireTime)`. Every call is wrapped by the
/// [`CircuitBreaker`]; on Open it returns the fallback documented per method rather
/// than failing the caller.
#[async_trait]
pub trait ScheduleIndex: Send + Sync {
    async fn add(&self, job_id: JobId, at: DateTime<Utc>);
    async fn remove(&self, job_id: JobId);
    async fn remove_bulk(&self, job_ids: &[JobId]);
    async fn update(&self, job_id: JobId, new_at: DateTime<Utc>);
    async fn get_due(&self, now: DateTime<Utc>, limit: usize) -> Vec<JobId>;
    async fn get_time(&self, job_id: JobId) -> Option<DateTime<Utc>>;
    async fn count(&self) -> u64;
}

pub struct RedisScheduleIndex {
    client: CoordinationClient,
    breaker: Arc<CircuitBreaker>,
}

impl RedisScheduleIndex {
    pub fn new(client: CoordinationClient, breaker: Arc<CircuitBreaker>) -> Arc<Self> {
        Arc::new(Self { client, breaker })
    }

    fn key(&self) -> String {
        self.client.key("schedule")
    }
}

#[async_trait]
impl ScheduleIndex for RedisScheduleIndex {
    async fn add(&self, job_id: JobId, at: DateTime<Utc>) {
        self.update(job_id, at).await
    }

    async fn remove(&self, job_id: JobId) {
        let key = self.key();
        let member = job_id.to_string();
        self.breaker
            .call("schedule_index.remove", (), || async {
                let mut conn = self.client.conn();
                let _: () = conn.zrem(&key, &member).await?;
                Ok::<(), redis::RedisError>(())
            })
            .await
    }

    async fn remove_bulk(&self, job_ids: &[JobId]) {
        if job_ids.is_empty() {
            return;
        }
        let key = self.key();
        let members: Vec<String> = job_ids.iter().map(|j| j.to_string()).collect();
        self.breaker
            .call("schedule_index.remove_bulk", (), || async {
                let mut conn = self.client.conn();
                let _: () = conn.zrem(&key, members).await?;
                Ok::<(), redis::RedisError>(())
            })
            .await
    }

    async fn update(&self, job_id: JobId, new_at: DateTime<Utc>) {
        let key = self.key();
        let member = job_id.to_string();
        let score = new_at.timestamp();
        self.breaker
            .call("schedule_index.update", (), || async {
                let mut conn = self.client.conn();
                let _: () = conn.zadd(&key, &member, score).await?;
                Ok::<(), redis::RedisError>(())
            })
            .await
    }

    async fn get_due(&self, now: DateTime<Utc>, limit: usize) -> Vec<JobId> {
        let key = self.key();
        let now_secs = now.timestamp();
        self.breaker
            .call("schedule_index.get_due", Vec::new(), || async {
                let mut conn = self.client.conn();
                let members: Vec<String> = conn
                    .zrangebyscore_limit(&key, "-inf", now_secs, 0, limit as isize)
                    .await?;
                Ok::<Vec<JobId>, redis::RedisError>(
                    members
                        .into_iter()
                        .filter_map(|m| Uuid::parse_str(&m).ok())
                        .map(JobId)
                        .collect(),
                )
            })
            .await
    }

    async fn get_time(&self, job_id: JobId) -> Option<DateTime<Utc>> {
        let key = self.key();
        let member = job_id.to_string();
        self.breaker
            .call("schedule_index.get_time", None, || async {
                let mut conn = self.client.conn();
                let score: Option<i64> = conn.zscore(&key, &member).await?;
                Ok::<Option<DateTime<Utc>>, redis::RedisError>(
                    score.and_then(|s| DateTime::from_timestamp(s, 0)),
                )
            })
            .await
    }

    async fn count(&self) -> u64 {
        let key = self.key();
        self.breaker
            .call("schedule_index.count", 0, || async {
                let mut conn = self.client.conn();
                let count: u64 = conn.zcard(&key).await?;
                Ok::<u64, redis::RedisError>(count)
            })
            .await
    }
}

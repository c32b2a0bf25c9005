use crate::circuit_breaker::CircuitBreaker;
use crate::client::CoordinationClient;
use async_trait::async_trait;
use milvaion_common::model::JobId;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::sync::Arc;

/// Atomic "is this job currently executing" set, used only to enforce
/// `ConcurrentPolicy::Skip`.
#[async_trait]
pub trait RunningSet: Send + Sync {
    async fn try_mark_running(&self, job_id: JobId) -> bool;
    async fn mark_completed(&self, job_id: JobId);
    async fn is_running(&self, job_id: JobId) -> bool;
    async fn filter_running(&self, job_ids: &[JobId]) -> Vec<JobId>;
}

pub struct RedisRunningSet {
    client: CoordinationClient,
    breaker: Arc<CircuitBreaker>,
}

impl RedisRunningSet {
    pub fn new(client: CoordinationClient, breaker: Arc<CircuitBreaker>) -> Arc<Self> {
        Arc::new(Self { client, breaker })
    }

    fn key(&self) -> String {
        self.client.key("running")
    }
}

#[async_trait]
impl RunningSet for RedisRunningSet {
    async fn try_mark_running(&self, job_id: JobId) -> bool {
        let key = self.key();
        let member = job_id.to_string();
        self.breaker
            .call("running_set.try_mark_running", false, || async {
                let mut conn = self.client.conn();
                let added: i64 = conn.sadd(&key, &member).await?;
                Ok::<bool, redis::RedisError>(added == 1)
            })
            .await
    }

    async fn mark_completed(&self, job_id: JobId) {
        let key = self.key();
        let member = job_id.to_string();
        self.breaker
            .call("running_set.mark_completed", (), || async {
                let mut conn = self.client.conn();
                let _: () = conn.srem(&key, &member).await?;
                Ok::<(), redis::RedisError>(())
            })
            .await
    }

    async fn is_running(&self, job_id: JobId) -> bool {
        let key = self.key();
        let member = job_id.to_string();
        self.breaker
            .call("running_set.is_running", false, || async {
                let mut conn = self.client.conn();
                let present: bool = conn.sismember(&key, &member).await?;
                Ok::<bool, redis::RedisError>(present)
            })
            .await
    }

    async fn filter_running(&self, job_ids: &[JobId]) -> Vec<JobId> {
        if job_ids.is_empty() {
            return Vec::new();
        }
        let key = self.key();
        let ids = job_ids.to_vec();
        self.breaker
            .call("running_set.filter_running", Vec::new(), || async {
                let mut conn = self.client.conn();
                let members: HashSet<String> = conn.smembers(&key).await?;
                Ok::<Vec<JobId>, redis::RedisError>(
                    ids.into_iter()
                        .filter(|id| members.contains(&id.to_string()))
                        .collect(),
                )
            })
            .await
    }
}

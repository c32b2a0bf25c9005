use crate::circuit_breaker::CircuitBreaker;
use crate::client::CoordinationClient;
use async_trait::async_trait;
use milvaion_common::config::WorkerRegistryConfig;
use milvaion_common::model::{WorkerClass, WorkerInstance, WorkerInstanceId};
use redis::AsyncCommands;
use std::sync::Arc;

/// Instance registration, heartbeat, and capacity accounting. TTL decay is the only
/// partition-safe liveness signal — a crashed worker cannot send a goodbye.
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    async fn register(&self, class: WorkerClass, instance: WorkerInstance);
    async fn heartbeat(&self, instance: WorkerInstance);
    async fn get_worker(&self, class: &str) -> Option<WorkerClass>;
    async fn list_workers(&self, class: &str) -> Vec<WorkerInstance>;
    async fn capacity(&self, class: &str) -> u32;
    async fn consumer_capacity(&self, class: &str, job_kind: &str) -> i64;
    async fn increment_consumer_counter(&self, class: &str, job_kind: &str);
    async fn decrement_consumer_counter(&self, class: &str, job_kind: &str);
}

pub struct RedisWorkerRegistry {
    client: CoordinationClient,
    breaker: Arc<CircuitBreaker>,
    config: WorkerRegistryConfig,
}

impl RedisWorkerRegistry {
    pub fn new(
        client: CoordinationClient,
        breaker: Arc<CircuitBreaker>,
        config: WorkerRegistryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            breaker,
            config,
        })
    }

    fn class_key(&self, class: &str) -> String {
        self.client.key(&format!("workerclass:{class}"))
    }

    fn instances_key(&self, class: &str) -> String {
        self.client.key(&format!("workerinstances:{class}"))
    }

    fn instance_key(&self, class: &str, instance: &WorkerInstanceId) -> String {
        self.client.key(&format!("workerinstance:{class}:{instance}"))
    }

    fn counter_key(&self, class: &str, job_kind: &str) -> String {
        self.client.key(&format!("consumercounter:{class}:{job_kind}"))
    }
}

#[async_trait]
impl WorkerRegistry for RedisWorkerRegistry {
    async fn register(&self, class: WorkerClass, instance: WorkerInstance) {
        let class_key = self.class_key(&class.name);
        let instances_key = self.instances_key(&class.name);
        let instance_key = self.instance_key(&class.name, &instance.instance_id);
        let class_ttl = self.config.class_ttl_seconds;
        let instance_ttl = self.config.instance_ttl_seconds;
        let class_json = serde_json::to_string(&class).unwrap_or_default();
        let instance_json = serde_json::to_string(&instance).unwrap_or_default();
        let member = instance.instance_id.0.clone();
        self.breaker
            .call("worker_registry.register", (), || async {
                let mut conn = self.client.conn();
                let _: () = redis::pipe()
                    .atomic()
                    .set_ex(&class_key, &class_json, class_ttl)
                    .sadd(&instances_key, &member)
                    .expire(&instances_key, class_ttl as i64)
                    .set_ex(&instance_key, &instance_json, instance_ttl)
                    .query_async(&mut conn)
                    .await?;
                Ok::<(), redis::RedisError>(())
            })
            .await
    }

    async fn heartbeat(&self, instance: WorkerInstance) {
        let class_key = self.class_key(&instance.worker_class);
        let instance_key = self.instance_key(&instance.worker_class, &instance.instance_id);
        let class_ttl = self.config.class_ttl_seconds;
        let instance_ttl = self.config.instance_ttl_seconds;
        let instance_json = serde_json::to_string(&instance).unwrap_or_default();
        self.breaker
            .call("worker_registry.heartbeat", (), || async {
                let mut conn = self.client.conn();
                let _: () = redis::pipe()
                    .atomic()
                    .set_ex(&instance_key, &instance_json, instance_ttl)
                    .expire(&class_key, class_ttl as i64)
                    .query_async(&mut conn)
                    .await?;
                Ok::<(), redis::RedisError>(())
            })
            .await
    }

    async fn get_worker(&self, class: &str) -> Option<WorkerClass> {
        let class_key = self.class_key(class);
        self.breaker
            .call("worker_registry.get_worker", None, || async {
                let mut conn = self.client.conn();
                let raw: Option<String> = conn.get(&class_key).await?;
                Ok::<Option<WorkerClass>, redis::RedisError>(
                    raw.and_then(|s| serde_json::from_str(&s).ok()),
                )
            })
            .await
    }

    async fn list_workers(&self, class: &str) -> Vec<WorkerInstance> {
        let instances_key = self.instances_key(class);
        let class = class.to_string();
        self.breaker
            .call("worker_registry.list_workers", Vec::new(), || async {
                let mut conn = self.client.conn();
                let ids: Vec<String> = conn.smembers(&instances_key).await?;
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    let key = self.instance_key(&class, &WorkerInstanceId(id.clone()));
                    let raw: Option<String> = conn.get(&key).await?;
                    match raw.and_then(|s| serde_json::from_str::<WorkerInstance>(&s).ok()) {
                        Some(instance) => out.push(instance),
                        // Instance TTL expired; drop the now-stale membership entry.
                        None => {
                            let _: Result<(), _> = conn.srem(&instances_key, &id).await;
                        }
                    }
                }
                Ok::<Vec<WorkerInstance>, redis::RedisError>(out)
            })
            .await
    }

    async fn capacity(&self, class: &str) -> u32 {
        let Some(worker_class) = self.get_worker(class).await else {
            return 0;
        };
        let instances = self.list_workers(class).await;
        if instances.is_empty() {
            return 0;
        }
        worker_class.max_parallel_jobs * instances.len() as u32
    }

    async fn consumer_capacity(&self, class: &str, job_kind: &str) -> i64 {
        let key = self.counter_key(class, job_kind);
        self.breaker
            .call("worker_registry.consumer_capacity", 0, || async {
                let mut conn = self.client.conn();
                let count: i64 = conn.get(&key).await.unwrap_or(0);
                Ok::<i64, redis::RedisError>(count)
            })
            .await
    }

    async fn increment_consumer_counter(&self, class: &str, job_kind: &str) {
        let key = self.counter_key(class, job_kind);
        self.breaker
            .call("worker_registry.increment_consumer_counter", (), || async {
                let mut conn = self.client.conn();
                let _: () = redis::pipe()
                    .atomic()
                    .incr(&key, 1)
                    .expire(&key, 3600)
                    .query_async(&mut conn)
                    .await?;
                Ok::<(), redis::RedisError>(())
            })
            .await
    }

    async fn decrement_consumer_counter(&self, class: &str, job_kind: &str) {
        let key = self.counter_key(class, job_kind);
        self.breaker
            .call("worker_registry.decrement_consumer_counter", (), || async {
                let mut conn = self.client.conn();
                let value: i64 = conn.decr(&key, 1).await?;
                if value < 0 {
                    let _: () = conn.set(&key, 0).await?;
                }
                let _: () = conn.expire(&key, 3600).await?;
                Ok::<(), redis::RedisError>(())
            })
            .await
    }
}

impl std::fmt::Debug for RedisWorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWorkerRegistry").finish_non_exhaustive()
    }
}

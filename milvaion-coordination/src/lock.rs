use crate::circuit_breaker::CircuitBreaker;
use crate::client::CoordinationClient;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Owner-scoped distributed locks. `release`/`extend` are atomic check-owner-then-act
/// server-side scripts so a node can never release or extend a lock it does not hold.
#[async_trait]
pub trait LockManager: Send + Sync {
    async fn try_acquire(&self, resource_id: &str, owner_id: &str, ttl: Duration) -> bool;
    async fn release(&self, resource_id: &str, owner_id: &str) -> bool;
    async fn extend(&self, resource_id: &str, owner_id: &str, ttl: Duration) -> bool;
    async fn owner(&self, resource_id: &str) -> Option<String>;
    async fn is_locked(&self, resource_id: &str) -> bool;
}

pub struct RedisLockManager {
    client: CoordinationClient,
    breaker: Arc<CircuitBreaker>,
}

impl RedisLockManager {
    pub fn new(client: CoordinationClient, breaker: Arc<CircuitBreaker>) -> Arc<Self> {
        Arc::new(Self { client, breaker })
    }

    fn key(&self, resource_id: &str) -> String {
        self.client.key(&format!("lock:{resource_id}"))
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn try_acquire(&self, resource_id: &str, owner_id: &str, ttl: Duration) -> bool {
        let key = self.key(resource_id);
        let owner_id = owner_id.to_string();
        let ttl_ms = ttl.as_millis() as usize;
        self.breaker
            .call("lock.try_acquire", false, || async {
                let mut conn = self.client.conn();
                let acquired: bool = redis::cmd("SET")
                    .arg(&key)
                    .arg(&owner_id)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async::<Option<String>>(&mut conn)
                    .await?
                    .is_some();
                Ok::<bool, redis::RedisError>(acquired)
            })
            .await
    }

    async fn release(&self, resource_id: &str, owner_id: &str) -> bool {
        let key = self.key(resource_id);
        let owner_id = owner_id.to_string();
        self.breaker
            .call("lock.release", false, || async {
                let mut conn = self.client.conn();
                let freed: i32 = redis::Script::new(RELEASE_SCRIPT)
                    .key(&key)
                    .arg(&owner_id)
                    .invoke_async(&mut conn)
                    .await?;
                Ok::<bool, redis::RedisError>(freed == 1)
            })
            .await
    }

    async fn extend(&self, resource_id: &str, owner_id: &str, ttl: Duration) -> bool {
        let key = self.key(resource_id);
        let owner_id = owner_id.to_string();
        let ttl_ms = ttl.as_millis() as usize;
        self.breaker
            .call("lock.extend", false, || async {
                let mut conn = self.client.conn();
                let extended: i32 = redis::Script::new(EXTEND_SCRIPT)
                    .key(&key)
                    .arg(&owner_id)
                    .arg(ttl_ms)
                    .invoke_async(&mut conn)
                    .await?;
                Ok::<bool, redis::RedisError>(extended == 1)
            })
            .await
    }

    async fn owner(&self, resource_id: &str) -> Option<String> {
        let key = self.key(resource_id);
        self.breaker
            .call("lock.owner", None, || async {
                let mut conn = self.client.conn();
                let owner: Option<String> = conn.get(&key).await?;
                Ok::<Option<String>, redis::RedisError>(owner)
            })
            .await
    }

    async fn is_locked(&self, resource_id: &str) -> bool {
        self.owner(resource_id).await.is_some()
    }
}

use crate::client::CoordinationClient;
use async_trait::async_trait;
use milvaion_common::model::{JobId, OccurrenceId};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationSignal {
    pub correlation_id: OccurrenceId,
    pub job_id: JobId,
    pub occurrence_id: OccurrenceId,
    pub reason: String,
}

/// Single pub/sub channel for best-effort in-flight cancellation. Delivery is not
/// guaranteed; operators who need certainty must also poll occurrence status.
#[async_trait]
pub trait CancellationBus: Send + Sync {
    async fn publish(&self, signal: CancellationSignal) -> Result<(), crate::error::CoordinationError>;
}

pub struct RedisCancellationBus {
    client: CoordinationClient,
}

impl RedisCancellationBus {
    pub fn new(client: CoordinationClient) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { client })
    }

    fn channel(&self) -> String {
        self.client.key("cancellation")
    }

    /// Opens a dedicated pub/sub connection and subscribes to the cancellation channel.
    /// Callers drive the returned stream themselves (worker SDKs, StatusTracker bookkeeping).
    pub async fn subscribe(
        &self,
    ) -> Result<redis::aio::PubSub, crate::error::CoordinationError> {
        let mut pubsub = self.client.raw_client().get_async_pubsub().await?;
        pubsub.subscribe(self.channel()).await?;
        Ok(pubsub)
    }
}

#[async_trait]
impl CancellationBus for RedisCancellationBus {
    async fn publish(&self, signal: CancellationSignal) -> Result<(), crate::error::CoordinationError> {
        let channel = self.channel();
        let payload = serde_json::to_string(&signal)
            .map_err(|e| crate::error::CoordinationError::LockNotHeld(e.to_string()))?;
        let mut conn = self.client.conn();
        let _: () = conn.publish(&channel, payload).await?;
        Ok(())
    }
}

use crate::error::CoordinationResult;
use milvaion_common::config::CoordinationConfig;
use redis::aio::ConnectionManager;
use redis::Client;

/// A cloned handle around redis's own `ConnectionManager`, which already multiplexes
/// one physical connection across concurrent callers and reconnects transparently.
#[derive(Clone)]
pub struct CoordinationClient {
    client: Client,
    manager: ConnectionManager,
    prefix: String,
}

impl CoordinationClient {
    pub async fn configured(config: &CoordinationConfig) -> CoordinationResult<Self> {
        let client = Client::open(config.connection_string())?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            client,
            manager,
            prefix: config.key_prefix.clone(),
        })
    }

    pub fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// A fresh dedicated connection, for operations (pub/sub) that cannot share the
    /// multiplexed [`ConnectionManager`].
    pub fn raw_client(&self) -> &Client {
        &self.client
    }

    pub fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }
}

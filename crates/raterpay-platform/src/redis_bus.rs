use anyhow::Result;
use redis::{AsyncCommands, Client};
use serde::Serialize;

/// Channel the gateway publishes to whenever new pending payouts exist, so
/// the worker can sweep the affected users without waiting for the next
/// scheduled pass.
pub const PAYOUTS_REQUESTED_CHANNEL: &str = "payouts.requested";

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }
}

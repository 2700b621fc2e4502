//! Aviso de despertar sobre Redis pub/sub: `PUBLISH <canal> <tenant>`.

use async_trait::async_trait;
use fanout_core::{TransportError, WakePublisher};
use log::debug;
use redis::AsyncCommands;

pub struct RedisWakePublisher {
    client: redis::Client,
    channel: String,
}

impl RedisWakePublisher {
    pub fn new(client: redis::Client, channel: impl Into<String>) -> Self {
        Self { client, channel: channel.into() }
    }

    pub fn open(url: &str, channel: impl Into<String>) -> Result<Self, TransportError> {
        let client = redis::Client::open(url).map_err(|e| TransportError::Unavailable(format!("redis open: {e}")))?;
        Ok(Self::new(client, channel))
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl WakePublisher for RedisWakePublisher {
    async fn publish(&self, tenant: &str) -> Result<(), TransportError> {
        let mut conn = self.client
                           .get_multiplexed_async_connection()
                           .await
                           .map_err(|e| TransportError::Unavailable(format!("redis connect: {e}")))?;
        let receivers: i64 = conn.publish(&self.channel, tenant)
                                 .await
                                 .map_err(|e| TransportError::Unavailable(format!("redis publish: {e}")))?;
        debug!("wake:published tenant={tenant} channel={} receivers={receivers}", self.channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::WAKE_CHANNEL;

    #[test]
    fn open_keeps_the_channel() {
        let wake = RedisWakePublisher::open("redis://127.0.0.1:6379", WAKE_CHANNEL).unwrap();
        assert_eq!(wake.channel(), WAKE_CHANNEL);
    }

    #[test]
    fn open_rejects_malformed_url() {
        assert!(matches!(RedisWakePublisher::open("not a url", WAKE_CHANNEL), Err(TransportError::Unavailable(_))));
    }
}

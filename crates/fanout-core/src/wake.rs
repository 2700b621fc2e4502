//! Señal de wake: avisa a la entrega aguas abajo de que un tenant tiene
//! filas pendientes. La carga es únicamente el id del tenant.
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::errors::TransportError;

pub const WAKE_CHANNEL: &str = "distribute";

#[async_trait]
pub trait WakePublisher: Send + Sync {
    async fn publish(&self, tenant: &str) -> Result<(), TransportError>;
}

/// Publicador en proceso sobre un canal broadcast de tokio.
pub struct ChannelWakePublisher {
    tx: broadcast::Sender<String>,
}

impl ChannelWakePublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for ChannelWakePublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl WakePublisher for ChannelWakePublisher {
    async fn publish(&self, tenant: &str) -> Result<(), TransportError> {
        // Sin suscriptores no es un error: nadie está drenando todavía.
        let _ = self.tx.send(tenant.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_tenant_id() {
        let wake = ChannelWakePublisher::default();
        let mut rx = wake.subscribe();
        wake.publish("t1").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "t1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let wake = ChannelWakePublisher::new(0);
        assert!(wake.publish("t1").await.is_ok());
    }
}

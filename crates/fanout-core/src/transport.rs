//! Colaborador de mensajería externo. El motor sólo conoce estas dos vistas:
//! el mensaje entrante tal como llega del messenger y la petición de envío a
//! un destinatario concreto.
use async_trait::async_trait;
use fanout_domain::payload::encode_data;
use fanout_domain::{unique_conversation_id, DistributeRecord, CATEGORY_PLAIN_TEXT};
use serde::{Deserialize, Serialize};

use crate::errors::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub sender_id: String,
    pub message_id: String,
    pub category: String,
    /// base64.
    pub data: String,
    #[serde(default)]
    pub quote_message_id: Option<String>,
    #[serde(default)]
    pub representative_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub conversation_id: String,
    pub recipient_id: String,
    pub message_id: String,
    pub category: String,
    pub data: String,
    pub representative_id: Option<String>,
    pub quote_message_id: Option<String>,
}

impl OutboundMessage {
    /// Texto plano del tenant a un usuario (avisos del sistema).
    pub fn text(tenant: &str, recipient: &str, text: &str) -> Self {
        Self { conversation_id: unique_conversation_id(tenant, recipient),
               recipient_id: recipient.to_string(),
               message_id: uuid::Uuid::new_v4().to_string(),
               category: CATEGORY_PLAIN_TEXT.to_string(),
               data: encode_data(text.as_bytes()),
               representative_id: None,
               quote_message_id: None }
    }
}

impl From<&DistributeRecord> for OutboundMessage {
    fn from(r: &DistributeRecord) -> Self {
        Self { conversation_id: r.conversation_id.clone(),
               recipient_id: r.user_id.clone(),
               message_id: r.message_id.clone(),
               category: r.category.clone(),
               data: r.data.clone(),
               representative_id: r.representative_id.clone(),
               quote_message_id: r.quote_message_id.clone() }
    }
}

#[async_trait]
pub trait MessengerTransport: Send + Sync {
    async fn send_message(&self, msg: &OutboundMessage) -> Result<(), TransportError>;
}

/// Transporte que sólo registra los envíos en el log. Sirve a despliegues
/// donde la entrega real drena `distribute_messages` aguas abajo.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTransport;

#[async_trait]
impl MessengerTransport for LoggingTransport {
    async fn send_message(&self, msg: &OutboundMessage) -> Result<(), TransportError> {
        log::info!("transport:send recipient={} message={} category={}",
                   msg.recipient_id,
                   msg.message_id,
                   msg.category);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_domain::payload::decode_data;

    #[test]
    fn system_text_goes_to_the_recipient_conversation() {
        let msg = OutboundMessage::text("t1", "u1", "hola");
        assert_eq!(msg.conversation_id, unique_conversation_id("t1", "u1"));
        assert_eq!(decode_data(&msg.data).unwrap(), b"hola");
        assert_eq!(msg.representative_id, None);
    }

    #[test]
    fn inbound_optional_fields_default_to_none() {
        let inbound: InboundMessage = serde_json::from_str(
            r#"{"sender_id":"u1","message_id":"m1","category":"PLAIN_TEXT","data":""}"#,
        ).unwrap();
        assert_eq!(inbound.quote_message_id, None);
        assert_eq!(inbound.representative_id, None);
    }

    #[tokio::test]
    async fn logging_transport_accepts_everything() {
        let msg = OutboundMessage::text("t1", "u1", "x");
        assert!(LoggingTransport.send_message(&msg).await.is_ok());
    }
}

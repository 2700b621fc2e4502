//! Mensaje canónico: el registro autoritativo de un mensaje lógico antes de
//! expandirse a los destinatarios.
//!
//! Ciclo de vida (`MessageStatus`):
//! - `Pending`: recién ingerido, espera la pasada de prioridad alta.
//! - `Privileged`: ya expandido a la prioridad alta, espera la pasada baja.
//! - `Finished`: expandido a todos los niveles (o descartado sin expansión).
//! - `Recalled` / `Pinned`: marcados por mensajes de control posteriores.
//!
//! El mensaje nunca se borra; sólo avanza de estado.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;
use crate::{TenantId, UserId};

pub const CATEGORY_RECALL: &str = "MESSAGE_RECALL";
pub const CATEGORY_PIN: &str = "MESSAGE_PIN";
pub const CATEGORY_PLAIN_TRANSCRIPT: &str = "PLAIN_TRANSCRIPT";
pub const CATEGORY_ENCRYPTED_TRANSCRIPT: &str = "ENCRYPTED_TRANSCRIPT";
pub const CATEGORY_PLAIN_TEXT: &str = "PLAIN_TEXT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Normal,
    Pending,
    Privileged,
    Finished,
    Recalled,
    Pinned,
}

impl MessageStatus {
    /// Código persistido (columna `messages.status`).
    pub fn code(self) -> i16 {
        match self {
            MessageStatus::Normal => 1,
            MessageStatus::Pending => 2,
            MessageStatus::Privileged => 3,
            MessageStatus::Finished => 4,
            MessageStatus::Recalled => 5,
            MessageStatus::Pinned => 6,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, PayloadError> {
        Ok(match code {
            1 => MessageStatus::Normal,
            2 => MessageStatus::Pending,
            3 => MessageStatus::Privileged,
            4 => MessageStatus::Finished,
            5 => MessageStatus::Recalled,
            6 => MessageStatus::Pinned,
            code => return Err(PayloadError::UnknownCode { kind: "message status", code }),
        })
    }

    /// Estados de mensajes que ya llegaron al menos a un destinatario y por
    /// tanto son candidatos a reenvío en catch-up.
    pub fn delivered() -> [MessageStatus; 3] {
        [MessageStatus::Privileged, MessageStatus::Finished, MessageStatus::Pinned]
    }
}

/// Clasificación de la categoría del messenger según la reescritura que
/// requiere al expandirse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Content,
    Recall,
    Pin,
    Transcript,
}

impl ControlKind {
    pub fn of(category: &str) -> Self {
        match category {
            CATEGORY_RECALL => ControlKind::Recall,
            CATEGORY_PIN => ControlKind::Pin,
            CATEGORY_PLAIN_TRANSCRIPT | CATEGORY_ENCRYPTED_TRANSCRIPT => ControlKind::Transcript,
            _ => ControlKind::Content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub tenant_id: TenantId,
    pub message_id: String,
    pub user_id: UserId,
    pub category: String,
    /// Payload opaco, codificado en base64 para el transporte.
    pub data: String,
    pub quote_message_id: Option<String>,
    pub representative_id: Option<UserId>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl CanonicalMessage {
    pub fn new(tenant_id: impl Into<String>,
               message_id: impl Into<String>,
               user_id: impl Into<String>,
               category: impl Into<String>,
               data: impl Into<String>)
               -> Self {
        Self { tenant_id: tenant_id.into(),
               message_id: message_id.into(),
               user_id: user_id.into(),
               category: category.into(),
               data: data.into(),
               quote_message_id: None,
               representative_id: None,
               status: MessageStatus::Pending,
               created_at: Utc::now() }
    }

    pub fn with_quote(mut self, quote_message_id: impl Into<String>) -> Self {
        self.quote_message_id = Some(quote_message_id.into());
        self
    }

    pub fn with_representative(mut self, representative_id: impl Into<String>) -> Self {
        self.representative_id = Some(representative_id.into());
        self
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn control_kind(&self) -> ControlKind {
        ControlKind::of(&self.category)
    }
}

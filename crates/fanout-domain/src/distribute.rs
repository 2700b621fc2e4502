//! Registro de distribución: la copia de un mensaje canónico para un
//! destinatario concreto.
//!
//! Invariantes:
//! - Único por (tenant, destinatario, `origin_message_id`).
//! - `message_id` es local al destinatario (uuid v4 nuevo) y nunca coincide
//!   con el id canónico, porque recall/pin llevan payloads distintos por
//!   destinatario.
//! - `representative_id` vacío en los recalls.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;
use crate::membership::PriorityTier;
use crate::{TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributeStatus {
    Pending,
    Finished,
    Pinned,
    /// Copia creada por el camino de catch-up, fuera de la cola normal de
    /// entrega; pasa a `Finished` cuando el envío directo tiene éxito.
    Standalone,
}

impl DistributeStatus {
    pub fn code(self) -> i16 {
        match self {
            DistributeStatus::Pending => 1,
            DistributeStatus::Finished => 2,
            DistributeStatus::Pinned => 3,
            DistributeStatus::Standalone => 4,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, PayloadError> {
        Ok(match code {
            1 => DistributeStatus::Pending,
            2 => DistributeStatus::Finished,
            3 => DistributeStatus::Pinned,
            4 => DistributeStatus::Standalone,
            code => return Err(PayloadError::UnknownCode { kind: "distribute status", code }),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributeRecord {
    pub tenant_id: TenantId,
    /// Destinatario.
    pub user_id: UserId,
    pub shard_id: String,
    pub conversation_id: String,
    pub origin_message_id: String,
    pub message_id: String,
    pub quote_message_id: Option<String>,
    pub category: String,
    pub data: String,
    pub representative_id: Option<UserId>,
    pub level: PriorityTier,
    pub status: DistributeStatus,
    pub created_at: DateTime<Utc>,
}

impl DistributeRecord {
    /// Clave de idempotencia del registro.
    pub fn dedup_key(&self) -> (&str, &str, &str) {
        (&self.tenant_id, &self.user_id, &self.origin_message_id)
    }
}

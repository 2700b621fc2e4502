//! Membresía de un usuario en un tenant: nivel de prioridad, estado de
//! habla y silenciamiento.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;
use crate::{TenantId, UserId};

/// Nivel de prioridad de entrega. `High` recibe primero; `Pending` marca a
/// un miembro con un backfill en curso; `Stop` no recibe nada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityTier {
    High,
    Low,
    Pending,
    Stop,
}

impl PriorityTier {
    pub fn code(self) -> i16 {
        match self {
            PriorityTier::High => 1,
            PriorityTier::Low => 2,
            PriorityTier::Pending => 3,
            PriorityTier::Stop => 4,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, PayloadError> {
        Ok(match code {
            1 => PriorityTier::High,
            2 => PriorityTier::Low,
            3 => PriorityTier::Pending,
            4 => PriorityTier::Stop,
            code => return Err(PayloadError::UnknownCode { kind: "priority tier", code }),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    Audience,
    Member,
    Manager,
    Blocked,
}

impl MemberStatus {
    pub fn code(self) -> i16 {
        match self {
            MemberStatus::Audience => 1,
            MemberStatus::Member => 2,
            MemberStatus::Manager => 3,
            MemberStatus::Blocked => 4,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, PayloadError> {
        Ok(match code {
            1 => MemberStatus::Audience,
            2 => MemberStatus::Member,
            3 => MemberStatus::Manager,
            4 => MemberStatus::Blocked,
            code => return Err(PayloadError::UnknownCode { kind: "member status", code }),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMember {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub priority: PriorityTier,
    pub status: MemberStatus,
    pub muted_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Resultado de evaluar el silenciamiento de un miembro en un instante.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteState {
    Speaking,
    Muted { hours: i64, minutes: i64 },
}

impl TenantMember {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>, priority: PriorityTier) -> Self {
        Self { tenant_id: tenant_id.into(),
               user_id: user_id.into(),
               priority,
               status: MemberStatus::Member,
               muted_until: None,
               created_at: Utc::now() }
    }

    /// Tiempo restante de silencio (horas completas + minutos) o `Speaking`.
    pub fn mute_state(&self, now: DateTime<Utc>) -> MuteState {
        match self.muted_until {
            Some(until) if until > now => {
                let remaining = until - now;
                let hours = remaining.num_hours();
                let minutes = remaining.num_minutes() - hours * 60;
                MuteState::Muted { hours, minutes }
            }
            _ => MuteState::Speaking,
        }
    }
}

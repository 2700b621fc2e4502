//! Acciones de moderación. Todas escriben primero en el store y después en
//! la cache del gate.
use std::sync::Arc;

use chrono::{Duration, Utc};
use fanout_domain::payload::encode_json;
use fanout_domain::{CanonicalMessage, MemberStatus, MessageStatus, PriorityTier, RecallBody, CATEGORY_RECALL};
use log::info;
use uuid::Uuid;

use crate::errors::FanoutError;
use crate::gate::EligibilityGate;
use crate::store::{require_tenant, SharedStore};

/// Silencio máximo: un año.
pub const MAX_MUTE_HOURS: u32 = 24 * 365;

pub struct Moderation {
    store: SharedStore,
    gate: Arc<EligibilityGate>,
}

impl Moderation {
    pub fn new(store: SharedStore, gate: Arc<EligibilityGate>) -> Self {
        Self { store, gate }
    }

    async fn require_member(&self, tenant: &str, user: &str) -> Result<(), FanoutError> {
        require_tenant(self.store.as_ref(), tenant).await?;
        match self.store.get_member(tenant, user).await? {
            Some(_) => Ok(()),
            None => Err(FanoutError::UnknownMember { tenant: tenant.into(), user: user.into() }),
        }
    }

    /// Bloquea al miembro y retira sus mensajes de la última hora. Devuelve
    /// cuántos recalls se generaron.
    pub async fn block_member(&self, tenant: &str, user: &str) -> Result<usize, FanoutError> {
        self.require_member(tenant, user).await?;
        self.store
            .update_member_priority_and_status(tenant, user, PriorityTier::Stop, MemberStatus::Blocked)
            .await?;
        self.gate.block_member(tenant, user).await?;

        let since = Utc::now() - Duration::hours(1);
        let recent = self.store.messages_by_sender_since(tenant, user, MessageStatus::Finished, since).await?;
        for msg in &recent {
            self.insert_recall(tenant, &msg.message_id, user).await?;
        }
        info!("moderation:block tenant={} user={} recalled={}", tenant, user, recent.len());
        Ok(recent.len())
    }

    /// Quita el bloqueo y devuelve al miembro al nivel bajo.
    pub async fn unblock_member(&self, tenant: &str, user: &str) -> Result<(), FanoutError> {
        self.require_member(tenant, user).await?;
        self.gate.unblock_member(tenant, user).await?;
        self.store
            .update_member_priority_and_status(tenant, user, PriorityTier::Low, MemberStatus::Member)
            .await?;
        info!("moderation:unblock tenant={} user={}", tenant, user);
        Ok(())
    }

    pub async fn block_globally(&self, user: &str) -> Result<(), FanoutError> {
        self.gate.block_globally(user).await?;
        info!("moderation:block_global user={}", user);
        Ok(())
    }

    /// Silencia `hours` horas (como mucho `MAX_MUTE_HOURS`); `0` levanta el
    /// silencio.
    pub async fn mute_member(&self, tenant: &str, user: &str, hours: u32) -> Result<(), FanoutError> {
        if hours > MAX_MUTE_HOURS {
            return Err(FanoutError::InvalidMute { hours, max: MAX_MUTE_HOURS });
        }
        self.require_member(tenant, user).await?;
        let until = match hours {
            0 => None,
            h => Some(Utc::now().checked_add_signed(Duration::hours(i64::from(h)))
                                .ok_or(FanoutError::InvalidMute { hours, max: MAX_MUTE_HOURS })?),
        };
        self.store.update_member_mute(tenant, user, until).await?;
        info!("moderation:mute tenant={} user={} hours={}", tenant, user, hours);
        Ok(())
    }

    /// Registra un recall del mensaje `message_id` en nombre de `sender`, de
    /// modo que el emisor original queda fuera de la expansión.
    pub async fn recall_as_manager(&self, tenant: &str, message_id: &str, sender: &str) -> Result<String, FanoutError> {
        require_tenant(self.store.as_ref(), tenant).await?;
        self.insert_recall(tenant, message_id, sender).await
    }

    async fn insert_recall(&self, tenant: &str, message_id: &str, sender: &str) -> Result<String, FanoutError> {
        let data = encode_json(&RecallBody { message_id: message_id.to_string() })?;
        let recall = CanonicalMessage::new(tenant, Uuid::new_v4().to_string(), sender, CATEGORY_RECALL, data);
        self.store.insert_message(&recall).await?;
        Ok(recall.message_id)
    }
}

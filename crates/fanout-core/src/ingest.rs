//! Ingesta: convierte un mensaje entrante del messenger en un mensaje canónico
//! `Pending` que el scheduler del tenant recogerá.
use std::sync::Arc;

use chrono::Utc;
use fanout_domain::{CanonicalMessage, ControlKind, MemberStatus, MuteState};
use log::debug;

use crate::errors::{FanoutError, InsertOutcome};
use crate::gate::EligibilityGate;
use crate::store::SharedStore;
use crate::transport::InboundMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// El id de mensaje ya estaba registrado.
    Duplicate,
    Blocked,
    Muted { hours: i64, minutes: i64 },
    NotMember,
}

pub struct Ingestor {
    store: SharedStore,
    gate: Arc<EligibilityGate>,
}

impl Ingestor {
    pub fn new(store: SharedStore, gate: Arc<EligibilityGate>) -> Self {
        Self { store, gate }
    }

    pub async fn ingest(&self, tenant: &str, inbound: InboundMessage) -> Result<IngestOutcome, FanoutError> {
        let sender = inbound.sender_id.as_str();
        // El propio tenant (bot) siempre puede publicar
        if sender != tenant {
            if self.gate.is_excluded(tenant, sender) {
                debug!("ingest:blocked tenant={} user={}", tenant, sender);
                return Ok(IngestOutcome::Blocked);
            }
            let Some(member) = self.store.get_member(tenant, sender).await? else {
                return Ok(IngestOutcome::NotMember);
            };
            if member.status == MemberStatus::Blocked {
                return Ok(IngestOutcome::Blocked);
            }
            // Se puede retirar un mensaje propio estando silenciado
            if ControlKind::of(&inbound.category) != ControlKind::Recall {
                if let MuteState::Muted { hours, minutes } = member.mute_state(Utc::now()) {
                    debug!("ingest:muted tenant={} user={} hours={} minutes={}", tenant, sender, hours, minutes);
                    return Ok(IngestOutcome::Muted { hours, minutes });
                }
            }
        }

        let mut msg = CanonicalMessage::new(tenant,
                                            inbound.message_id,
                                            inbound.sender_id,
                                            inbound.category,
                                            inbound.data);
        msg.quote_message_id = inbound.quote_message_id.filter(|q| !q.is_empty());
        msg.representative_id = inbound.representative_id.filter(|r| !r.is_empty());

        match self.store.insert_message(&msg).await? {
            InsertOutcome::Inserted(_) => {
                debug!("ingest:accepted tenant={} msg={} category={}", tenant, msg.message_id, msg.category);
                Ok(IngestOutcome::Accepted)
            }
            InsertOutcome::AlreadyExists => Ok(IngestOutcome::Duplicate),
        }
    }
}

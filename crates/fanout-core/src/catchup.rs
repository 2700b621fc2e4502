//! Reenvío del backlog a un único destinatario, fuera de la cola normal.
//!
//! Cada copia se registra primero como `Standalone` (única por
//! tenant/destinatario/origen, así que un reenvío repetido no duplica nada) y
//! se envía directamente; si el envío va bien pasa a `Finished`, si no queda
//! `Standalone` para `flush_standalone`.
//!
//! El cursor avanza: `resend` devuelve el `created_at` más nuevo del lote y la
//! siguiente llamada sólo ve mensajes estrictamente posteriores. `None`
//! indica que no quedaba nada.
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fanout_domain::payload::encode_json;
use fanout_domain::{unique_conversation_id, CanonicalMessage, DistributeRecord, DistributeStatus, MessageStatus,
                    PinAction, PinBody, PriorityTier, CATEGORY_PIN, CATEGORY_RECALL};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{FanoutError, InsertOutcome, StoreError};
use crate::shard::DEFAULT_SHARD;
use crate::store::{require_tenant, MessageQuery, SharedStore};
use crate::transport::{MessengerTransport, OutboundMessage};

const EXCLUDED: [&str; 2] = [CATEGORY_RECALL, CATEGORY_PIN];
/// Ventana de mensajes recientes del backfill de bienvenida.
const BACKFILL_WINDOW_HOURS: i64 = 24;

pub struct CatchupEngine {
    store: SharedStore,
    transport: Arc<dyn MessengerTransport>,
    backfill_count: usize,
    max_rounds: usize,
}

impl CatchupEngine {
    pub fn new(store: SharedStore, transport: Arc<dyn MessengerTransport>, backfill_count: usize, max_rounds: usize) -> Self {
        Self { store, transport, backfill_count, max_rounds: max_rounds.max(1) }
    }

    /// Una ronda: mensajes entregados posteriores a `from`, del más nuevo al
    /// más antiguo, sin controles ni mensajes propios del destinatario.
    pub async fn resend(&self,
                        tenant: &str,
                        user: &str,
                        from: DateTime<Utc>)
                        -> Result<Option<DateTime<Utc>>, FanoutError> {
        require_tenant(self.store.as_ref(), tenant).await?;
        self.round(tenant, user, from).await
    }

    /// Repite `resend` hasta agotar el backlog. Devuelve las rondas hechas.
    pub async fn catch_up_from(&self, tenant: &str, user: &str, from: DateTime<Utc>) -> Result<usize, FanoutError> {
        require_tenant(self.store.as_ref(), tenant).await?;
        self.rounds_from(tenant, user, from).await
    }

    async fn round(&self, tenant: &str, user: &str, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, FanoutError> {
        let statuses = MessageStatus::delivered();
        let query = MessageQuery { after: Some(from), statuses: &statuses, excluded_categories: &EXCLUDED, limit: None };
        let msgs = self.store.query_messages(tenant, &query).await?;
        let Some(newest) = msgs.first().map(|m| m.created_at) else {
            debug!("catchup:done tenant={} user={}", tenant, user);
            return Ok(None);
        };
        let sent = self.deliver(tenant, user, &msgs).await?;
        debug!("catchup:round tenant={} user={} selected={} sent={} cursor={}",
               tenant, user, msgs.len(), sent, newest);
        Ok(Some(newest))
    }

    async fn rounds_from(&self, tenant: &str, user: &str, from: DateTime<Utc>) -> Result<usize, FanoutError> {
        let mut cursor = from;
        for round in 0..self.max_rounds {
            match self.round(tenant, user, cursor).await? {
                Some(next) => cursor = next,
                None => return Ok(round),
            }
        }
        Err(FanoutError::CatchupExhausted { rounds: self.max_rounds })
    }

    /// Bienvenida de un miembro: los últimos `backfill_count` mensajes del
    /// último día más todos los fijados, y luego el bucle de cursor. Mientras
    /// dura, el miembro queda en prioridad `Pending` para que el scheduler no
    /// le expanda mensajes en paralelo.
    pub async fn backfill_latest(&self, tenant: &str, user: &str) -> Result<usize, FanoutError> {
        require_tenant(self.store.as_ref(), tenant).await?;
        let member = self.store
                         .get_member(tenant, user)
                         .await?
                         .ok_or_else(|| FanoutError::UnknownMember { tenant: tenant.into(), user: user.into() })?;
        if member.priority == PriorityTier::Stop {
            debug!("catchup:backfill_skipped tenant={} user={} priority=stop", tenant, user);
            return Ok(0);
        }
        self.store.update_member_priority(tenant, user, PriorityTier::Pending).await?;
        let result = self.backfill_inner(tenant, user).await;
        // Se restaura aunque el backfill haya fallado
        self.store.update_member_priority(tenant, user, member.priority).await?;
        let sent = result?;
        info!("catchup:backfill tenant={} user={} sent={}", tenant, user, sent);
        Ok(sent)
    }

    async fn backfill_inner(&self, tenant: &str, user: &str) -> Result<usize, FanoutError> {
        let started = Utc::now();
        let since = started - Duration::hours(BACKFILL_WINDOW_HOURS);
        let statuses = MessageStatus::delivered();
        let latest = self.store
                         .query_messages(tenant,
                                         &MessageQuery { after: Some(since),
                                                         statuses: &statuses,
                                                         excluded_categories: &EXCLUDED,
                                                         limit: Some(self.backfill_count) })
                         .await?;
        let pinned = self.store
                         .query_messages(tenant,
                                         &MessageQuery { after: None,
                                                         statuses: &[MessageStatus::Pinned],
                                                         excluded_categories: &EXCLUDED,
                                                         limit: None })
                         .await?;

        let mut batch = latest.clone();
        for msg in pinned {
            if !batch.iter().any(|m| m.message_id == msg.message_id) {
                batch.push(msg);
            }
        }
        batch.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let sent = self.deliver(tenant, user, &batch).await?;

        let cursor = latest.first().map(|m| m.created_at).unwrap_or(started);
        self.rounds_from(tenant, user, cursor).await?;
        Ok(sent)
    }

    /// Reenvía las copias que quedaron `Standalone`.
    pub async fn flush_standalone(&self, tenant: &str, user: &str) -> Result<usize, FanoutError> {
        require_tenant(self.store.as_ref(), tenant).await?;
        let rows = self.store.distribute_by_user_status(tenant, user, DistributeStatus::Standalone).await?;
        let mut sent = 0;
        for row in &rows {
            if self.send_row(tenant, row).await? {
                sent += 1;
            }
        }
        debug!("catchup:flush tenant={} user={} rows={} sent={}", tenant, user, rows.len(), sent);
        Ok(sent)
    }

    /// Registra y envía `msgs` (del más nuevo al más antiguo) en orden
    /// cronológico; los compañeros de pin van al final.
    async fn deliver(&self, tenant: &str, user: &str, msgs: &[CanonicalMessage]) -> Result<usize, FanoutError> {
        let mut sent = 0;
        let mut companions = Vec::new();
        for msg in msgs.iter().rev().filter(|m| m.user_id != user) {
            let row = self.copy_row(tenant, user, msg);
            let local_id = match self.store.insert_distribute_batch(std::slice::from_ref(&row)).await? {
                InsertOutcome::Inserted(_) => {
                    if self.send_row(tenant, &row).await? {
                        sent += 1;
                    }
                    Some(row.message_id)
                }
                // Ya tiene copia: no se reenvía, pero el pin necesita su id local
                InsertOutcome::AlreadyExists => self.existing_local_id(tenant, user, &msg.message_id).await?,
            };
            if msg.status == MessageStatus::Pinned {
                if let Some(local_id) = local_id {
                    companions.push(self.pin_companion(tenant, user, msg, local_id)?);
                }
            }
        }
        for row in companions {
            if self.store.insert_distribute_batch(std::slice::from_ref(&row)).await?.inserted() > 0
               && self.send_row(tenant, &row).await?
            {
                sent += 1;
            }
        }
        Ok(sent)
    }

    fn copy_row(&self, tenant: &str, user: &str, msg: &CanonicalMessage) -> DistributeRecord {
        DistributeRecord { tenant_id: tenant.to_string(),
                           user_id: user.to_string(),
                           shard_id: DEFAULT_SHARD.to_string(),
                           conversation_id: unique_conversation_id(tenant, user),
                           origin_message_id: msg.message_id.clone(),
                           message_id: Uuid::new_v4().to_string(),
                           quote_message_id: None,
                           category: msg.category.clone(),
                           data: msg.data.clone(),
                           representative_id: Some(msg.user_id.clone()),
                           level: PriorityTier::Low,
                           status: DistributeStatus::Standalone,
                           created_at: Utc::now() }
    }

    /// Pin sintético que apunta a la copia local del destinatario. Su id es
    /// determinista por (destinatario, mensaje) y hace de origen.
    fn pin_companion(&self,
                     tenant: &str,
                     user: &str,
                     msg: &CanonicalMessage,
                     local_id: String)
                     -> Result<DistributeRecord, FanoutError> {
        let id = unique_conversation_id(user, &msg.message_id);
        let data = encode_json(&PinBody { action: PinAction::Pin, message_ids: vec![local_id] })?;
        Ok(DistributeRecord { tenant_id: tenant.to_string(),
                              user_id: user.to_string(),
                              shard_id: DEFAULT_SHARD.to_string(),
                              conversation_id: unique_conversation_id(tenant, user),
                              origin_message_id: id.clone(),
                              message_id: id,
                              quote_message_id: None,
                              category: CATEGORY_PIN.to_string(),
                              data,
                              representative_id: None,
                              level: PriorityTier::Low,
                              status: DistributeStatus::Standalone,
                              created_at: Utc::now() })
    }

    async fn existing_local_id(&self, tenant: &str, user: &str, origin: &str) -> Result<Option<String>, StoreError> {
        Ok(self.store
               .local_copies_by_origin(tenant, &[origin.to_string()])
               .await?
               .into_iter()
               .find(|c| c.user_id == user)
               .map(|c| c.message_id))
    }

    /// `true` si el transporte aceptó el mensaje.
    async fn send_row(&self, tenant: &str, row: &DistributeRecord) -> Result<bool, StoreError> {
        match self.transport.send_message(&OutboundMessage::from(row)).await {
            Ok(()) => {
                self.store
                    .update_distribute_status(tenant, std::slice::from_ref(&row.message_id), DistributeStatus::Finished)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                warn!("catchup:send_failed tenant={} user={} msg={} err={}", tenant, row.user_id, row.message_id, e);
                Ok(false)
            }
        }
    }
}

//! Expansión de un mensaje canónico a un `DistributeRecord` por destinatario.
//!
//! Orden de una expansión:
//! 1. Destinatarios de los niveles pedidos (orden de alta).
//! 2. Estado destino del canónico: alto -> `Privileged`, bajo -> `Finished`.
//! 3. Reescritura según la categoría (recall, pin/unpin, quote, transcript).
//! 4. Filtro: ni el emisor, ni el representante, ni bloqueados.
//! 5. Persistencia masiva y, sólo entonces, cambio de estado del canónico.
//!
//! Un payload de control ilegible o un objetivo sin copias no es un error y
//! no genera filas. El ilegible se marca `Finished` para no reprocesarlo; el
//! objetivo sin copias avanza al estado destino de la pasada, de modo que la
//! pasada baja (y el aviso de pin fallido) sigue ocurriendo.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use fanout_domain::payload::{decode_json, decode_transcript, encode_json, stamp_transcript};
use fanout_domain::{unique_conversation_id, CanonicalMessage, ControlKind, DistributeRecord, DistributeStatus,
                    MessageStatus, PinAction, PinBody, PriorityTier, RecallBody, TranscriptEntry, UserId};
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bulk::BulkWriter;
use crate::errors::{FanoutError, StoreError};
use crate::gate::EligibilityGate;
use crate::shard::ShardAssigner;
use crate::store::SharedStore;
use crate::transport::{MessengerTransport, OutboundMessage};

#[derive(Debug)]
pub struct Expansion {
    pub records: Vec<DistributeRecord>,
    pub target_status: MessageStatus,
    /// Cambio asíncrono de estado de las copias referenciadas por un pin.
    pub status_update: Option<JoinHandle<()>>,
}

impl Expansion {
    fn empty(target_status: MessageStatus) -> Self {
        Self { records: Vec::new(), target_status, status_update: None }
    }
}

/// Id del mensaje citado tal como lo conoce cada destinatario. Quien no
/// tiene copia local (p. ej. su autor) recibe el id canónico.
#[derive(Default)]
struct QuoteMap {
    by_user: HashMap<UserId, String>,
    canonical: Option<String>,
}

impl QuoteMap {
    fn for_user(&self, user: &str) -> Option<String> {
        self.by_user.get(user).cloned().or_else(|| self.canonical.clone())
    }
}

/// Payload por destinatario resuelto antes de construir las filas.
enum Rewrite {
    Content { quotes: QuoteMap },
    Recall { local_ids: HashMap<UserId, String> },
    Pin { action: PinAction, local_ids: HashMap<UserId, Vec<String>> },
    Transcript { entries: Vec<TranscriptEntry>, quotes: QuoteMap },
}

/// Motivo por el que un mensaje no se expande.
enum Skip {
    Malformed,
    Unresolved,
}

pub struct FanoutPlanner {
    store: SharedStore,
    gate: Arc<EligibilityGate>,
    shards: Arc<ShardAssigner>,
    bulk: Arc<BulkWriter>,
    transport: Arc<dyn MessengerTransport>,
    pin_failure_notice: String,
}

/// Estado destino según los niveles pedidos; si incluye el bajo, la
/// expansión es la última.
fn target_status(levels: &[PriorityTier]) -> Result<MessageStatus, FanoutError> {
    if levels.is_empty() || levels.iter().any(|l| !matches!(l, PriorityTier::High | PriorityTier::Low)) {
        return Err(FanoutError::InvalidLevel(format!("{levels:?}")));
    }
    if levels.contains(&PriorityTier::Low) {
        Ok(MessageStatus::Finished)
    } else {
        Ok(MessageStatus::Privileged)
    }
}

impl FanoutPlanner {
    pub fn new(store: SharedStore,
               gate: Arc<EligibilityGate>,
               shards: Arc<ShardAssigner>,
               bulk: Arc<BulkWriter>,
               transport: Arc<dyn MessengerTransport>,
               pin_failure_notice: impl Into<String>)
               -> Self {
        Self { store, gate, shards, bulk, transport, pin_failure_notice: pin_failure_notice.into() }
    }

    pub async fn expand(&self,
                        tenant: &str,
                        msg: &CanonicalMessage,
                        levels: &[PriorityTier])
                        -> Result<Expansion, FanoutError> {
        let target = target_status(levels)?;
        debug!("expand:start tenant={} msg={} category={} target={:?}",
               tenant, msg.message_id, msg.category, target);

        let rewrite = match self.rewrite(tenant, msg, target).await? {
            Ok(r) => r,
            Err(skip) => {
                let status = match skip {
                    Skip::Malformed => MessageStatus::Finished,
                    Skip::Unresolved => target,
                };
                self.store.update_message_status(tenant, &msg.message_id, status).await?;
                return Ok(Expansion::empty(status));
            }
        };

        let mut records = Vec::new();
        for level in levels {
            for user in self.store.members_by_priority(tenant, &[*level]).await? {
                if !self.eligible(tenant, msg, &user) {
                    continue;
                }
                if let Some(row) = self.build_row(tenant, msg, &rewrite, &user, *level)? {
                    records.push(row);
                }
            }
        }

        self.bulk.persist_batch(tenant, &records).await?;
        self.store.update_message_status(tenant, &msg.message_id, target).await?;

        let status_update = match &rewrite {
            Rewrite::Pin { action, local_ids } => Some(self.spawn_pin_flip(tenant, *action, local_ids)),
            _ => None,
        };
        info!("expand:done tenant={} msg={} rows={} status={:?}", tenant, msg.message_id, records.len(), target);
        Ok(Expansion { records, target_status: target, status_update })
    }

    fn eligible(&self, tenant: &str, msg: &CanonicalMessage, user: &str) -> bool {
        user != msg.user_id
        && msg.representative_id.as_deref() != Some(user)
        && !self.gate.is_excluded(tenant, user)
    }

    /// `Err(Skip)` significa "sin expansión".
    async fn rewrite(&self,
                     tenant: &str,
                     msg: &CanonicalMessage,
                     target: MessageStatus)
                     -> Result<Result<Rewrite, Skip>, FanoutError> {
        match msg.control_kind() {
            ControlKind::Content => Ok(Ok(Rewrite::Content { quotes: self.quote_map(tenant, msg).await? })),
            ControlKind::Transcript => match decode_transcript(&msg.data) {
                Ok(entries) => Ok(Ok(Rewrite::Transcript { entries, quotes: self.quote_map(tenant, msg).await? })),
                Err(e) => {
                    warn!("expand:bad_transcript tenant={} msg={} err={}", tenant, msg.message_id, e);
                    Ok(Err(Skip::Malformed))
                }
            },
            ControlKind::Recall => {
                let body: RecallBody = match decode_json(&msg.data) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("expand:bad_recall tenant={} msg={} err={}", tenant, msg.message_id, e);
                        return Ok(Err(Skip::Malformed));
                    }
                };
                let origin = self.resolve_origin(tenant, &body.message_id).await?;
                self.store.update_message_status(tenant, &origin, MessageStatus::Recalled).await?;
                let local_ids: HashMap<UserId, String> =
                    self.store
                        .local_copies_by_origin(tenant, std::slice::from_ref(&origin))
                        .await?
                        .into_iter()
                        .map(|c| (c.user_id, c.message_id))
                        .collect();
                if local_ids.is_empty() {
                    debug!("expand:recall_unresolved tenant={} origin={}", tenant, origin);
                    return Ok(Err(Skip::Unresolved));
                }
                Ok(Ok(Rewrite::Recall { local_ids }))
            }
            ControlKind::Pin => {
                let body: PinBody = match decode_json(&msg.data) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("expand:bad_pin tenant={} msg={} err={}", tenant, msg.message_id, e);
                        return Ok(Err(Skip::Malformed));
                    }
                };
                let mut origins = Vec::with_capacity(body.message_ids.len());
                for id in &body.message_ids {
                    let origin = self.resolve_origin(tenant, id).await?;
                    if !origins.contains(&origin) {
                        origins.push(origin);
                    }
                }
                let mut local_ids: HashMap<UserId, Vec<String>> = HashMap::new();
                for copy in self.store.local_copies_by_origin(tenant, &origins).await? {
                    local_ids.entry(copy.user_id).or_default().push(copy.message_id);
                }
                if local_ids.is_empty() {
                    debug!("expand:pin_unresolved tenant={} msg={}", tenant, msg.message_id);
                    if target == MessageStatus::Finished {
                        self.notify_pin_failure(tenant, &msg.user_id).await;
                    }
                    return Ok(Err(Skip::Unresolved));
                }
                let status = match body.action {
                    PinAction::Pin => MessageStatus::Pinned,
                    PinAction::Unpin => MessageStatus::Finished,
                };
                for origin in &origins {
                    self.mark_pin_target(tenant, origin, status).await?;
                }
                Ok(Ok(Rewrite::Pin { action: body.action, local_ids }))
            }
        }
    }

    /// Un id local se traduce a su canónico; cualquier otro id se toma como
    /// canónico.
    async fn resolve_origin(&self, tenant: &str, id: &str) -> Result<String, StoreError> {
        Ok(self.store
               .get_distribute_by_message_id(tenant, id)
               .await?
               .map(|r| r.origin_message_id)
               .unwrap_or_else(|| id.to_string()))
    }

    async fn quote_map(&self, tenant: &str, msg: &CanonicalMessage) -> Result<QuoteMap, StoreError> {
        let Some(quote) = msg.quote_message_id.as_deref() else {
            return Ok(QuoteMap::default());
        };
        let origin = self.resolve_origin(tenant, quote).await?;
        let by_user = self.store
                          .local_copies_by_origin(tenant, std::slice::from_ref(&origin))
                          .await?
                          .into_iter()
                          .map(|c| (c.user_id, c.message_id))
                          .collect();
        Ok(QuoteMap { by_user, canonical: Some(origin) })
    }

    /// Sólo se cambia el estado de objetivos ya entregados a todos los
    /// niveles; un objetivo `Privileged` conserva su pasada baja.
    async fn mark_pin_target(&self, tenant: &str, origin: &str, status: MessageStatus) -> Result<(), StoreError> {
        match self.store.get_message(tenant, origin).await? {
            Some(m) if matches!(m.status, MessageStatus::Finished | MessageStatus::Pinned) => {
                self.store.update_message_status(tenant, origin, status).await
            }
            _ => Ok(()),
        }
    }

    async fn notify_pin_failure(&self, tenant: &str, sender: &str) {
        let notice = OutboundMessage::text(tenant, sender, &self.pin_failure_notice);
        if let Err(e) = self.transport.send_message(&notice).await {
            warn!("expand:pin_notice_failed tenant={} user={} err={}", tenant, sender, e);
        }
    }

    fn build_row(&self,
                 tenant: &str,
                 msg: &CanonicalMessage,
                 rewrite: &Rewrite,
                 user: &str,
                 level: PriorityTier)
                 -> Result<Option<DistributeRecord>, FanoutError> {
        let local_id = Uuid::new_v4().to_string();
        let mut representative = Some(msg.user_id.clone());

        let (data, quote) = match rewrite {
            Rewrite::Content { quotes } => (msg.data.clone(), quotes.for_user(user)),
            Rewrite::Transcript { entries, quotes } => (stamp_transcript(entries, &local_id)?, quotes.for_user(user)),
            Rewrite::Recall { local_ids } => {
                let Some(target) = local_ids.get(user) else {
                    return Ok(None);
                };
                representative = None;
                (encode_json(&RecallBody { message_id: target.clone() })?, None)
            }
            Rewrite::Pin { action, local_ids } => {
                let Some(targets) = local_ids.get(user).filter(|ids| !ids.is_empty()) else {
                    return Ok(None);
                };
                (encode_json(&PinBody { action: *action, message_ids: targets.clone() })?, None)
            }
        };

        Ok(Some(DistributeRecord { tenant_id: tenant.to_string(),
                                   user_id: user.to_string(),
                                   shard_id: self.shards.shard_for(tenant, user),
                                   conversation_id: unique_conversation_id(tenant, user),
                                   origin_message_id: msg.message_id.clone(),
                                   message_id: local_id,
                                   quote_message_id: quote,
                                   category: msg.category.clone(),
                                   data,
                                   representative_id: representative,
                                   level,
                                   status: DistributeStatus::Pending,
                                   created_at: Utc::now() }))
    }

    fn spawn_pin_flip(&self, tenant: &str, action: PinAction, local_ids: &HashMap<UserId, Vec<String>>) -> JoinHandle<()> {
        let store = self.store.clone();
        let tenant = tenant.to_string();
        let ids: Vec<String> = local_ids.values().flatten().cloned().collect();
        let status = match action {
            PinAction::Pin => DistributeStatus::Pinned,
            PinAction::Unpin => DistributeStatus::Finished,
        };
        tokio::spawn(async move {
            match store.update_distribute_status(&tenant, &ids, status).await {
                Ok(n) => debug!("expand:pin_flip tenant={} rows={} status={:?}", tenant, n, status),
                Err(e) => warn!("expand:pin_flip_failed tenant={} err={}", tenant, e),
            }
        })
    }
}

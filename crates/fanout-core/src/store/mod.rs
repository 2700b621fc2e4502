//! Trait `FanoutStore`: el store relacional durable es la única fuente de
//! verdad. Aquí se hace cumplir la idempotencia (unicidad de
//! tenant/destinatario/origen) y la visibilidad entre procesos; las caches
//! del motor se reconstruyen siempre desde él.

mod memory;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fanout_domain::{CanonicalMessage, DistributeRecord, DistributeStatus, MemberStatus, MessageStatus,
                    PriorityTier, TenantId, TenantMember, UserId};

use crate::errors::{FanoutError, InsertOutcome, StoreError};

pub use memory::InMemoryFanoutStore;

pub type SharedStore = Arc<dyn FanoutStore>;

/// Foto completa de bloqueos cargada por el refresh periódico del gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSnapshot {
    pub global: HashSet<UserId>,
    pub per_tenant: HashMap<TenantId, HashSet<UserId>>,
}

/// Fila mínima de mapeo origen -> copia local de un destinatario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCopy {
    pub user_id: UserId,
    pub message_id: String,
    pub origin_message_id: String,
}

/// Filtro de selección de mensajes canónicos para catch-up.
#[derive(Debug, Clone)]
pub struct MessageQuery<'a> {
    /// Estrictamente posteriores a este instante.
    pub after: Option<DateTime<Utc>>,
    pub statuses: &'a [MessageStatus],
    pub excluded_categories: &'a [&'a str],
    pub limit: Option<usize>,
}

#[async_trait]
pub trait FanoutStore: Send + Sync + 'static {
    /// Tenants activos.
    async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError>;
    async fn tenant_exists(&self, tenant: &str) -> Result<bool, StoreError>;

    /// Ids de miembros con alguno de los niveles dados, en orden de alta.
    async fn members_by_priority(&self, tenant: &str, tiers: &[PriorityTier]) -> Result<Vec<UserId>, StoreError>;
    async fn get_member(&self, tenant: &str, user: &str) -> Result<Option<TenantMember>, StoreError>;
    async fn update_member_priority(&self, tenant: &str, user: &str, priority: PriorityTier) -> Result<(), StoreError>;
    async fn update_member_priority_and_status(&self,
                                               tenant: &str,
                                               user: &str,
                                               priority: PriorityTier,
                                               status: MemberStatus)
                                               -> Result<(), StoreError>;
    async fn update_member_mute(&self, tenant: &str, user: &str, until: Option<DateTime<Utc>>) -> Result<(), StoreError>;

    async fn load_block_snapshot(&self) -> Result<BlockSnapshot, StoreError>;
    async fn insert_global_block(&self, user: &str) -> Result<(), StoreError>;
    async fn insert_tenant_block(&self, tenant: &str, user: &str) -> Result<(), StoreError>;
    async fn delete_tenant_block(&self, tenant: &str, user: &str) -> Result<(), StoreError>;

    async fn insert_message(&self, msg: &CanonicalMessage) -> Result<InsertOutcome, StoreError>;
    async fn get_message(&self, tenant: &str, message_id: &str) -> Result<Option<CanonicalMessage>, StoreError>;
    /// Mensaje más antiguo (por `created_at`) en el estado dado.
    async fn oldest_message_by_status(&self,
                                      tenant: &str,
                                      status: MessageStatus)
                                      -> Result<Option<CanonicalMessage>, StoreError>;
    async fn update_message_status(&self, tenant: &str, message_id: &str, status: MessageStatus) -> Result<(), StoreError>;
    /// Mensajes que cumplen el filtro, del más nuevo al más antiguo.
    async fn query_messages(&self, tenant: &str, query: &MessageQuery<'_>) -> Result<Vec<CanonicalMessage>, StoreError>;
    async fn messages_by_sender_since(&self,
                                      tenant: &str,
                                      user: &str,
                                      status: MessageStatus,
                                      since: DateTime<Utc>)
                                      -> Result<Vec<CanonicalMessage>, StoreError>;

    /// Inserción idempotente: las filas que violan la unicidad se omiten.
    async fn insert_distribute_batch(&self, rows: &[DistributeRecord]) -> Result<InsertOutcome, StoreError>;
    async fn get_distribute_by_message_id(&self,
                                          tenant: &str,
                                          message_id: &str)
                                          -> Result<Option<DistributeRecord>, StoreError>;
    /// Copias locales ya confirmadas de los mensajes canónicos dados.
    async fn local_copies_by_origin(&self, tenant: &str, origins: &[String]) -> Result<Vec<LocalCopy>, StoreError>;
    /// Devuelve el número de filas actualizadas.
    async fn update_distribute_status(&self,
                                      tenant: &str,
                                      message_ids: &[String],
                                      status: DistributeStatus)
                                      -> Result<usize, StoreError>;
    /// Filas de un destinatario en un estado, por orden de creación.
    async fn distribute_by_user_status(&self,
                                       tenant: &str,
                                       user: &str,
                                       status: DistributeStatus)
                                       -> Result<Vec<DistributeRecord>, StoreError>;
}

/// `UnknownTenant` si el tenant no está registrado.
pub(crate) async fn require_tenant(store: &dyn FanoutStore, tenant: &str) -> Result<(), FanoutError> {
    if store.tenant_exists(tenant).await? {
        Ok(())
    } else {
        Err(FanoutError::UnknownTenant(tenant.to_string()))
    }
}

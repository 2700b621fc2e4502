use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fanout_domain::{CanonicalMessage, DistributeRecord, DistributeStatus, MemberStatus, MessageStatus,
                    PriorityTier, TenantId, TenantMember, UserId};
use tokio::sync::Mutex;

use super::{BlockSnapshot, FanoutStore, LocalCopy, MessageQuery};
use crate::errors::{InsertOutcome, StoreError};

#[derive(Default)]
struct State {
    tenants: Vec<TenantId>,
    /// Miembros por tenant, en orden de alta.
    members: HashMap<TenantId, Vec<TenantMember>>,
    blocks: BlockSnapshot,
    messages: HashMap<TenantId, Vec<CanonicalMessage>>,
    distribute: Vec<DistributeRecord>,
    dedup: HashSet<(TenantId, UserId, String)>,
    local_ids: HashSet<String>,
}

/// Store en memoria con la misma semántica de unicidad que el relacional.
/// Pensado para tests y para ejecutar el motor sin base de datos.
pub struct InMemoryFanoutStore {
    state: Mutex<State>,
    fail_distribute: AtomicUsize,
    fail_distribute_from: AtomicUsize,
    fail_reads: AtomicUsize,
    distribute_calls: AtomicUsize,
}

impl Default for InMemoryFanoutStore {
    fn default() -> Self {
        Self { state: Mutex::new(State::default()),
               fail_distribute: AtomicUsize::new(0),
               fail_distribute_from: AtomicUsize::new(usize::MAX),
               fail_reads: AtomicUsize::new(0),
               distribute_calls: AtomicUsize::new(0) }
    }
}

impl InMemoryFanoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_tenant(&self, tenant: &str) {
        let mut st = self.state.lock().await;
        if !st.tenants.iter().any(|t| t == tenant) {
            st.tenants.push(tenant.to_string());
        }
    }

    pub async fn remove_tenant(&self, tenant: &str) {
        self.state.lock().await.tenants.retain(|t| t != tenant);
    }

    pub async fn add_member(&self, member: TenantMember) {
        let mut st = self.state.lock().await;
        let list = st.members.entry(member.tenant_id.clone()).or_default();
        list.retain(|m| m.user_id != member.user_id);
        list.push(member);
    }

    pub async fn member(&self, tenant: &str, user: &str) -> Option<TenantMember> {
        let st = self.state.lock().await;
        st.members.get(tenant).and_then(|l| l.iter().find(|m| m.user_id == user).cloned())
    }

    pub async fn message(&self, tenant: &str, message_id: &str) -> Option<CanonicalMessage> {
        let st = self.state.lock().await;
        st.messages.get(tenant).and_then(|l| l.iter().find(|m| m.message_id == message_id).cloned())
    }

    pub async fn messages(&self, tenant: &str) -> Vec<CanonicalMessage> {
        self.state.lock().await.messages.get(tenant).cloned().unwrap_or_default()
    }

    /// Filas de distribución en orden de inserción.
    pub async fn distribute_rows(&self) -> Vec<DistributeRecord> {
        self.state.lock().await.distribute.clone()
    }

    pub async fn rows_for(&self, tenant: &str, user: &str) -> Vec<DistributeRecord> {
        self.state
            .lock()
            .await
            .distribute
            .iter()
            .filter(|r| r.tenant_id == tenant && r.user_id == user)
            .cloned()
            .collect()
    }

    /// Las próximas `n` llamadas a `insert_distribute_batch` fallan con
    /// `StoreError::Unavailable` sin escribir nada.
    pub fn fail_next_distribute_inserts(&self, n: usize) {
        self.fail_distribute.store(n, Ordering::SeqCst);
    }

    /// Toda llamada a `insert_distribute_batch` a partir de la número `call`
    /// (contando desde 0) falla.
    pub fn fail_distribute_inserts_from(&self, call: usize) {
        self.fail_distribute_from.store(call, Ordering::SeqCst);
    }

    /// Las próximas `n` lecturas de mensajes canónicos fallan.
    pub fn fail_next_message_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Llamadas a `insert_distribute_batch`, fallidas incluidas.
    pub fn distribute_insert_calls(&self) -> usize {
        self.distribute_calls.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if Self::take_failure(&self.fail_reads) {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }
}

fn member_mut<'a>(st: &'a mut State, tenant: &str, user: &str) -> Result<&'a mut TenantMember, StoreError> {
    st.members
      .get_mut(tenant)
      .and_then(|l| l.iter_mut().find(|m| m.user_id == user))
      .ok_or_else(|| StoreError::Constraint(format!("member {user} not found in {tenant}")))
}

fn newest_first(mut v: Vec<CanonicalMessage>) -> Vec<CanonicalMessage> {
    v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    v
}

#[async_trait]
impl FanoutStore for InMemoryFanoutStore {
    async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        Ok(self.state.lock().await.tenants.clone())
    }

    async fn tenant_exists(&self, tenant: &str) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.tenants.iter().any(|t| t == tenant))
    }

    async fn members_by_priority(&self, tenant: &str, tiers: &[PriorityTier]) -> Result<Vec<UserId>, StoreError> {
        let st = self.state.lock().await;
        let mut members: Vec<&TenantMember> = st.members
                                                .get(tenant)
                                                .map(|l| l.iter().filter(|m| tiers.contains(&m.priority)).collect())
                                                .unwrap_or_default();
        members.sort_by_key(|m| m.created_at);
        Ok(members.into_iter().map(|m| m.user_id.clone()).collect())
    }

    async fn get_member(&self, tenant: &str, user: &str) -> Result<Option<TenantMember>, StoreError> {
        Ok(self.member(tenant, user).await)
    }

    async fn update_member_priority(&self, tenant: &str, user: &str, priority: PriorityTier) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        member_mut(&mut st, tenant, user)?.priority = priority;
        Ok(())
    }

    async fn update_member_priority_and_status(&self,
                                               tenant: &str,
                                               user: &str,
                                               priority: PriorityTier,
                                               status: MemberStatus)
                                               -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        let m = member_mut(&mut st, tenant, user)?;
        m.priority = priority;
        m.status = status;
        Ok(())
    }

    async fn update_member_mute(&self, tenant: &str, user: &str, until: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        member_mut(&mut st, tenant, user)?.muted_until = until;
        Ok(())
    }

    async fn load_block_snapshot(&self) -> Result<BlockSnapshot, StoreError> {
        Ok(self.state.lock().await.blocks.clone())
    }

    async fn insert_global_block(&self, user: &str) -> Result<(), StoreError> {
        self.state.lock().await.blocks.global.insert(user.to_string());
        Ok(())
    }

    async fn insert_tenant_block(&self, tenant: &str, user: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .blocks
            .per_tenant
            .entry(tenant.to_string())
            .or_default()
            .insert(user.to_string());
        Ok(())
    }

    async fn delete_tenant_block(&self, tenant: &str, user: &str) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        if let Some(set) = st.blocks.per_tenant.get_mut(tenant) {
            set.remove(user);
        }
        Ok(())
    }

    async fn insert_message(&self, msg: &CanonicalMessage) -> Result<InsertOutcome, StoreError> {
        let mut st = self.state.lock().await;
        let list = st.messages.entry(msg.tenant_id.clone()).or_default();
        if list.iter().any(|m| m.message_id == msg.message_id) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        list.push(msg.clone());
        Ok(InsertOutcome::Inserted(1))
    }

    async fn get_message(&self, tenant: &str, message_id: &str) -> Result<Option<CanonicalMessage>, StoreError> {
        self.check_reads()?;
        Ok(self.message(tenant, message_id).await)
    }

    async fn oldest_message_by_status(&self,
                                      tenant: &str,
                                      status: MessageStatus)
                                      -> Result<Option<CanonicalMessage>, StoreError> {
        self.check_reads()?;
        let st = self.state.lock().await;
        Ok(st.messages
             .get(tenant)
             .and_then(|l| l.iter().filter(|m| m.status == status).min_by_key(|m| m.created_at).cloned()))
    }

    async fn update_message_status(&self, tenant: &str, message_id: &str, status: MessageStatus) -> Result<(), StoreError> {
        let mut st = self.state.lock().await;
        if let Some(m) = st.messages
                           .get_mut(tenant)
                           .and_then(|l| l.iter_mut().find(|m| m.message_id == message_id))
        {
            m.status = status;
        }
        Ok(())
    }

    async fn query_messages(&self, tenant: &str, query: &MessageQuery<'_>) -> Result<Vec<CanonicalMessage>, StoreError> {
        self.check_reads()?;
        let st = self.state.lock().await;
        let matched: Vec<CanonicalMessage> =
            st.messages
              .get(tenant)
              .map(|l| {
                  l.iter()
                   .filter(|m| query.after.map_or(true, |after| m.created_at > after))
                   .filter(|m| query.statuses.contains(&m.status))
                   .filter(|m| !query.excluded_categories.contains(&m.category.as_str()))
                   .cloned()
                   .collect()
              })
              .unwrap_or_default();
        let mut sorted = newest_first(matched);
        if let Some(limit) = query.limit {
            sorted.truncate(limit);
        }
        Ok(sorted)
    }

    async fn messages_by_sender_since(&self,
                                      tenant: &str,
                                      user: &str,
                                      status: MessageStatus,
                                      since: DateTime<Utc>)
                                      -> Result<Vec<CanonicalMessage>, StoreError> {
        let st = self.state.lock().await;
        let matched = st.messages
                        .get(tenant)
                        .map(|l| {
                            l.iter()
                             .filter(|m| m.user_id == user && m.status == status && m.created_at > since)
                             .cloned()
                             .collect()
                        })
                        .unwrap_or_default();
        Ok(newest_first(matched))
    }

    async fn insert_distribute_batch(&self, rows: &[DistributeRecord]) -> Result<InsertOutcome, StoreError> {
        let call = self.distribute_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_distribute) || call >= self.fail_distribute_from.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected distribute failure".into()));
        }
        let mut st = self.state.lock().await;
        let mut inserted = 0;
        for row in rows {
            let key = (row.tenant_id.clone(), row.user_id.clone(), row.origin_message_id.clone());
            if st.dedup.contains(&key) || st.local_ids.contains(&row.message_id) {
                continue;
            }
            st.dedup.insert(key);
            st.local_ids.insert(row.message_id.clone());
            st.distribute.push(row.clone());
            inserted += 1;
        }
        if inserted == 0 && !rows.is_empty() {
            return Ok(InsertOutcome::AlreadyExists);
        }
        Ok(InsertOutcome::Inserted(inserted))
    }

    async fn get_distribute_by_message_id(&self,
                                          tenant: &str,
                                          message_id: &str)
                                          -> Result<Option<DistributeRecord>, StoreError> {
        let st = self.state.lock().await;
        Ok(st.distribute
             .iter()
             .find(|r| r.tenant_id == tenant && r.message_id == message_id)
             .cloned())
    }

    async fn local_copies_by_origin(&self, tenant: &str, origins: &[String]) -> Result<Vec<LocalCopy>, StoreError> {
        let st = self.state.lock().await;
        Ok(st.distribute
             .iter()
             .filter(|r| r.tenant_id == tenant && origins.contains(&r.origin_message_id))
             .map(|r| LocalCopy { user_id: r.user_id.clone(),
                                  message_id: r.message_id.clone(),
                                  origin_message_id: r.origin_message_id.clone() })
             .collect())
    }

    async fn update_distribute_status(&self,
                                      tenant: &str,
                                      message_ids: &[String],
                                      status: DistributeStatus)
                                      -> Result<usize, StoreError> {
        let mut st = self.state.lock().await;
        let mut updated = 0;
        for row in st.distribute
                     .iter_mut()
                     .filter(|r| r.tenant_id == tenant && message_ids.contains(&r.message_id))
        {
            row.status = status;
            updated += 1;
        }
        Ok(updated)
    }

    async fn distribute_by_user_status(&self,
                                       tenant: &str,
                                       user: &str,
                                       status: DistributeStatus)
                                       -> Result<Vec<DistributeRecord>, StoreError> {
        let st = self.state.lock().await;
        let mut rows: Vec<DistributeRecord> = st.distribute
                                                .iter()
                                                .filter(|r| r.tenant_id == tenant && r.user_id == user && r.status == status)
                                                .cloned()
                                                .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_domain::PriorityTier;

    fn row(user: &str, origin: &str, local: &str) -> DistributeRecord {
        DistributeRecord { tenant_id: "t1".into(),
                           user_id: user.into(),
                           shard_id: "0".into(),
                           conversation_id: "c".into(),
                           origin_message_id: origin.into(),
                           message_id: local.into(),
                           quote_message_id: None,
                           category: "PLAIN_TEXT".into(),
                           data: String::new(),
                           representative_id: None,
                           level: PriorityTier::Low,
                           status: DistributeStatus::Pending,
                           created_at: Utc::now() }
    }

    #[tokio::test]
    async fn duplicate_rows_are_skipped_per_row() {
        let store = InMemoryFanoutStore::new();
        let first = store.insert_distribute_batch(&[row("u1", "m1", "l1")]).await.unwrap();
        assert_eq!(first, InsertOutcome::Inserted(1));

        let mixed = store.insert_distribute_batch(&[row("u1", "m1", "l9"), row("u2", "m1", "l2")])
                         .await
                         .unwrap();
        assert_eq!(mixed, InsertOutcome::Inserted(1));

        let again = store.insert_distribute_batch(&[row("u1", "m1", "l3")]).await.unwrap();
        assert_eq!(again, InsertOutcome::AlreadyExists);
        assert_eq!(store.distribute_rows().await.len(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryFanoutStore::new();
        store.fail_next_distribute_inserts(1);
        assert!(store.insert_distribute_batch(&[row("u1", "m1", "l1")]).await.is_err());
        assert!(store.insert_distribute_batch(&[row("u1", "m1", "l1")]).await.is_ok());
        assert_eq!(store.distribute_insert_calls(), 2);
    }
}

//! Predicado de elegibilidad: ¿está el usuario bloqueado (globalmente o en el
//! tenant)?
//!
//! La cache se recarga entera desde el store cada `block_refresh`; las
//! acciones de moderación escriben primero en el store y después en la
//! entrada concreta de la cache. Refresh y escrituras se serializan con
//! `write_lock` para que un refresh en curso no pise una escritura reciente.
//! Las lecturas sólo toman el `RwLock` el tiempo de clonar el `Arc`.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use fanout_domain::{TenantId, UserId};
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::StoreError;
use crate::store::{BlockSnapshot, SharedStore};

#[derive(Debug, Default)]
struct BlockCache {
    global: DashSet<UserId>,
    tenants: DashMap<TenantId, DashSet<UserId>>,
}

impl From<BlockSnapshot> for BlockCache {
    fn from(s: BlockSnapshot) -> Self {
        let cache = BlockCache::default();
        for user in s.global {
            cache.global.insert(user);
        }
        for (tenant, users) in s.per_tenant {
            cache.tenants.insert(tenant, users.into_iter().collect());
        }
        cache
    }
}

pub struct EligibilityGate {
    store: SharedStore,
    cache: RwLock<Arc<BlockCache>>,
    write_lock: Mutex<()>,
    loaded: AtomicBool,
}

impl EligibilityGate {
    pub fn new(store: SharedStore) -> Self {
        Self { store,
               cache: RwLock::new(Arc::new(BlockCache::default())),
               write_lock: Mutex::new(()),
               loaded: AtomicBool::new(false) }
    }

    fn current(&self) -> Arc<BlockCache> {
        self.cache.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Indica si al menos un refresh completo terminó.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn is_excluded(&self, tenant: &str, user: &str) -> bool {
        let cache = self.current();
        cache.global.contains(user) || cache.tenants.get(tenant).map_or(false, |set| set.contains(user))
    }

    /// Recarga completa desde el store y swap atómico de la cache.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.store.load_block_snapshot().await?;
        let global = snapshot.global.len();
        let tenants = snapshot.per_tenant.len();
        let fresh = Arc::new(BlockCache::from(snapshot));
        *self.cache.write().unwrap_or_else(|p| p.into_inner()) = fresh;
        self.loaded.store(true, Ordering::Release);
        debug!("gate:refresh global={} tenants={}", global, tenants);
        Ok(())
    }

    /// Tarea periódica de refresh; termina al cancelar el token.
    pub fn spawn_refresh(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            info!("gate:refresh_task start every_ms={}", every.as_millis());
            loop {
                if let Err(e) = gate.refresh().await {
                    warn!("gate:refresh failed err={}", e);
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(every) => {}
                }
            }
            info!("gate:refresh_task stop");
        })
    }

    pub async fn block_member(&self, tenant: &str, user: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.store.insert_tenant_block(tenant, user).await?;
        self.current()
            .tenants
            .entry(tenant.to_string())
            .or_default()
            .insert(user.to_string());
        debug!("gate:block tenant={} user={}", tenant, user);
        Ok(())
    }

    pub async fn unblock_member(&self, tenant: &str, user: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.store.delete_tenant_block(tenant, user).await?;
        if let Some(set) = self.current().tenants.get(tenant) {
            set.remove(user);
        }
        debug!("gate:unblock tenant={} user={}", tenant, user);
        Ok(())
    }

    pub async fn block_globally(&self, user: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.store.insert_global_block(user).await?;
        self.current().global.insert(user.to_string());
        debug!("gate:block_global user={}", user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FanoutStore, InMemoryFanoutStore};

    #[tokio::test]
    async fn refresh_loads_store_and_write_through_is_visible() {
        let store = Arc::new(InMemoryFanoutStore::new());
        store.insert_tenant_block("t1", "u3").await.unwrap();
        store.insert_global_block("spam").await.unwrap();
        let gate = EligibilityGate::new(store.clone());

        assert!(!gate.is_loaded());
        assert!(!gate.is_excluded("t1", "u3"));
        gate.refresh().await.unwrap();
        assert!(gate.is_loaded());
        assert!(gate.is_excluded("t1", "u3"));
        assert!(!gate.is_excluded("t2", "u3"));
        assert!(gate.is_excluded("t2", "spam"));

        gate.block_member("t2", "u3").await.unwrap();
        assert!(gate.is_excluded("t2", "u3"));
        gate.unblock_member("t1", "u3").await.unwrap();
        assert!(!gate.is_excluded("t1", "u3"));

        // La escritura llegó al store: sobrevive a un refresh completo
        gate.refresh().await.unwrap();
        assert!(gate.is_excluded("t2", "u3"));
        assert!(!gate.is_excluded("t1", "u3"));
    }

    #[tokio::test]
    async fn refresh_task_stops_on_cancel() {
        let store = Arc::new(InMemoryFanoutStore::new());
        let gate = Arc::new(EligibilityGate::new(store));
        let cancel = CancellationToken::new();
        let handle = gate.spawn_refresh(Duration::from_millis(5), cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gate.is_loaded());
        cancel.cancel();
        handle.await.unwrap();
    }
}

//! Reparto de miembros en shards.
//!
//! Cada nivel (alto y bajo) se corta por separado en `n` tramos contiguos de
//! tamaño `ceil(len / n)`; el tramo `i` recibe la etiqueta `"i"`. La tabla
//! de un tenant se reemplaza entera (swap de `Arc`), nunca se ve a medias.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use fanout_domain::{PriorityTier, TenantId, UserId};
use log::debug;

use crate::errors::StoreError;
use crate::store::SharedStore;

/// Etiqueta de un usuario sin asignación.
pub const DEFAULT_SHARD: &str = "0";

#[derive(Debug, Clone)]
pub struct ShardTable {
    pub assigned_at: Instant,
    pub labels: HashMap<UserId, String>,
}

impl ShardTable {
    pub fn label(&self, user: &str) -> &str {
        self.labels.get(user).map(String::as_str).unwrap_or(DEFAULT_SHARD)
    }
}

/// Función pura de reparto. `n == 0` se trata como un único shard.
pub fn assign_shards(high: &[UserId], low: &[UserId], n: usize) -> HashMap<UserId, String> {
    let n = n.max(1);
    let mut labels = HashMap::with_capacity(high.len() + low.len());
    for tier in [high, low] {
        if tier.is_empty() {
            continue;
        }
        let size = tier.len().div_ceil(n);
        for (i, slice) in tier.chunks(size).enumerate() {
            for user in slice {
                labels.insert(user.clone(), i.to_string());
            }
        }
    }
    labels
}

pub struct ShardAssigner {
    store: SharedStore,
    shard_count: usize,
    max_age: Duration,
    tables: DashMap<TenantId, Arc<ShardTable>>,
}

impl ShardAssigner {
    pub fn new(store: SharedStore, shard_count: usize, max_age: Duration) -> Self {
        Self { store, shard_count, max_age, tables: DashMap::new() }
    }

    /// Recalcula la tabla del tenant desde la membresía actual.
    pub async fn assign(&self, tenant: &str) -> Result<Arc<ShardTable>, StoreError> {
        let high = self.store.members_by_priority(tenant, &[PriorityTier::High]).await?;
        let low = self.store.members_by_priority(tenant, &[PriorityTier::Low]).await?;
        let table = Arc::new(ShardTable { assigned_at: Instant::now(),
                                          labels: assign_shards(&high, &low, self.shard_count) });
        debug!("shard:assign tenant={} high={} low={} n={}", tenant, high.len(), low.len(), self.shard_count);
        self.tables.insert(tenant.to_string(), table.clone());
        Ok(table)
    }

    pub fn table(&self, tenant: &str) -> Option<Arc<ShardTable>> {
        self.tables.get(tenant).map(|t| t.value().clone())
    }

    pub fn shard_for(&self, tenant: &str, user: &str) -> String {
        self.table(tenant)
            .map(|t| t.label(user).to_string())
            .unwrap_or_else(|| DEFAULT_SHARD.to_string())
    }

    /// Sin tabla o tabla más vieja que `max_age`.
    pub fn needs_refresh(&self, tenant: &str) -> bool {
        match self.table(tenant) {
            Some(t) => t.assigned_at.elapsed() >= self.max_age,
            None => true,
        }
    }

    pub fn forget(&self, tenant: &str) {
        self.tables.remove(tenant);
    }
}

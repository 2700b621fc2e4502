//! Bucle de planificación por tenant y su supervisor.
//!
//! Cada vuelta (`tick`) hace como mucho una de estas cosas, en orden:
//! 1. el `Pending` más antiguo se expande al nivel alto;
//! 2. si no hay, el `Privileged` más antiguo se expande al nivel bajo;
//! 3. si no hay trabajo y la tabla de shards falta o caducó, se recalcula.
//!
//! El bucle duerme `idle_interval` cuando no hubo expansión o cuando falló,
//! así un error persistente nunca produce un bucle caliente.
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fanout_domain::{MessageStatus, PriorityTier, TenantId};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::FanoutError;
use crate::planner::FanoutPlanner;
use crate::shard::ShardAssigner;
use crate::store::SharedStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Expanded { status: MessageStatus, rows: usize },
    Failed,
    Idle { resharded: bool },
}

pub struct TenantScheduler {
    store: SharedStore,
    planner: Arc<FanoutPlanner>,
    shards: Arc<ShardAssigner>,
    idle_interval: Duration,
}

impl TenantScheduler {
    pub fn new(store: SharedStore, planner: Arc<FanoutPlanner>, shards: Arc<ShardAssigner>, idle_interval: Duration) -> Self {
        Self { store, planner, shards, idle_interval }
    }

    pub async fn tick(&self, tenant: &str) -> TickOutcome {
        match self.try_tick(tenant).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("scheduler:tick_failed tenant={} err={}", tenant, e);
                TickOutcome::Failed
            }
        }
    }

    async fn try_tick(&self, tenant: &str) -> Result<TickOutcome, FanoutError> {
        let passes = [(MessageStatus::Pending, PriorityTier::High), (MessageStatus::Privileged, PriorityTier::Low)];
        for (status, level) in passes {
            if let Some(msg) = self.store.oldest_message_by_status(tenant, status).await? {
                let expansion = self.planner.expand(tenant, &msg, &[level]).await?;
                return Ok(TickOutcome::Expanded { status: expansion.target_status, rows: expansion.records.len() });
            }
        }
        if self.shards.needs_refresh(tenant) {
            self.shards.assign(tenant).await?;
            return Ok(TickOutcome::Idle { resharded: true });
        }
        Ok(TickOutcome::Idle { resharded: false })
    }

    /// Bucle hasta cancelar el token.
    pub async fn run(&self, tenant: &str, cancel: CancellationToken) {
        info!("scheduler:start tenant={}", tenant);
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self.tick(tenant).await;
            if matches!(outcome, TickOutcome::Expanded { .. }) {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.idle_interval) => {}
            }
        }
        info!("scheduler:stop tenant={}", tenant);
    }
}

struct TenantTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Arranca y para un bucle por tenant. Cada tarea tiene su propio token,
/// hijo del token raíz del supervisor.
pub struct Supervisor {
    store: SharedStore,
    scheduler: Arc<TenantScheduler>,
    shards: Arc<ShardAssigner>,
    root: CancellationToken,
    tasks: DashMap<TenantId, TenantTask>,
}

impl Supervisor {
    pub fn new(store: SharedStore, scheduler: Arc<TenantScheduler>, shards: Arc<ShardAssigner>) -> Self {
        Self { store, scheduler, shards, root: CancellationToken::new(), tasks: DashMap::new() }
    }

    pub fn is_running(&self, tenant: &str) -> bool {
        self.tasks.get(tenant).map_or(false, |t| !t.handle.is_finished())
    }

    pub fn running(&self) -> Vec<TenantId> {
        self.tasks.iter().map(|e| e.key().clone()).collect()
    }

    /// Asigna shards y arranca el bucle de cada tenant registrado.
    pub async fn start_all(&self) -> Result<usize, FanoutError> {
        let tenants = self.store.list_tenants().await?;
        for tenant in &tenants {
            if let Err(e) = self.shards.assign(tenant).await {
                warn!("supervisor:initial_shard_failed tenant={} err={}", tenant, e);
            }
            self.start_tenant(tenant);
        }
        info!("supervisor:started tenants={}", tenants.len());
        Ok(tenants.len())
    }

    /// Idempotente: un tenant ya en marcha no se duplica. La comprobación y
    /// el alta ocurren bajo la misma entrada del mapa.
    pub fn start_tenant(&self, tenant: &str) -> bool {
        let entry = self.tasks.entry(tenant.to_string());
        if let Entry::Occupied(running) = &entry {
            if !running.get().handle.is_finished() {
                return false;
            }
        }
        let cancel = self.root.child_token();
        let scheduler = self.scheduler.clone();
        let owned = tenant.to_string();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { scheduler.run(&owned, token).await });
        entry.insert(TenantTask { cancel, handle });
        debug!("supervisor:start tenant={}", tenant);
        true
    }

    /// Cancela el bucle, espera a que termine y olvida su tabla de shards.
    pub async fn stop_tenant(&self, tenant: &str) -> bool {
        let Some((_, task)) = self.tasks.remove(tenant) else {
            return false;
        };
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!("supervisor:join_failed tenant={} err={}", tenant, e);
        }
        self.shards.forget(tenant);
        debug!("supervisor:stop tenant={}", tenant);
        true
    }

    /// Alinea las tareas con la lista de tenants del store.
    pub async fn sync_tenants(&self) -> Result<(usize, usize), FanoutError> {
        let tenants = self.store.list_tenants().await?;
        let mut started = 0;
        for tenant in &tenants {
            if self.start_tenant(tenant) {
                started += 1;
            }
        }
        let mut stopped = 0;
        for tenant in self.running() {
            if !tenants.contains(&tenant) && self.stop_tenant(&tenant).await {
                stopped += 1;
            }
        }
        Ok((started, stopped))
    }

    pub async fn shutdown(&self) {
        self.root.cancel();
        let tenants = self.running();
        for tenant in tenants {
            self.stop_tenant(&tenant).await;
        }
        info!("supervisor:shutdown");
    }
}

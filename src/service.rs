//! Arranque y parada ordenada del motor sobre un store ya construido.
//!
//! Orden de arranque: carga inicial de bloqueos, tarea de refresh del gate,
//! supervisor con un bucle por tenant y tarea de sincronización con la tabla
//! de tenants. La parada cancela en orden inverso.

use std::sync::Arc;
use std::time::Duration;

use fanout_core::{BulkWriter, ChannelWakePublisher, EligibilityGate, FanoutPlanner, MessengerTransport, ShardAssigner,
                  SharedStore, Supervisor, TenantScheduler, WakePublisher};
use fanout_persistence::RedisWakePublisher;
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::errors::AppError;

/// Redis si hay `REDIS_URL`; si no, un canal en proceso.
pub fn wake_publisher(cfg: &AppConfig) -> Result<Arc<dyn WakePublisher>, AppError> {
    match &cfg.redis_url {
        Some(url) => Ok(Arc::new(RedisWakePublisher::open(url, cfg.wake_channel.clone())?)),
        None => {
            warn!("service:wake_in_process channel={}", cfg.wake_channel);
            Ok(Arc::new(ChannelWakePublisher::default()))
        }
    }
}

pub struct Service {
    pub gate: Arc<EligibilityGate>,
    pub supervisor: Arc<Supervisor>,
    cancel: CancellationToken,
    gate_task: JoinHandle<()>,
    sync_task: JoinHandle<()>,
}

impl Service {
    pub async fn start(cfg: &AppConfig,
                       store: SharedStore,
                       wake: Arc<dyn WakePublisher>,
                       transport: Arc<dyn MessengerTransport>)
                       -> Result<Self, AppError> {
        let f = &cfg.fanout;
        let gate = Arc::new(EligibilityGate::new(store.clone()));
        gate.refresh().await?;

        let cancel = CancellationToken::new();
        let gate_task = gate.spawn_refresh(f.block_refresh, cancel.child_token());

        let shards = Arc::new(ShardAssigner::new(store.clone(), f.shard_count, f.shard_max_age));
        let bulk = Arc::new(BulkWriter::new(store.clone(), wake, f.batch_size, f.batch_pause));
        let planner = Arc::new(FanoutPlanner::new(store.clone(),
                                                  gate.clone(),
                                                  shards.clone(),
                                                  bulk,
                                                  transport,
                                                  f.pin_failure_notice.clone()));
        let scheduler = Arc::new(TenantScheduler::new(store.clone(), planner, shards.clone(), f.idle_interval));
        let supervisor = Arc::new(Supervisor::new(store, scheduler, shards));
        let tenants = supervisor.start_all().await?;
        let sync_task = spawn_tenant_sync(supervisor.clone(), cfg.tenant_sync, cancel.child_token());

        info!("service:started tenants={} shards={} batch={}", tenants, f.shard_count, f.batch_size);
        Ok(Self { gate, supervisor, cancel, gate_task, sync_task })
    }

    pub async fn shutdown(self) -> Result<(), AppError> {
        self.cancel.cancel();
        self.sync_task.await.map_err(|e| AppError::Task(format!("tenant sync: {e}")))?;
        self.supervisor.shutdown().await;
        self.gate_task.await.map_err(|e| AppError::Task(format!("gate refresh: {e}")))?;
        info!("service:stopped");
        Ok(())
    }
}

fn spawn_tenant_sync(supervisor: Arc<Supervisor>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(every) => {}
            }
            match supervisor.sync_tenants().await {
                Ok((0, 0)) => {}
                Ok((started, stopped)) => info!("service:tenant_sync started={started} stopped={stopped}"),
                Err(e) => warn!("service:tenant_sync_failed err={e}"),
            }
        }
    })
}

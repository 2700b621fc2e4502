//! Persistencia masiva de registros de distribución.
//!
//! Las filas se escriben en lotes de `batch_size` con una pausa entre lotes.
//! Un lote formado sólo por duplicados es `InsertOutcome::AlreadyExists` y se
//! ignora. Cualquier otro fallo abandona los lotes restantes y se devuelve al
//! llamador, que reintenta el ciclo completo más tarde (los lotes ya escritos
//! se omiten entonces por unicidad).
//!
//! Si las filas están pendientes de entrega, tras el primer lote confirmado
//! se publica un único wake con el id del tenant.
use std::sync::Arc;
use std::time::Duration;

use fanout_domain::{DistributeRecord, DistributeStatus};
use log::{debug, error, warn};

use crate::errors::{InsertOutcome, StoreError};
use crate::store::SharedStore;
use crate::wake::WakePublisher;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// Filas nuevas escritas.
    pub inserted: usize,
    /// Filas omitidas por existir ya.
    pub duplicates: usize,
    pub batches: usize,
    pub woke: bool,
}

pub struct BulkWriter {
    store: SharedStore,
    wake: Arc<dyn WakePublisher>,
    batch_size: usize,
    batch_pause: Duration,
}

impl BulkWriter {
    pub fn new(store: SharedStore, wake: Arc<dyn WakePublisher>, batch_size: usize, batch_pause: Duration) -> Self {
        Self { store, wake, batch_size: batch_size.max(1), batch_pause }
    }

    pub async fn persist_batch(&self, tenant: &str, rows: &[DistributeRecord]) -> Result<PersistReport, StoreError> {
        let mut report = PersistReport::default();
        if rows.is_empty() {
            return Ok(report);
        }
        let pending = rows[0].status == DistributeStatus::Pending;
        let total_batches = rows.len().div_ceil(self.batch_size);

        for (i, batch) in rows.chunks(self.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.batch_pause).await;
            }
            match self.store.insert_distribute_batch(batch).await {
                Ok(InsertOutcome::Inserted(n)) => {
                    report.inserted += n;
                    report.duplicates += batch.len() - n;
                }
                Ok(InsertOutcome::AlreadyExists) => report.duplicates += batch.len(),
                Err(e) => {
                    error!("bulk:batch_failed tenant={} batch={}/{} err={}", tenant, i + 1, total_batches, e);
                    return Err(e);
                }
            }
            report.batches += 1;

            if pending && !report.woke {
                report.woke = true;
                if let Err(e) = self.wake.publish(tenant).await {
                    warn!("bulk:wake_failed tenant={} err={}", tenant, e);
                }
            }
        }
        debug!("bulk:done tenant={} inserted={} duplicates={} batches={}",
               tenant, report.inserted, report.duplicates, report.batches);
        Ok(report)
    }
}

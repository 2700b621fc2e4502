//! Parámetros del motor. Los valores por defecto son los de producción; la
//! carga desde entorno vive en el binario (`AppConfig`).
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Número de shards por tenant.
    pub shard_count: usize,
    /// Antigüedad máxima de la tabla de shards antes de recalcularla.
    pub shard_max_age: Duration,
    /// Filas por lote en la persistencia masiva.
    pub batch_size: usize,
    /// Pausa entre lotes.
    pub batch_pause: Duration,
    /// Espera del scheduler cuando no hay trabajo.
    pub idle_interval: Duration,
    /// Periodo de recarga completa de bloqueos.
    pub block_refresh: Duration,
    /// Aviso al emisor cuando un pin no encuentra destino (sólo nivel bajo).
    pub pin_failure_notice: String,
    /// Mensajes recientes enviados en el backfill de bienvenida.
    pub backfill_count: usize,
    /// Tope de rondas del bucle de catch-up.
    pub catchup_max_rounds: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self { shard_count: 5,
               shard_max_age: Duration::from_secs(60 * 60),
               batch_size: 200,
               batch_pause: Duration::from_millis(10),
               idle_interval: Duration::from_secs(1),
               block_refresh: Duration::from_secs(5 * 60),
               pin_failure_notice: "The pinned message is no longer available.".to_string(),
               backfill_count: 20,
               catchup_max_rounds: 1_000 }
    }
}

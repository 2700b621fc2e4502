//! fanout-core: motor de difusión multi-tenant.
//!
//! Componentes (de las hojas hacia arriba):
//! - `shard`: reparto de la membresía de cada tenant en N shards por nivel.
//! - `gate`: predicado cacheado de bloqueos (global y por tenant).
//! - `planner`: expansión de un mensaje canónico a registros por destinatario,
//!   con las reescrituras de recall, pin/unpin, quote y transcript.
//! - `bulk`: persistencia idempotente por lotes + señal de wake.
//! - `scheduler`: bucle por tenant, prioridad alta antes que baja.
//! - `catchup`: reenvío del backlog a un único destinatario desde un cursor.
//!
//! Todo el IO pasa por `FanoutStore` (fuente de verdad), `MessengerTransport`
//! y `WakePublisher`.
pub mod bulk;
pub mod catchup;
pub mod config;
pub mod errors;
pub mod gate;
pub mod ingest;
pub mod moderation;
pub mod planner;
pub mod scheduler;
pub mod shard;
pub mod store;
pub mod transport;
pub mod wake;

pub use bulk::{BulkWriter, PersistReport};
pub use catchup::CatchupEngine;
pub use config::FanoutConfig;
pub use errors::{FanoutError, InsertOutcome, StoreError, TransportError};
pub use gate::EligibilityGate;
pub use ingest::{IngestOutcome, Ingestor};
pub use moderation::{Moderation, MAX_MUTE_HOURS};
pub use planner::{Expansion, FanoutPlanner};
pub use scheduler::{Supervisor, TenantScheduler, TickOutcome};
pub use shard::{assign_shards, ShardAssigner, ShardTable, DEFAULT_SHARD};
pub use store::{BlockSnapshot, FanoutStore, InMemoryFanoutStore, LocalCopy, MessageQuery, SharedStore};
pub use transport::{InboundMessage, LoggingTransport, MessengerTransport, OutboundMessage};
pub use wake::{ChannelWakePublisher, WakePublisher, WAKE_CHANNEL};

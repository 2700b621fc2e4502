//! fanout-persistence
//!
//! Implementación Postgres (Diesel + r2d2) de `FanoutStore` y publicador de
//! avisos de despertar sobre Redis pub/sub.
//!
//! Módulos:
//! - `pg`: store relacional, pool y política de reintentos.
//! - `wake`: `RedisWakePublisher`.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;
pub mod wake;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgFanoutStore, PgPool, PoolProvider};
pub use wake::RedisWakePublisher;

//! broadcast-fanout: servicio de difusión multi-tenant.
//!
//! El motor vive en `fanout-core`; este crate aporta la configuración del
//! proceso, sus errores y el arranque (`service`).

pub mod config;
pub mod errors;
pub mod service;

pub use config::AppConfig;
pub use errors::AppError;

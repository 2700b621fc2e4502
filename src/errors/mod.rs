//! Errores del binario de servicio.

use fanout_core::{FanoutError, StoreError, TransportError};
use fanout_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Fanout(#[from] FanoutError),
    #[error("background task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_variant_format() {
        let err = AppError::Config("MESSAGE_SHARD_SIZE=x".into());
        assert_eq!(err.to_string(), "configuration error: MESSAGE_SHARD_SIZE=x");
    }

    #[test]
    fn wrapped_errors_are_transparent() {
        let err: AppError = StoreError::Unavailable("pool".into()).into();
        assert_eq!(err.to_string(), "store unavailable: pool");
        let err: AppError = FanoutError::UnknownTenant("t9".into()).into();
        assert_eq!(err.to_string(), "unknown tenant: t9");
    }
}

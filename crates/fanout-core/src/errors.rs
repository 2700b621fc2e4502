//! Errores del motor.
//!
//! Los conflictos de unicidad NO son errores: el store los devuelve como
//! `InsertOutcome::AlreadyExists`.

use fanout_domain::PayloadError;
use thiserror::Error;

/// Resultado de una inserción idempotente.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Filas nuevas efectivamente escritas (las duplicadas se omiten).
    Inserted(usize),
    /// Todas las filas ya existían.
    AlreadyExists,
}

impl InsertOutcome {
    pub fn inserted(self) -> usize {
        match self {
            InsertOutcome::Inserted(n) => n,
            InsertOutcome::AlreadyExists => 0,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store error: {0}")]
    Backend(String),
}

impl From<PayloadError> for StoreError {
    fn from(e: PayloadError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("invalid priority levels: {0}")]
    InvalidLevel(String),
    #[error("mute of {hours}h exceeds the {max}h limit")]
    InvalidMute { hours: u32, max: u32 },
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("unknown member {user} in tenant {tenant}")]
    UnknownMember { tenant: String, user: String },
    #[error("catch-up did not converge after {rounds} rounds")]
    CatchupExhausted { rounds: usize },
}

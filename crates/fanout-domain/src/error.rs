use thiserror::Error;

/// Errores al decodificar/recodificar payloads de mensajes de control.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PayloadError {
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("invalid json payload: {0}")]
    Json(String),
    #[error("unknown code {code} for {kind}")]
    UnknownCode { kind: &'static str, code: i16 },
}

impl From<base64::DecodeError> for PayloadError {
    fn from(e: base64::DecodeError) -> Self {
        PayloadError::Base64(e.to_string())
    }
}

impl From<serde_json::Error> for PayloadError {
    fn from(e: serde_json::Error) -> Self {
        PayloadError::Json(e.to_string())
    }
}

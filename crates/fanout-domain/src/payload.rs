//! Códecs de payload de mensajes de control.
//!
//! Todos los payloads viajan en base64 sobre el transporte. Se decodifica con
//! el alfabeto estándar y, si falla, con el URL-safe sin padding (ambos
//! aparecen en el tráfico del messenger). Se codifica siempre con el
//! estándar.
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

pub fn encode_data(raw: &[u8]) -> String {
    STANDARD.encode(raw)
}

pub fn decode_data(data: &str) -> Result<Vec<u8>, PayloadError> {
    match STANDARD.decode(data) {
        Ok(bytes) => Ok(bytes),
        Err(_) => Ok(URL_SAFE_NO_PAD.decode(data.trim_end_matches('='))?),
    }
}

pub fn encode_json<T: Serialize>(value: &T) -> Result<String, PayloadError> {
    Ok(encode_data(&serde_json::to_vec(value)?))
}

pub fn decode_json<T: for<'de> Deserialize<'de>>(data: &str) -> Result<T, PayloadError> {
    Ok(serde_json::from_slice(&decode_data(data)?)?)
}

/// `{message_id}` de un recall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallBody {
    pub message_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinAction {
    #[serde(rename = "PIN")]
    Pin,
    #[serde(rename = "UNPIN")]
    Unpin,
}

/// `{action, message_ids}` de un pin/unpin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinBody {
    pub action: PinAction,
    #[serde(default)]
    pub message_ids: Vec<String>,
}

/// Entrada de un transcript (historial reenviado). Los campos que no se
/// modelan se conservan tal cual en `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_height: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Decodifica la lista de entradas de un transcript.
pub fn decode_transcript(data: &str) -> Result<Vec<TranscriptEntry>, PayloadError> {
    decode_json(data)
}

/// Sella cada entrada con `transcript_id` y devuelve el payload recodificado.
pub fn stamp_transcript(entries: &[TranscriptEntry], transcript_id: &str) -> Result<String, PayloadError> {
    let stamped: Vec<TranscriptEntry> = entries.iter()
                                               .cloned()
                                               .map(|mut e| {
                                                   e.transcript_id = Some(transcript_id.to_string());
                                                   e
                                               })
                                               .collect();
    encode_json(&stamped)
}

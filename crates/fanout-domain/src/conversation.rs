//! Id de conversación determinista entre dos participantes.
//!
//! Simétrico: `unique_conversation_id(a, b) == unique_conversation_id(b, a)`.
//! Se hashea `min || max` con SHA-256, se toman 16 bytes y se fijan los bits
//! de versión/variante para que el resultado tenga forma de UUID.
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub fn unique_conversation_id(a: &str, b: &str) -> String {
    let (min, max) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(min.as_bytes());
    hasher.update(max.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x50;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_symmetric_and_uuid_shaped() {
        let ab = unique_conversation_id("bot-1", "user-1");
        let ba = unique_conversation_id("user-1", "bot-1");
        assert_eq!(ab, ba);
        assert!(Uuid::parse_str(&ab).is_ok());
        assert_ne!(ab, unique_conversation_id("bot-1", "user-2"));
    }
}

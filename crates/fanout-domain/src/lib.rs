//! fanout-domain
//!
//! Tipos puros del dominio de difusión (sin IO): mensaje canónico, registro
//! de distribución por destinatario, membresía del tenant, códigos de estado
//! y los códecs de payload de los mensajes de control (recall, pin,
//! transcript).
pub mod conversation;
pub mod distribute;
pub mod error;
pub mod membership;
pub mod message;
pub mod payload;

pub use conversation::unique_conversation_id;
pub use distribute::{DistributeRecord, DistributeStatus};
pub use error::PayloadError;
pub use membership::{MemberStatus, MuteState, PriorityTier, TenantMember};
pub use message::{CanonicalMessage, ControlKind, MessageStatus, CATEGORY_ENCRYPTED_TRANSCRIPT, CATEGORY_PIN,
                  CATEGORY_PLAIN_TEXT, CATEGORY_PLAIN_TRANSCRIPT, CATEGORY_RECALL};
pub use payload::{PinAction, PinBody, RecallBody, TranscriptEntry};

/// Identificador de tenant (client id del bot que opera el canal).
pub type TenantId = String;
/// Identificador de usuario del messenger.
pub type UserId = String;

//! Palisade Wire Formats
//!
//! Addresses, identifiers and every ciphertext that crosses the wire.
//!
//! # Architecture
//!
//! - [`address`]: devices, protocol addresses, service ids
//! - [`messages`]: the closed [`CiphertextMessage`] union and its variants
//! - [`codec`]: CBOR helpers reused by the engine's records and envelopes
//!
//! Decoders never panic on attacker-controlled input; every failure is a
//! [`ProtocolError`] naming the message kind that was malformed.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod address;
pub mod codec;
pub mod error;
pub mod ids;
pub mod messages;
pub mod timestamp;

pub use address::{DeviceId, ProtocolAddress, ServiceId, ServiceIdKind};
pub use error::{ProtocolError, Result};
pub use ids::{KyberPreKeyId, PreKeyId, SignedPreKeyId};
pub use messages::{
    CIPHERTEXT_MESSAGE_CURRENT_VERSION, CiphertextMessage, CiphertextMessageType,
    DecryptionErrorMessage, PlaintextContent, PreKeySignalMessage, SENDERKEY_MESSAGE_CURRENT_VERSION,
    SenderKeyDistributionMessage, SenderKeyMessage, SignalMessage,
    extract_decryption_error_message_from_serialized_content,
};
pub use timestamp::Timestamp;
pub use uuid::Uuid;

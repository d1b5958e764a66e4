//! Wire-level errors.

use palisade_crypto::CryptoError;
use thiserror::Error;

use crate::messages::CiphertextMessageType;

/// Convenience alias for wire results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Failures while encoding or decoding wire bytes.
///
/// Variants that concern a ciphertext carry its [`CiphertextMessageType`] so
/// the engine can report which kind of message was malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended before the fixed-size parts of the message.
    #[error("{message_type} message too short ({length} bytes)")]
    Truncated {
        /// Kind of message being decoded
        message_type: CiphertextMessageType,
        /// Bytes actually supplied
        length: usize,
    },

    /// Version byte names a version this engine no longer speaks.
    #[error("{message_type} message version {version} is no longer supported")]
    LegacyVersion {
        /// Kind of message being decoded
        message_type: CiphertextMessageType,
        /// Version found on the wire
        version: u8,
    },

    /// Version byte names a version newer than this engine.
    #[error("unrecognized {message_type} message version {version}")]
    UnrecognizedVersion {
        /// Kind of message being decoded
        message_type: CiphertextMessageType,
        /// Version found on the wire
        version: u8,
    },

    /// Body did not decode, or a field inside it is invalid.
    #[error("invalid {message_type} message: {reason}")]
    InvalidMessage {
        /// Kind of message being decoded
        message_type: CiphertextMessageType,
        /// What was wrong
        reason: String,
    },

    /// Type byte does not name a ciphertext variant.
    #[error("unknown ciphertext message type {0}")]
    UnknownMessageType(u8),

    /// Service id string or binary form did not parse.
    #[error("invalid service id: {0}")]
    InvalidServiceId(String),

    /// A non-message structure (record, certificate, bundle) failed to
    /// encode or decode.
    #[error("invalid {what} encoding: {reason}")]
    InvalidEncoding {
        /// Structure being processed
        what: &'static str,
        /// What was wrong
        reason: String,
    },

    /// Caller passed an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Key material failed to decode.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl ProtocolError {
    /// Kind of ciphertext the error concerns, if any.
    pub fn message_type(&self) -> Option<CiphertextMessageType> {
        match self {
            Self::Truncated { message_type, .. }
            | Self::LegacyVersion { message_type, .. }
            | Self::UnrecognizedVersion { message_type, .. }
            | Self::InvalidMessage { message_type, .. } => Some(*message_type),
            Self::UnknownMessageType(_)
            | Self::InvalidServiceId(_)
            | Self::InvalidEncoding { .. }
            | Self::InvalidArgument(_)
            | Self::Crypto(_) => None,
        }
    }
}

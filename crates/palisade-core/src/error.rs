//! Engine error types.

use palisade_crypto::CryptoError;
use palisade_proto::{CiphertextMessageType, ProtocolAddress, ProtocolError, Timestamp, Uuid};
use thiserror::Error;

/// Convenience alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Which prekey store an unknown id was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreKeyKind {
    /// One-time X25519 prekey
    OneTime,
    /// Signed X25519 prekey
    Signed,
    /// Signed ML-KEM prekey
    Kyber,
}

/// Errors from engine operations.
///
/// Nothing here aborts the process. Every failure leaves the stored state as
/// it was before the call.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Ciphertext failed to decode, authenticate or decrypt.
    #[error("invalid {message_type}: {reason}")]
    InvalidMessage {
        /// Kind of message that was rejected.
        message_type: CiphertextMessageType,
        /// Why it was rejected.
        reason: String,
    },

    /// Message key for this position was already used.
    #[error("duplicate message: chain at {chain_index}, message counter {counter}")]
    DuplicatedMessage {
        /// Position the receiving chain had already reached.
        chain_index: u32,
        /// Counter (or iteration) carried by the message.
        counter: u32,
    },

    /// Message referenced a prekey this device does not have.
    #[error("unknown {kind:?} prekey id {id}")]
    InvalidKeyId {
        /// Store the id was looked up in.
        kind: PreKeyKind,
        /// The id that was not found.
        id: u32,
    },

    /// Operation needs an established session.
    #[error("session with {address} not found")]
    SessionNotFound {
        /// Peer without a session.
        address: ProtocolAddress,
    },

    /// Identity store refused the peer's identity key.
    #[error("untrusted identity for {address}")]
    UntrustedIdentity {
        /// Peer whose identity was rejected.
        address: ProtocolAddress,
    },

    /// Recipient registration id lies in the reserved range.
    #[error("invalid registration id {registration_id:#x} for {address}")]
    InvalidRegistrationId {
        /// Offending recipient.
        address: ProtocolAddress,
        /// Its registration id.
        registration_id: u32,
    },

    /// Sealed-sender message came from this very device.
    #[error("sealed sender message sent by the local device")]
    SealedSenderSelfSend,

    /// Session was never acknowledged and is too old to send on.
    #[error("session with {address} expired (unacknowledged since {pending_since:?})")]
    SessionExpired {
        /// Peer of the expired session.
        address: ProtocolAddress,
        /// When the unacknowledged handshake started.
        pending_since: Timestamp,
    },

    /// A prekey or certificate signature did not verify.
    #[error("signature verification failed for {what}")]
    InvalidSignature {
        /// What was signed.
        what: &'static str,
    },

    /// No sender-key chain for this sender and group.
    #[error("no sender key state for distribution {distribution_id}")]
    NoSenderKeyState {
        /// Group the chain was looked up for.
        distribution_id: Uuid,
    },

    /// Sender certificate failed validation against the trust root.
    #[error("invalid sender certificate: {reason}")]
    InvalidSenderCertificate {
        /// Which check failed.
        reason: &'static str,
    },

    /// Sealed envelope carries a version this engine does not speak.
    #[error("unknown sealed sender version {0}")]
    UnknownSealedSenderVersion(u8),

    /// Sealed envelope failed to decode or authenticate.
    #[error("invalid sealed sender message: {reason}")]
    InvalidSealedSenderMessage {
        /// Why it was rejected.
        reason: String,
    },

    /// Scannable fingerprints were produced by different versions.
    #[error("fingerprint version mismatch: theirs {theirs}, ours {ours}")]
    FingerprintVersionMismatch {
        /// Version found in the scanned data.
        theirs: u32,
        /// Local version.
        ours: u32,
    },

    /// Caller passed an argument the operation cannot accept.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong.
        reason: String,
    },

    /// Stored state is inconsistent with the requested operation.
    #[error("invalid state in {operation}: {reason}")]
    InvalidState {
        /// Operation that found the problem.
        operation: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// Store implementation reported a failure.
    #[error("store error: {reason}")]
    Store {
        /// Store-specific description.
        reason: String,
    },

    /// Cryptographic primitive failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Non-message wire structure failed to encode or decode.
    #[error("wire error: {0}")]
    Wire(ProtocolError),
}

impl From<ProtocolError> for EngineError {
    fn from(err: ProtocolError) -> Self {
        match err.message_type() {
            Some(message_type) => Self::InvalidMessage { message_type, reason: err.to_string() },
            None => Self::Wire(err),
        }
    }
}

impl EngineError {
    /// Returns true if this error is fatal for the message or operation.
    ///
    /// Fatal errors mean the input is malformed or forged. Transient errors
    /// can be recovered by fetching fresh material (a new bundle, a missing
    /// prekey, a trust decision) and retrying.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidMessage { .. }
            | Self::InvalidSignature { .. }
            | Self::InvalidSenderCertificate { .. }
            | Self::UnknownSealedSenderVersion(_)
            | Self::InvalidSealedSenderMessage { .. }
            | Self::SealedSenderSelfSend
            | Self::InvalidRegistrationId { .. }
            | Self::FingerprintVersionMismatch { .. }
            | Self::InvalidArgument { .. }
            | Self::InvalidState { .. }
            | Self::Crypto(_)
            | Self::Wire(_) => true,

            Self::DuplicatedMessage { .. }
            | Self::InvalidKeyId { .. }
            | Self::SessionNotFound { .. }
            | Self::UntrustedIdentity { .. }
            | Self::SessionExpired { .. }
            | Self::NoSenderKeyState { .. }
            | Self::Store { .. } => false,
        }
    }

    pub(crate) fn invalid_state(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidState { operation, reason: reason.into() }
    }

    pub(crate) fn invalid_message(
        message_type: CiphertextMessageType,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidMessage { message_type, reason: reason.into() }
    }

    pub(crate) fn invalid_sealed_sender(reason: impl Into<String>) -> Self {
        Self::InvalidSealedSenderMessage { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use palisade_proto::DeviceId;

    use super::*;

    #[test]
    fn session_not_found_is_transient() {
        let err = EngineError::SessionNotFound {
            address: ProtocolAddress::new("+14151111111", DeviceId::from(1)),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "session with +14151111111.1 not found");
    }

    #[test]
    fn typed_wire_errors_become_invalid_message() {
        let err = EngineError::from(ProtocolError::Truncated {
            message_type: CiphertextMessageType::Whisper,
            length: 2,
        });
        assert!(matches!(
            err,
            EngineError::InvalidMessage { message_type: CiphertextMessageType::Whisper, .. }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn untyped_wire_errors_stay_wire() {
        let err = EngineError::from(ProtocolError::InvalidServiceId("x".into()));
        assert!(matches!(err, EngineError::Wire(_)));
    }

    #[test]
    fn registration_id_display() {
        let err = EngineError::InvalidRegistrationId {
            address: ProtocolAddress::new("a", DeviceId::from(2)),
            registration_id: 0x4000,
        };
        assert_eq!(err.to_string(), "invalid registration id 0x4000 for a.2");
    }
}

//! Ciphertext messages.
//!
//! Every variant keeps the exact bytes it was decoded from (or encoded to),
//! so MACs and signatures are always checked over what was received and
//! re-serialization is byte-identical.

mod plaintext;
mod sender_key;
mod signal;

use std::fmt;

pub use plaintext::{
    DecryptionErrorMessage, PlaintextContent, extract_decryption_error_message_from_serialized_content,
};
pub use sender_key::{SenderKeyDistributionMessage, SenderKeyMessage};
use serde_repr::{Deserialize_repr, Serialize_repr};
pub use signal::{PreKeySignalMessage, SignalMessage};

use crate::error::{ProtocolError, Result};

/// Version of pairwise messages produced by PQXDH sessions.
pub const CIPHERTEXT_MESSAGE_CURRENT_VERSION: u8 = 4;

/// Version of sender-key messages.
pub const SENDERKEY_MESSAGE_CURRENT_VERSION: u8 = 3;

/// Wire tag of each ciphertext variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum CiphertextMessageType {
    /// [`SignalMessage`]
    Whisper = 2,
    /// [`PreKeySignalMessage`]
    PreKey = 3,
    /// [`SenderKeyDistributionMessage`]
    SenderKeyDistribution = 5,
    /// [`SenderKeyMessage`]
    SenderKey = 7,
    /// [`PlaintextContent`]
    Plaintext = 8,
}

impl TryFrom<u8> for CiphertextMessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(Self::Whisper),
            3 => Ok(Self::PreKey),
            5 => Ok(Self::SenderKeyDistribution),
            7 => Ok(Self::SenderKey),
            8 => Ok(Self::Plaintext),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for CiphertextMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Whisper => "SignalMessage",
            Self::PreKey => "PreKeySignalMessage",
            Self::SenderKeyDistribution => "SenderKeyDistributionMessage",
            Self::SenderKey => "SenderKeyMessage",
            Self::Plaintext => "PlaintextContent",
        })
    }
}

/// Closed union of every ciphertext the engine produces or consumes.
#[derive(Debug, Clone)]
pub enum CiphertextMessage {
    /// Ratchet message on an acknowledged session
    SignalMessage(SignalMessage),
    /// First messages of a session, carrying the agreement inputs
    PreKeySignalMessage(PreKeySignalMessage),
    /// Group message
    SenderKeyMessage(SenderKeyMessage),
    /// Group chain announcement
    SenderKeyDistributionMessage(SenderKeyDistributionMessage),
    /// Unencrypted control content
    PlaintextContent(PlaintextContent),
}

impl CiphertextMessage {
    /// Wire tag.
    pub fn message_type(&self) -> CiphertextMessageType {
        match self {
            Self::SignalMessage(_) => CiphertextMessageType::Whisper,
            Self::PreKeySignalMessage(_) => CiphertextMessageType::PreKey,
            Self::SenderKeyMessage(_) => CiphertextMessageType::SenderKey,
            Self::SenderKeyDistributionMessage(_) => CiphertextMessageType::SenderKeyDistribution,
            Self::PlaintextContent(_) => CiphertextMessageType::Plaintext,
        }
    }

    /// Serialized bytes.
    pub fn serialize(&self) -> &[u8] {
        match self {
            Self::SignalMessage(m) => m.serialized(),
            Self::PreKeySignalMessage(m) => m.serialized(),
            Self::SenderKeyMessage(m) => m.serialized(),
            Self::SenderKeyDistributionMessage(m) => m.serialized(),
            Self::PlaintextContent(m) => m.serialized(),
        }
    }

    /// Decode `bytes` as the variant named by `message_type`.
    pub fn deserialize(message_type: CiphertextMessageType, bytes: &[u8]) -> Result<Self> {
        Ok(match message_type {
            CiphertextMessageType::Whisper => Self::SignalMessage(SignalMessage::try_from(bytes)?),
            CiphertextMessageType::PreKey => {
                Self::PreKeySignalMessage(PreKeySignalMessage::try_from(bytes)?)
            },
            CiphertextMessageType::SenderKey => {
                Self::SenderKeyMessage(SenderKeyMessage::try_from(bytes)?)
            },
            CiphertextMessageType::SenderKeyDistribution => {
                Self::SenderKeyDistributionMessage(SenderKeyDistributionMessage::try_from(bytes)?)
            },
            CiphertextMessageType::Plaintext => {
                Self::PlaintextContent(PlaintextContent::try_from(bytes)?)
            },
        })
    }
}

//! Unencrypted control content and decryption-error reports.
//!
//! A [`PlaintextContent`] travels where a ciphertext would, inside a sealed
//! envelope, so the relay cannot tell it apart. Its only current payload is a
//! [`DecryptionErrorMessage`] asking the peer to resend or re-key.
//!
//! ```text
//! PlaintextContent  [0xC0][CBOR content][0x80]
//! ```

use palisade_crypto::{PublicKey, serde_bytes};
use serde::{Deserialize, Serialize};

use super::{CiphertextMessageType, PreKeySignalMessage, SignalMessage};
use crate::{
    codec,
    error::{ProtocolError, Result},
    timestamp::Timestamp,
};

const PLAINTEXT_CONTEXT_IDENTIFIER_BYTE: u8 = 0xC0;
const PADDING_BOUNDARY_BYTE: u8 = 0x80;

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, with = "serde_bytes::option")]
    decryption_error_message: Option<Vec<u8>>,
}

/// Unencrypted control message.
#[derive(Debug, Clone)]
pub struct PlaintextContent {
    serialized: Box<[u8]>,
}

impl PlaintextContent {
    /// Content bytes following the identifier byte, padding boundary included.
    pub fn body(&self) -> &[u8] {
        &self.serialized[1..]
    }

    /// Wire bytes.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<DecryptionErrorMessage> for PlaintextContent {
    type Error = ProtocolError;

    fn try_from(message: DecryptionErrorMessage) -> Result<Self> {
        let content = Content { decryption_error_message: Some(message.serialized.into_vec()) };
        let mut serialized = vec![PLAINTEXT_CONTEXT_IDENTIFIER_BYTE];
        codec::encode_body(&content, &mut serialized, CiphertextMessageType::Plaintext)?;
        serialized.push(PADDING_BOUNDARY_BYTE);
        Ok(Self { serialized: serialized.into_boxed_slice() })
    }
}

impl TryFrom<&[u8]> for PlaintextContent {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let message_type = CiphertextMessageType::Plaintext;
        match value.first() {
            None => Err(ProtocolError::Truncated { message_type, length: 0 }),
            Some(&PLAINTEXT_CONTEXT_IDENTIFIER_BYTE) if value.len() > 1 => {
                Ok(Self { serialized: value.into() })
            },
            Some(_) => Err(ProtocolError::InvalidMessage {
                message_type,
                reason: "missing plaintext content identifier".into(),
            }),
        }
    }
}

/// Pull the [`DecryptionErrorMessage`] out of padded content bytes (the
/// [`PlaintextContent::body`] of a received message).
pub fn extract_decryption_error_message_from_serialized_content(
    bytes: &[u8],
) -> Result<DecryptionErrorMessage> {
    let message_type = CiphertextMessageType::Plaintext;
    let unpadded = match bytes.iter().rposition(|&b| b != 0) {
        Some(end) if bytes[end] == PADDING_BOUNDARY_BYTE => &bytes[..end],
        _ => {
            return Err(ProtocolError::InvalidMessage {
                message_type,
                reason: "invalid content padding".into(),
            });
        },
    };
    let content: Content = codec::decode_body(unpadded, message_type)?;
    let inner = content.decryption_error_message.ok_or_else(|| ProtocolError::InvalidMessage {
        message_type,
        reason: "content does not contain a decryption error message".into(),
    })?;
    DecryptionErrorMessage::try_from(inner.as_slice())
}

#[derive(Serialize, Deserialize)]
struct DecryptionErrorMessageBody {
    ratchet_key: Option<PublicKey>,
    timestamp: Timestamp,
    device_id: u32,
}

/// Report that a message from the peer could not be decrypted.
#[derive(Debug, Clone)]
pub struct DecryptionErrorMessage {
    ratchet_key: Option<PublicKey>,
    timestamp: Timestamp,
    device_id: u32,
    serialized: Box<[u8]>,
}

impl DecryptionErrorMessage {
    /// Describe a failed message by its bytes and type.
    ///
    /// Pairwise messages contribute their sender ratchet key so the peer can
    /// tell which session went wrong; group messages carry none.
    pub fn for_original(
        original_bytes: &[u8],
        original_type: CiphertextMessageType,
        original_timestamp: Timestamp,
        original_sender_device_id: u32,
    ) -> Result<Self> {
        let ratchet_key = match original_type {
            CiphertextMessageType::Whisper => {
                Some(*SignalMessage::try_from(original_bytes)?.sender_ratchet_key())
            },
            CiphertextMessageType::PreKey => {
                Some(*PreKeySignalMessage::try_from(original_bytes)?.message().sender_ratchet_key())
            },
            CiphertextMessageType::SenderKey => None,
            CiphertextMessageType::SenderKeyDistribution | CiphertextMessageType::Plaintext => {
                return Err(ProtocolError::InvalidArgument(format!(
                    "cannot report a decryption error for {original_type}"
                )));
            },
        };

        let body = DecryptionErrorMessageBody {
            ratchet_key,
            timestamp: original_timestamp,
            device_id: original_sender_device_id,
        };
        let serialized = codec::to_cbor(&body, "decryption error message")?;
        Ok(Self {
            ratchet_key,
            timestamp: original_timestamp,
            device_id: original_sender_device_id,
            serialized: serialized.into_boxed_slice(),
        })
    }

    /// Ratchet key of the failed message, if it was pairwise.
    pub fn ratchet_key(&self) -> Option<&PublicKey> {
        self.ratchet_key.as_ref()
    }

    /// Timestamp of the failed message.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Device that sent the failed message.
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Encoded bytes.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for DecryptionErrorMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let body: DecryptionErrorMessageBody =
            codec::decode_body(value, CiphertextMessageType::Plaintext)?;
        Ok(Self {
            ratchet_key: body.ratchet_key,
            timestamp: body.timestamp,
            device_id: body.device_id,
            serialized: value.into(),
        })
    }
}

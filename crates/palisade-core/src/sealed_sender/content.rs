//! The plaintext inside a sealed-sender envelope.

use palisade_crypto::serde_bytes;
use palisade_proto::{CiphertextMessage, CiphertextMessageType, codec};
use serde::{Deserialize, Serialize};

use super::certificate::SenderCertificate;
use crate::error::{EngineError, Result};

/// How a recipient should treat content it fails to decrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentHint {
    /// Show an error to the user.
    #[default]
    Default,
    /// The sender can resend; ask for it quietly.
    Resendable,
    /// Drop silently.
    Implicit,
    /// A value this version does not know. Carried through unchanged.
    Unknown(u32),
}

impl ContentHint {
    /// Wire value.
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::Default => 0,
            Self::Resendable => 1,
            Self::Implicit => 2,
            Self::Unknown(value) => value,
        }
    }
}

impl From<u32> for ContentHint {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Default,
            1 => Self::Resendable,
            2 => Self::Implicit,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ContentBody {
    msg_type: u8,
    #[serde(with = "serde_bytes")]
    sender_certificate: Vec<u8>,
    #[serde(with = "serde_bytes")]
    content: Vec<u8>,
    content_hint: u32,
    #[serde(with = "serde_bytes::option", default)]
    group_id: Option<Vec<u8>>,
}

/// Inner ciphertext plus everything the recipient needs to attribute it.
#[derive(Debug, Clone)]
pub struct UnidentifiedSenderMessageContent {
    msg_type: CiphertextMessageType,
    sender: SenderCertificate,
    contents: Vec<u8>,
    content_hint: ContentHint,
    group_id: Option<Vec<u8>>,
    serialized: Vec<u8>,
}

impl UnidentifiedSenderMessageContent {
    /// Wrap raw message bytes of type `msg_type`.
    pub fn new(
        msg_type: CiphertextMessageType,
        sender: SenderCertificate,
        contents: Vec<u8>,
        content_hint: ContentHint,
        group_id: Option<Vec<u8>>,
    ) -> Result<Self> {
        let serialized = codec::to_cbor(
            &ContentBody {
                msg_type: msg_type as u8,
                sender_certificate: sender.serialized().to_vec(),
                content: contents.clone(),
                content_hint: content_hint.to_u32(),
                group_id: group_id.clone(),
            },
            "sealed sender content",
        )?;
        Ok(Self { msg_type, sender, contents, content_hint, group_id, serialized })
    }

    /// Wrap an already built ciphertext message.
    pub fn from_message(
        message: &CiphertextMessage,
        sender: SenderCertificate,
        content_hint: ContentHint,
        group_id: Option<Vec<u8>>,
    ) -> Result<Self> {
        Self::new(message.message_type(), sender, message.serialize().to_vec(), content_hint, group_id)
    }

    /// Decode decrypted envelope contents.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let body: ContentBody = codec::from_cbor(bytes, "sealed sender content")
            .map_err(|e| EngineError::invalid_sealed_sender(e.to_string()))?;
        let msg_type = CiphertextMessageType::try_from(body.msg_type)
            .map_err(|e| EngineError::invalid_sealed_sender(e.to_string()))?;
        Ok(Self {
            msg_type,
            sender: SenderCertificate::deserialize(&body.sender_certificate)?,
            contents: body.content,
            content_hint: ContentHint::from(body.content_hint),
            group_id: body.group_id,
            serialized: bytes.to_vec(),
        })
    }

    /// Type of the inner message.
    pub fn msg_type(&self) -> CiphertextMessageType {
        self.msg_type
    }

    /// Sender certificate.
    pub fn sender(&self) -> &SenderCertificate {
        &self.sender
    }

    /// Inner message bytes.
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// Content hint.
    pub fn content_hint(&self) -> ContentHint {
        self.content_hint
    }

    /// Group the message belongs to, if any.
    pub fn group_id(&self) -> Option<&[u8]> {
        self.group_id.as_deref()
    }

    /// Encoded form, the plaintext of the envelope.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

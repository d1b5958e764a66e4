//! Group (sender-key) messages.
//!
//! ```text
//! SenderKeyMessage              [version][CBOR body][Ed25519 signature: 64 bytes]
//! SenderKeyDistributionMessage  [version][CBOR body]
//! ```

use palisade_crypto::{IdentityKey, IdentityKeyPair, identity::SIGNATURE_LENGTH, serde_bytes};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CiphertextMessageType, SENDERKEY_MESSAGE_CURRENT_VERSION};
use crate::{
    codec,
    error::{ProtocolError, Result},
};

#[derive(Serialize, Deserialize)]
struct SenderKeyMessageBody {
    distribution_id: [u8; 16],
    chain_id: u32,
    iteration: u32,
    #[serde(with = "serde_bytes")]
    ciphertext: Vec<u8>,
}

/// Signed group message.
#[derive(Debug, Clone)]
pub struct SenderKeyMessage {
    message_version: u8,
    distribution_id: Uuid,
    chain_id: u32,
    iteration: u32,
    ciphertext: Box<[u8]>,
    serialized: Box<[u8]>,
}

impl SenderKeyMessage {
    /// Build and sign a group message.
    pub fn new(
        message_version: u8,
        distribution_id: Uuid,
        chain_id: u32,
        iteration: u32,
        ciphertext: &[u8],
        signature_key: &IdentityKeyPair,
    ) -> Result<Self> {
        let body = SenderKeyMessageBody {
            distribution_id: distribution_id.into_bytes(),
            chain_id,
            iteration,
            ciphertext: ciphertext.to_vec(),
        };
        let mut serialized =
            vec![codec::version_byte(message_version, SENDERKEY_MESSAGE_CURRENT_VERSION)];
        codec::encode_body(&body, &mut serialized, CiphertextMessageType::SenderKey)?;
        let signature = signature_key.sign(&serialized);
        serialized.extend_from_slice(&signature);

        Ok(Self {
            message_version,
            distribution_id,
            chain_id,
            iteration,
            ciphertext: body.ciphertext.into_boxed_slice(),
            serialized: serialized.into_boxed_slice(),
        })
    }

    /// Check the signature trailer against the chain's signing key.
    pub fn verify_signature(&self, signature_key: &IdentityKey) -> bool {
        let (content, signature) = self.serialized.split_at(self.serialized.len() - SIGNATURE_LENGTH);
        signature_key.verify_signature(content, signature)
    }

    /// Message version.
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    /// Group the message belongs to.
    pub fn distribution_id(&self) -> Uuid {
        self.distribution_id
    }

    /// Sender chain the message was produced on.
    pub fn chain_id(&self) -> u32 {
        self.chain_id
    }

    /// Chain iteration of the message key.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// AEAD ciphertext.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Wire bytes.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for SenderKeyMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let message_type = CiphertextMessageType::SenderKey;
        if value.len() < 1 + SIGNATURE_LENGTH {
            return Err(ProtocolError::Truncated { message_type, length: value.len() });
        }
        let message_version =
            codec::check_version(value[0], SENDERKEY_MESSAGE_CURRENT_VERSION, message_type)?;
        let body: SenderKeyMessageBody =
            codec::decode_body(&value[1..value.len() - SIGNATURE_LENGTH], message_type)?;

        Ok(Self {
            message_version,
            distribution_id: Uuid::from_bytes(body.distribution_id),
            chain_id: body.chain_id,
            iteration: body.iteration,
            ciphertext: body.ciphertext.into_boxed_slice(),
            serialized: value.into(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct SenderKeyDistributionMessageBody {
    distribution_id: [u8; 16],
    chain_id: u32,
    iteration: u32,
    #[serde(with = "serde_bytes")]
    chain_key: Vec<u8>,
    signing_key: IdentityKey,
}

/// Announcement of a sender chain, sent to each member over a pairwise
/// session.
#[derive(Debug, Clone)]
pub struct SenderKeyDistributionMessage {
    message_version: u8,
    distribution_id: Uuid,
    chain_id: u32,
    iteration: u32,
    chain_key: [u8; 32],
    signing_key: IdentityKey,
    serialized: Box<[u8]>,
}

impl SenderKeyDistributionMessage {
    /// Announce `chain_key` at `iteration`.
    pub fn new(
        message_version: u8,
        distribution_id: Uuid,
        chain_id: u32,
        iteration: u32,
        chain_key: [u8; 32],
        signing_key: IdentityKey,
    ) -> Result<Self> {
        let body = SenderKeyDistributionMessageBody {
            distribution_id: distribution_id.into_bytes(),
            chain_id,
            iteration,
            chain_key: chain_key.to_vec(),
            signing_key,
        };
        let mut serialized =
            vec![codec::version_byte(message_version, SENDERKEY_MESSAGE_CURRENT_VERSION)];
        codec::encode_body(&body, &mut serialized, CiphertextMessageType::SenderKeyDistribution)?;

        Ok(Self {
            message_version,
            distribution_id,
            chain_id,
            iteration,
            chain_key,
            signing_key,
            serialized: serialized.into_boxed_slice(),
        })
    }

    /// Message version.
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    /// Group the chain belongs to.
    pub fn distribution_id(&self) -> Uuid {
        self.distribution_id
    }

    /// Chain id.
    pub fn chain_id(&self) -> u32 {
        self.chain_id
    }

    /// Iteration `chain_key` sits at.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Chain key.
    pub fn chain_key(&self) -> &[u8; 32] {
        &self.chain_key
    }

    /// Key that signs the chain's messages.
    pub fn signing_key(&self) -> &IdentityKey {
        &self.signing_key
    }

    /// Wire bytes.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for SenderKeyDistributionMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let message_type = CiphertextMessageType::SenderKeyDistribution;
        let (&version, body) =
            value.split_first().ok_or(ProtocolError::Truncated { message_type, length: 0 })?;
        let message_version =
            codec::check_version(version, SENDERKEY_MESSAGE_CURRENT_VERSION, message_type)?;
        let body: SenderKeyDistributionMessageBody = codec::decode_body(body, message_type)?;
        let chain_key: [u8; 32] = body.chain_key.as_slice().try_into().map_err(|_| {
            ProtocolError::InvalidMessage {
                message_type,
                reason: format!("chain key of {} bytes", body.chain_key.len()),
            }
        })?;

        Ok(Self {
            message_version,
            distribution_id: Uuid::from_bytes(body.distribution_id),
            chain_id: body.chain_id,
            iteration: body.iteration,
            chain_key,
            signing_key: body.signing_key,
            serialized: value.into(),
        })
    }
}

//! Pairwise ratchet messages.
//!
//! # Wire format
//!
//! ```text
//! SignalMessage        [version][CBOR body][MAC: 8 bytes]
//! PreKeySignalMessage  [version][CBOR body]
//! ```
//!
//! The MAC is HMAC-SHA256 truncated to 8 bytes, keyed by the message's MAC
//! key, over `sender identity || receiver identity || version || body`.

use palisade_crypto::{IdentityKey, PublicKey, mac, serde_bytes};
use serde::{Deserialize, Serialize};

use super::{CIPHERTEXT_MESSAGE_CURRENT_VERSION, CiphertextMessageType};
use crate::{
    codec,
    error::{ProtocolError, Result},
    ids::{KyberPreKeyId, PreKeyId, SignedPreKeyId},
};

#[derive(Serialize, Deserialize)]
struct SignalMessageBody {
    ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    #[serde(with = "serde_bytes")]
    ciphertext: Vec<u8>,
}

/// Ratchet message.
#[derive(Debug, Clone)]
pub struct SignalMessage {
    message_version: u8,
    sender_ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Box<[u8]>,
    serialized: Box<[u8]>,
}

impl SignalMessage {
    /// Length of the truncated MAC trailer.
    pub const MAC_LENGTH: usize = 8;

    /// Build and MAC a message.
    pub fn new(
        message_version: u8,
        mac_key: &[u8; 32],
        sender_ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: &[u8],
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
    ) -> Result<Self> {
        let body = SignalMessageBody {
            ratchet_key: sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext: ciphertext.to_vec(),
        };

        let mut serialized =
            vec![codec::version_byte(message_version, CIPHERTEXT_MESSAGE_CURRENT_VERSION)];
        codec::encode_body(&body, &mut serialized, CiphertextMessageType::Whisper)?;
        let mac =
            Self::compute_mac(sender_identity_key, receiver_identity_key, mac_key, &serialized)?;
        serialized.extend_from_slice(&mac);

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext: body.ciphertext.into_boxed_slice(),
            serialized: serialized.into_boxed_slice(),
        })
    }

    /// Message version (high nibble of the version byte).
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    /// Sender's current ratchet public key.
    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.sender_ratchet_key
    }

    /// Position in the sender's current chain.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Number of messages sent on the sender's previous sending chain.
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    /// AEAD ciphertext of the body.
    pub fn body(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Wire bytes.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// Check the MAC trailer in constant time.
    pub fn verify_mac(
        &self,
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        mac_key: &[u8; 32],
    ) -> Result<bool> {
        let (content, their_mac) = self.serialized.split_at(self.serialized.len() - Self::MAC_LENGTH);
        let our_mac = Self::compute_mac(sender_identity_key, receiver_identity_key, mac_key, content)?;
        Ok(mac::constant_time_eq(&our_mac, their_mac))
    }

    fn compute_mac(
        sender_identity_key: &IdentityKey,
        receiver_identity_key: &IdentityKey,
        mac_key: &[u8; 32],
        message: &[u8],
    ) -> Result<[u8; Self::MAC_LENGTH]> {
        let full = mac::hmac_sha256(
            mac_key,
            &[&sender_identity_key.serialize(), &receiver_identity_key.serialize(), message],
        )?;
        let mut out = [0u8; Self::MAC_LENGTH];
        out.copy_from_slice(&full[..Self::MAC_LENGTH]);
        Ok(out)
    }
}

impl TryFrom<&[u8]> for SignalMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let message_type = CiphertextMessageType::Whisper;
        if value.len() < 1 + Self::MAC_LENGTH {
            return Err(ProtocolError::Truncated { message_type, length: value.len() });
        }
        let message_version =
            codec::check_version(value[0], CIPHERTEXT_MESSAGE_CURRENT_VERSION, message_type)?;
        let body: SignalMessageBody =
            codec::decode_body(&value[1..value.len() - Self::MAC_LENGTH], message_type)?;

        Ok(Self {
            message_version,
            sender_ratchet_key: body.ratchet_key,
            counter: body.counter,
            previous_counter: body.previous_counter,
            ciphertext: body.ciphertext.into_boxed_slice(),
            serialized: value.into(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct PreKeySignalMessageBody {
    registration_id: u32,
    pre_key_id: Option<PreKeyId>,
    signed_pre_key_id: SignedPreKeyId,
    kyber_pre_key_id: KyberPreKeyId,
    #[serde(with = "serde_bytes")]
    kyber_ciphertext: Vec<u8>,
    base_key: PublicKey,
    identity_key: IdentityKey,
    #[serde(with = "serde_bytes")]
    message: Vec<u8>,
}

/// Ratchet message plus everything the receiver needs to run the initial
/// agreement.
#[derive(Debug, Clone)]
pub struct PreKeySignalMessage {
    message_version: u8,
    registration_id: u32,
    pre_key_id: Option<PreKeyId>,
    signed_pre_key_id: SignedPreKeyId,
    kyber_pre_key_id: KyberPreKeyId,
    kyber_ciphertext: Box<[u8]>,
    base_key: PublicKey,
    identity_key: IdentityKey,
    message: SignalMessage,
    serialized: Box<[u8]>,
}

impl PreKeySignalMessage {
    /// Wrap `message` with the agreement inputs.
    pub fn new(
        message_version: u8,
        registration_id: u32,
        pre_key_id: Option<PreKeyId>,
        signed_pre_key_id: SignedPreKeyId,
        kyber_pre_key_id: KyberPreKeyId,
        kyber_ciphertext: &[u8],
        base_key: PublicKey,
        identity_key: IdentityKey,
        message: SignalMessage,
    ) -> Result<Self> {
        let body = PreKeySignalMessageBody {
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            kyber_pre_key_id,
            kyber_ciphertext: kyber_ciphertext.to_vec(),
            base_key,
            identity_key,
            message: message.serialized().to_vec(),
        };

        let mut serialized =
            vec![codec::version_byte(message_version, CIPHERTEXT_MESSAGE_CURRENT_VERSION)];
        codec::encode_body(&body, &mut serialized, CiphertextMessageType::PreKey)?;

        Ok(Self {
            message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            kyber_pre_key_id,
            kyber_ciphertext: body.kyber_ciphertext.into_boxed_slice(),
            base_key,
            identity_key,
            message,
            serialized: serialized.into_boxed_slice(),
        })
    }

    /// Message version.
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    /// Sender's registration id.
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// One-time prekey consumed by the agreement, if any.
    pub fn pre_key_id(&self) -> Option<PreKeyId> {
        self.pre_key_id
    }

    /// Signed prekey used by the agreement.
    pub fn signed_pre_key_id(&self) -> SignedPreKeyId {
        self.signed_pre_key_id
    }

    /// Kyber prekey used by the agreement.
    pub fn kyber_pre_key_id(&self) -> KyberPreKeyId {
        self.kyber_pre_key_id
    }

    /// Tagged ML-KEM ciphertext.
    pub fn kyber_ciphertext(&self) -> &[u8] {
        &self.kyber_ciphertext
    }

    /// Sender's ephemeral base key.
    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    /// Sender's identity key.
    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    /// Embedded ratchet message.
    pub fn message(&self) -> &SignalMessage {
        &self.message
    }

    /// Wire bytes.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for PreKeySignalMessage {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let message_type = CiphertextMessageType::PreKey;
        let (&version, body) =
            value.split_first().ok_or(ProtocolError::Truncated { message_type, length: 0 })?;
        let message_version =
            codec::check_version(version, CIPHERTEXT_MESSAGE_CURRENT_VERSION, message_type)?;
        let body: PreKeySignalMessageBody = codec::decode_body(body, message_type)?;

        let message = SignalMessage::try_from(body.message.as_slice()).map_err(|e| {
            ProtocolError::InvalidMessage { message_type, reason: format!("embedded message: {e}") }
        })?;
        if message.message_version() != message_version {
            return Err(ProtocolError::InvalidMessage {
                message_type,
                reason: "embedded message version differs".into(),
            });
        }

        Ok(Self {
            message_version,
            registration_id: body.registration_id,
            pre_key_id: body.pre_key_id,
            signed_pre_key_id: body.signed_pre_key_id,
            kyber_pre_key_id: body.kyber_pre_key_id,
            kyber_ciphertext: body.kyber_ciphertext.into_boxed_slice(),
            base_key: body.base_key,
            identity_key: body.identity_key,
            message,
            serialized: value.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use palisade_crypto::{IdentityKeyPair, KeyPair};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn sample(rng: &mut ChaCha20Rng) -> (SignalMessage, IdentityKey, IdentityKey) {
        let sender = IdentityKeyPair::generate(rng).identity_key();
        let receiver = IdentityKeyPair::generate(rng).identity_key();
        let ratchet = KeyPair::generate(rng).public_key;
        let message =
            SignalMessage::new(4, &[5u8; 32], ratchet, 7, 3, b"ciphertext", &sender, &receiver)
                .unwrap();
        (message, sender, receiver)
    }

    #[test]
    fn signal_message_decode_preserves_bytes() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let (message, sender, receiver) = sample(&mut rng);

        let decoded = SignalMessage::try_from(message.serialized()).unwrap();
        assert_eq!(decoded.serialized(), message.serialized());
        assert_eq!(decoded.counter(), 7);
        assert_eq!(decoded.previous_counter(), 3);
        assert_eq!(decoded.body(), b"ciphertext");
        assert!(decoded.verify_mac(&sender, &receiver, &[5u8; 32]).unwrap());
    }

    #[test]
    fn mac_binds_identities_and_bytes() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let (message, sender, receiver) = sample(&mut rng);

        assert!(!message.verify_mac(&receiver, &sender, &[5u8; 32]).unwrap());
        assert!(!message.verify_mac(&sender, &receiver, &[6u8; 32]).unwrap());

        let mut tampered = message.serialized().to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        let tampered = SignalMessage::try_from(tampered.as_slice()).unwrap();
        assert!(!tampered.verify_mac(&sender, &receiver, &[5u8; 32]).unwrap());
    }

    #[test]
    fn legacy_version_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let (message, _, _) = sample(&mut rng);
        let mut bytes = message.serialized().to_vec();
        bytes[0] = 0x33;

        assert!(matches!(
            SignalMessage::try_from(bytes.as_slice()),
            Err(ProtocolError::LegacyVersion { version: 3, .. })
        ));
    }

    #[test]
    fn prekey_message_decode_preserves_fields() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let (message, sender, _) = sample(&mut rng);
        let base_key = KeyPair::generate(&mut rng).public_key;

        let prekey = PreKeySignalMessage::new(
            4,
            0x1234,
            Some(PreKeyId::from(4570)),
            SignedPreKeyId::from(3006),
            KyberPreKeyId::from(8888),
            &[0x08, 1, 2, 3],
            base_key,
            sender,
            message.clone(),
        )
        .unwrap();

        let decoded = PreKeySignalMessage::try_from(prekey.serialized()).unwrap();
        assert_eq!(decoded.serialized(), prekey.serialized());
        assert_eq!(decoded.registration_id(), 0x1234);
        assert_eq!(decoded.pre_key_id(), Some(PreKeyId::from(4570)));
        assert_eq!(decoded.signed_pre_key_id(), SignedPreKeyId::from(3006));
        assert_eq!(decoded.kyber_pre_key_id(), KyberPreKeyId::from(8888));
        assert_eq!(decoded.kyber_ciphertext(), &[0x08, 1, 2, 3]);
        assert_eq!(decoded.base_key(), &base_key);
        assert_eq!(decoded.identity_key(), &sender);
        assert_eq!(decoded.message().serialized(), message.serialized());
    }

    #[test]
    fn truncated_signal_message() {
        assert!(matches!(
            SignalMessage::try_from(&[0x44, 0, 0][..]),
            Err(ProtocolError::Truncated { length: 3, .. })
        ));
    }
}

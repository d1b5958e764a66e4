//! Published prekey bundles.

use palisade_crypto::{IdentityKey, KyberPublicKey, PublicKey, serde_bytes};
use palisade_proto::{DeviceId, KyberPreKeyId, PreKeyId, SignedPreKeyId};
use serde::{Deserialize, Serialize};

use super::{decode_record, encode_record};
use crate::error::Result;

/// Everything a sender needs to start a session with a device that is
/// offline: its identity, a signed X25519 prekey, a signed ML-KEM prekey and
/// optionally a one-time X25519 prekey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyBundle {
    registration_id: u32,
    device_id: DeviceId,
    pre_key: Option<(PreKeyId, PublicKey)>,
    signed_pre_key_id: SignedPreKeyId,
    signed_pre_key_public: PublicKey,
    #[serde(with = "serde_bytes")]
    signed_pre_key_signature: Vec<u8>,
    identity_key: IdentityKey,
    kyber_pre_key_id: KyberPreKeyId,
    kyber_pre_key_public: KyberPublicKey,
    #[serde(with = "serde_bytes")]
    kyber_pre_key_signature: Vec<u8>,
}

impl PreKeyBundle {
    /// Assemble a bundle. Signatures are checked when the bundle is
    /// processed, not here.
    pub fn new(
        registration_id: u32,
        device_id: DeviceId,
        pre_key: Option<(PreKeyId, PublicKey)>,
        signed_pre_key_id: SignedPreKeyId,
        signed_pre_key_public: PublicKey,
        signed_pre_key_signature: Vec<u8>,
        identity_key: IdentityKey,
        kyber_pre_key_id: KyberPreKeyId,
        kyber_pre_key_public: KyberPublicKey,
        kyber_pre_key_signature: Vec<u8>,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            pre_key,
            signed_pre_key_id,
            signed_pre_key_public,
            signed_pre_key_signature,
            identity_key,
            kyber_pre_key_id,
            kyber_pre_key_public,
            kyber_pre_key_signature,
        }
    }

    /// Owner's registration id.
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// Owner's device id.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// One-time prekey id, if the bundle has one.
    pub fn pre_key_id(&self) -> Option<PreKeyId> {
        self.pre_key.map(|(id, _)| id)
    }

    /// One-time prekey, if the bundle has one.
    pub fn pre_key_public(&self) -> Option<&PublicKey> {
        self.pre_key.as_ref().map(|(_, key)| key)
    }

    /// Signed prekey id.
    pub fn signed_pre_key_id(&self) -> SignedPreKeyId {
        self.signed_pre_key_id
    }

    /// Signed prekey.
    pub fn signed_pre_key_public(&self) -> &PublicKey {
        &self.signed_pre_key_public
    }

    /// Identity signature over the serialized signed prekey.
    pub fn signed_pre_key_signature(&self) -> &[u8] {
        &self.signed_pre_key_signature
    }

    /// Owner's identity key.
    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    /// Kyber prekey id.
    pub fn kyber_pre_key_id(&self) -> KyberPreKeyId {
        self.kyber_pre_key_id
    }

    /// Kyber prekey.
    pub fn kyber_pre_key_public(&self) -> &KyberPublicKey {
        &self.kyber_pre_key_public
    }

    /// Identity signature over the serialized Kyber prekey.
    pub fn kyber_pre_key_signature(&self) -> &[u8] {
        &self.kyber_pre_key_signature
    }

    /// Versioned encoding.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_record(self, "prekey bundle")
    }

    /// Decode a versioned encoding.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        decode_record(bytes, "prekey bundle")
    }
}

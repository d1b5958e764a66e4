//! Locally held prekeys.

use palisade_crypto::{IdentityKeyPair, KeyPair, KyberKeyPair, PublicKey, serde_bytes};
use palisade_proto::{KyberPreKeyId, PreKeyId, SignedPreKeyId, Timestamp};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use super::{decode_record, encode_record};
use crate::error::Result;

/// One-time X25519 prekey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyRecord {
    id: PreKeyId,
    key_pair: KeyPair,
}

impl PreKeyRecord {
    /// Record for an existing key pair.
    pub fn new(id: PreKeyId, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }

    /// Record with a freshly generated key pair.
    pub fn generate<R: RngCore + CryptoRng>(id: PreKeyId, rng: &mut R) -> Self {
        Self::new(id, KeyPair::generate(rng))
    }

    /// Prekey id.
    pub fn id(&self) -> PreKeyId {
        self.id
    }

    /// Key pair.
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Public key.
    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key
    }

    /// Versioned encoding.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_record(self, "prekey record")
    }

    /// Decode a versioned encoding.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        decode_record(bytes, "prekey record")
    }
}

/// Signed X25519 prekey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    id: SignedPreKeyId,
    timestamp: Timestamp,
    key_pair: KeyPair,
    #[serde(with = "serde_bytes")]
    signature: Vec<u8>,
}

impl SignedPreKeyRecord {
    /// Record for an existing key pair and signature.
    pub fn new(id: SignedPreKeyId, timestamp: Timestamp, key_pair: KeyPair, signature: Vec<u8>) -> Self {
        Self { id, timestamp, key_pair, signature }
    }

    /// Generate a key pair and sign its public key with `identity`.
    pub fn generate<R: RngCore + CryptoRng>(
        id: SignedPreKeyId,
        timestamp: Timestamp,
        identity: &IdentityKeyPair,
        rng: &mut R,
    ) -> Self {
        let key_pair = KeyPair::generate(rng);
        let signature = identity.sign(&key_pair.public_key.serialize());
        Self::new(id, timestamp, key_pair, signature)
    }

    /// Prekey id.
    pub fn id(&self) -> SignedPreKeyId {
        self.id
    }

    /// Creation time.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Key pair.
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Public key.
    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key
    }

    /// Identity signature over the serialized public key.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Versioned encoding.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_record(self, "signed prekey record")
    }

    /// Decode a versioned encoding.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        decode_record(bytes, "signed prekey record")
    }
}

/// Signed ML-KEM-1024 prekey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KyberPreKeyRecord {
    id: KyberPreKeyId,
    timestamp: Timestamp,
    key_pair: KyberKeyPair,
    #[serde(with = "serde_bytes")]
    signature: Vec<u8>,
}

impl KyberPreKeyRecord {
    /// Record for an existing key pair and signature.
    pub fn new(id: KyberPreKeyId, timestamp: Timestamp, key_pair: KyberKeyPair, signature: Vec<u8>) -> Self {
        Self { id, timestamp, key_pair, signature }
    }

    /// Generate a key pair and sign its public key with `identity`.
    pub fn generate<R: RngCore + CryptoRng>(
        id: KyberPreKeyId,
        timestamp: Timestamp,
        identity: &IdentityKeyPair,
        rng: &mut R,
    ) -> Result<Self> {
        let key_pair = KyberKeyPair::generate(rng)?;
        let signature = identity.sign(&key_pair.public_key.serialize());
        Ok(Self::new(id, timestamp, key_pair, signature))
    }

    /// Prekey id.
    pub fn id(&self) -> KyberPreKeyId {
        self.id
    }

    /// Creation time.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Key pair.
    pub fn key_pair(&self) -> &KyberKeyPair {
        &self.key_pair
    }

    /// Identity signature over the serialized public key.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Versioned encoding.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_record(self, "kyber prekey record")
    }

    /// Decode a versioned encoding.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        decode_record(bytes, "kyber prekey record")
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    #[test]
    fn signed_prekey_signature_verifies() {
        let mut rng = ChaCha20Rng::seed_from_u64(40);
        let identity = IdentityKeyPair::generate(&mut rng);
        let record = SignedPreKeyRecord::generate(
            SignedPreKeyId::from(3006),
            Timestamp::from_epoch_millis(42),
            &identity,
            &mut rng,
        );

        assert!(identity.identity_key().verify_signature(&record.public_key().serialize(), record.signature()));

        let restored = SignedPreKeyRecord::deserialize(&record.serialize().unwrap()).unwrap();
        assert_eq!(restored.id(), record.id());
        assert_eq!(restored.public_key(), record.public_key());
        assert_eq!(restored.timestamp(), Timestamp::from_epoch_millis(42));
    }

    #[test]
    fn kyber_prekey_record_round_trip() {
        let mut rng = ChaCha20Rng::seed_from_u64(41);
        let identity = IdentityKeyPair::generate(&mut rng);
        let record = KyberPreKeyRecord::generate(
            KyberPreKeyId::from(8888),
            Timestamp::from_epoch_millis(42),
            &identity,
            &mut rng,
        )
        .unwrap();

        let restored = KyberPreKeyRecord::deserialize(&record.serialize().unwrap()).unwrap();
        assert_eq!(restored.key_pair().public_key, record.key_pair().public_key);
        assert_eq!(restored.signature(), record.signature());
    }

    #[test]
    fn unknown_record_version_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut bytes = PreKeyRecord::generate(PreKeyId::from(1), &mut rng).serialize().unwrap();
        bytes[0] = 9;

        assert!(PreKeyRecord::deserialize(&bytes).is_err());
        assert!(PreKeyRecord::deserialize(&[]).is_err());
    }
}

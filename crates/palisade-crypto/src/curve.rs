//! X25519 keys for ratchet steps, prekeys and sealed-sender ephemerals.
//!
//! Public keys travel with a one-byte type tag ([`DJB_KEY_TYPE`]) so a key of
//! the wrong family is rejected at decode time. Private keys are never tagged
//! and never leave the process except inside serialized local records.

use std::{cmp::Ordering, fmt, hash::Hash};

use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use x25519_dalek::StaticSecret;

use crate::{error::CryptoError, serde_bytes::impl_serde_via_bytes};

/// Type tag prefixed to serialized X25519 public keys.
pub const DJB_KEY_TYPE: u8 = 0x05;

/// Length of an X25519 key body in bytes.
pub const KEY_LENGTH: usize = 32;

/// X25519 public key (Montgomery u-coordinate).
#[derive(Clone, Copy)]
pub struct PublicKey([u8; KEY_LENGTH]);

impl PublicKey {
    /// Build from the 32 raw key bytes, without a type tag.
    pub fn from_djb_public_key_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| CryptoError::BadKeyLength { key_type: "X25519", length: bytes.len() })?;
        Ok(Self(key))
    }

    /// Decode a tagged public key.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (&tag, body) = bytes.split_first().ok_or(CryptoError::NoKeyTypeIdentifier)?;
        if tag != DJB_KEY_TYPE {
            return Err(CryptoError::BadKeyType(tag));
        }
        Self::from_djb_public_key_bytes(body)
    }

    /// Tagged encoding: `[DJB_KEY_TYPE] || key`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + KEY_LENGTH);
        out.push(DJB_KEY_TYPE);
        out.extend_from_slice(&self.0);
        out
    }

    /// Raw 32 key bytes.
    pub fn public_key_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub(crate) fn from_public_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PublicKey {}

impl Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(")?;
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

impl_serde_via_bytes!(PublicKey);

/// X25519 private key.
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

impl PrivateKey {
    /// Generate a fresh private key.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(StaticSecret::random_from_rng(rng))
    }

    /// Decode 32 raw private key bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| CryptoError::BadKeyLength {
            key_type: "X25519 private",
            length: bytes.len(),
        })?;
        Ok(Self(StaticSecret::from(key)))
    }

    /// Raw 32 private key bytes.
    pub fn serialize(&self) -> [u8; KEY_LENGTH] {
        self.0.to_bytes()
    }

    /// Matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0).to_bytes())
    }

    /// X25519 shared secret with `their_key`.
    pub fn calculate_agreement(&self, their_key: &PublicKey) -> [u8; KEY_LENGTH] {
        self.0.diffie_hellman(&x25519_dalek::PublicKey::from(their_key.0)).to_bytes()
    }

    pub(crate) fn from_static_secret(secret: StaticSecret) -> Self {
        Self(secret)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

impl_serde_via_bytes!(PrivateKey);

/// X25519 key pair.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KeyPair {
    /// Public half
    pub public_key: PublicKey,
    /// Private half
    pub private_key: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from(PrivateKey::generate(rng))
    }

    /// Pair up keys that are already known to belong together.
    pub fn new(public_key: PublicKey, private_key: PrivateKey) -> Self {
        Self { public_key, private_key }
    }

    /// X25519 shared secret with `their_key`.
    pub fn calculate_agreement(&self, their_key: &PublicKey) -> [u8; KEY_LENGTH] {
        self.private_key.calculate_agreement(their_key)
    }
}

impl From<PrivateKey> for KeyPair {
    fn from(private_key: PrivateKey) -> Self {
        Self { public_key: private_key.public_key(), private_key }
    }
}

//! Long-term identity keys.
//!
//! An identity is an Ed25519 key pair. It signs prekeys, certificates and
//! sender-key messages directly, and takes part in key agreement through its
//! birationally equivalent X25519 form:
//!
//! - private side: the expanded Ed25519 scalar is used as an X25519 secret
//! - public side: the Edwards point is mapped to its Montgomery u-coordinate
//!
//! Both conversions are deterministic, so a peer only ever needs the single
//! published Ed25519 key.

use std::{cmp::Ordering, fmt, hash::Hash};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use x25519_dalek::StaticSecret;
use zeroize::Zeroize;

use crate::{
    curve::{KEY_LENGTH, PrivateKey, PublicKey},
    error::CryptoError,
    serde_bytes::impl_serde_via_bytes,
};

/// Type tag prefixed to serialized identity keys.
pub const ED25519_KEY_TYPE: u8 = 0x06;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LENGTH: usize = 64;

const ALTERNATE_IDENTITY_PREFIX: &[u8] = b"Palisade_PNI_Signature";

/// Public identity key.
#[derive(Clone, Copy)]
pub struct IdentityKey(VerifyingKey);

impl IdentityKey {
    /// Wrap an Ed25519 verifying key.
    pub fn new(key: VerifyingKey) -> Self {
        Self(key)
    }

    /// Decode a tagged identity key. Weak (small-order) points are rejected.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (&tag, body) = bytes.split_first().ok_or(CryptoError::NoKeyTypeIdentifier)?;
        if tag != ED25519_KEY_TYPE {
            return Err(CryptoError::BadKeyType(tag));
        }
        let raw: [u8; KEY_LENGTH] = body
            .try_into()
            .map_err(|_| CryptoError::BadKeyLength { key_type: "Ed25519", length: body.len() })?;
        let key = VerifyingKey::from_bytes(&raw)
            .map_err(|_| CryptoError::InvalidKeyMaterial { key_type: "Ed25519" })?;
        if key.is_weak() {
            return Err(CryptoError::InvalidKeyMaterial { key_type: "Ed25519" });
        }
        Ok(Self(key))
    }

    /// Tagged encoding: `[ED25519_KEY_TYPE] || key`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + KEY_LENGTH);
        out.push(ED25519_KEY_TYPE);
        out.extend_from_slice(self.0.as_bytes());
        out
    }

    /// Raw 32-byte Ed25519 public key.
    pub fn public_key_bytes(&self) -> &[u8; KEY_LENGTH] {
        self.0.as_bytes()
    }

    /// X25519 form of this key, for key agreement.
    pub fn agreement_key(&self) -> PublicKey {
        PublicKey::from_public_bytes(self.0.to_montgomery().to_bytes())
    }

    /// Verify a detached signature. Malformed signatures verify as `false`.
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.0.verify_strict(message, &signature).is_ok()
    }

    /// Check that `other` was vouched for by this identity via
    /// [`IdentityKeyPair::sign_alternate_identity`].
    pub fn verify_alternate_identity(&self, other: &Self, signature: &[u8]) -> bool {
        self.verify_signature(&alternate_identity_message(other), signature)
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_bytes().hash(state);
    }
}

impl PartialOrd for IdentityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdentityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey(")?;
        for b in &self.0.as_bytes()[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

impl_serde_via_bytes!(IdentityKey);

/// Identity key pair.
///
/// Also used wherever a bare signing key is needed (trust roots, server
/// certificates, sender-key chains).
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a fresh identity.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self { signing_key: SigningKey::generate(rng) }
    }

    /// Public identity key.
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey(self.signing_key.verifying_key())
    }

    /// Ed25519 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    /// Vouch for another identity owned by the same account.
    pub fn sign_alternate_identity(&self, other: &IdentityKey) -> Vec<u8> {
        self.sign(&alternate_identity_message(other))
    }

    /// X25519 private key derived from the identity scalar.
    pub fn agreement_private_key(&self) -> PrivateKey {
        let mut scalar = self.signing_key.to_scalar_bytes();
        let key = PrivateKey::from_static_secret(StaticSecret::from(scalar));
        scalar.zeroize();
        key
    }

    /// X25519 shared secret between this identity and `their_key`.
    pub fn calculate_agreement(&self, their_key: &PublicKey) -> [u8; KEY_LENGTH] {
        self.agreement_private_key().calculate_agreement(their_key)
    }

    /// Tagged encoding of the secret seed: `[ED25519_KEY_TYPE] || seed`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + KEY_LENGTH);
        out.push(ED25519_KEY_TYPE);
        out.extend_from_slice(self.signing_key.as_bytes());
        out
    }

    /// Decode a serialized identity key pair.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (&tag, body) = bytes.split_first().ok_or(CryptoError::NoKeyTypeIdentifier)?;
        if tag != ED25519_KEY_TYPE {
            return Err(CryptoError::BadKeyType(tag));
        }
        let mut seed: [u8; KEY_LENGTH] = body.try_into().map_err(|_| {
            CryptoError::BadKeyLength { key_type: "Ed25519 private", length: body.len() }
        })?;
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { signing_key })
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("identity_key", &self.identity_key())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl_serde_via_bytes!(IdentityKeyPair);

fn alternate_identity_message(other: &IdentityKey) -> Vec<u8> {
    let mut message = ALTERNATE_IDENTITY_PREFIX.to_vec();
    message.extend_from_slice(&other.serialize());
    message
}

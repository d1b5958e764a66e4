//! ML-KEM-1024 key encapsulation for the post-quantum half of PQXDH.
//!
//! Keys and ciphertexts are kept as their encoded bytes and parsed into
//! `fips203` types only at the moment they are used. Decoding still
//! validates the key so a malformed bundle fails before any agreement runs.

use std::fmt;

use fips203::{
    ml_kem_1024,
    traits::{Decaps, Encaps, KeyGen, SerDes},
};
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{error::CryptoError, serde_bytes::impl_serde_via_bytes};

/// Type tag prefixed to serialized ML-KEM-1024 keys and ciphertexts.
pub const KYBER_1024_KEY_TYPE: u8 = 0x08;

/// Length of the shared secret produced by encapsulation.
pub const SHARED_SECRET_LENGTH: usize = 32;

/// Encapsulation (public) key.
#[derive(Clone, PartialEq, Eq)]
pub struct KyberPublicKey(Box<[u8]>);

impl KyberPublicKey {
    /// Decode and validate a tagged encapsulation key.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        let body = strip_tag(bytes)?;
        let raw = encaps_key_array(body)?;
        ml_kem_1024::EncapsKey::try_from_bytes(raw)
            .map_err(|_| CryptoError::InvalidKeyMaterial { key_type: "ML-KEM-1024" })?;
        Ok(Self(body.into()))
    }

    /// Tagged encoding.
    pub fn serialize(&self) -> Vec<u8> {
        tagged(&self.0)
    }

    /// Encapsulate a fresh shared secret. Returns the secret and the tagged
    /// ciphertext to send to the key owner.
    pub fn encapsulate<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<([u8; SHARED_SECRET_LENGTH], Vec<u8>), CryptoError> {
        let key = ml_kem_1024::EncapsKey::try_from_bytes(encaps_key_array(&self.0)?)
            .map_err(CryptoError::Kem)?;
        let (shared, ciphertext) = key.try_encaps_with_rng(rng).map_err(CryptoError::Kem)?;
        Ok((shared.into_bytes(), tagged(&ciphertext.into_bytes())))
    }
}

impl fmt::Debug for KyberPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KyberPublicKey({} bytes)", self.0.len())
    }
}

impl_serde_via_bytes!(KyberPublicKey);

/// Decapsulation (secret) key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KyberSecretKey(Box<[u8]>);

impl KyberSecretKey {
    /// Decode a tagged decapsulation key.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        let body = strip_tag(bytes)?;
        if body.len() != ml_kem_1024::DK_LEN {
            return Err(CryptoError::BadKeyLength { key_type: "ML-KEM-1024 private", length: body.len() });
        }
        Ok(Self(body.into()))
    }

    /// Tagged encoding.
    pub fn serialize(&self) -> Vec<u8> {
        tagged(&self.0)
    }

    /// Recover the shared secret from a tagged ciphertext.
    pub fn decapsulate(&self, ciphertext: &[u8]) -> Result<[u8; SHARED_SECRET_LENGTH], CryptoError> {
        let body = strip_tag(ciphertext)?;
        let ct: [u8; ml_kem_1024::CT_LEN] = body.try_into().map_err(|_| CryptoError::BadKeyLength {
            key_type: "ML-KEM-1024 ciphertext",
            length: body.len(),
        })?;
        let ct = ml_kem_1024::CipherText::try_from_bytes(ct).map_err(CryptoError::Kem)?;

        let dk: [u8; ml_kem_1024::DK_LEN] = self.0.as_ref().try_into().map_err(|_| {
            CryptoError::BadKeyLength { key_type: "ML-KEM-1024 private", length: self.0.len() }
        })?;
        let dk = ml_kem_1024::DecapsKey::try_from_bytes(dk).map_err(CryptoError::Kem)?;

        let shared = dk.try_decaps(&ct).map_err(CryptoError::Kem)?;
        Ok(shared.into_bytes())
    }
}

impl fmt::Debug for KyberSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KyberSecretKey([REDACTED])")
    }
}

impl_serde_via_bytes!(KyberSecretKey);

/// ML-KEM-1024 key pair.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KyberKeyPair {
    /// Encapsulation key
    pub public_key: KyberPublicKey,
    /// Decapsulation key
    pub secret_key: KyberSecretKey,
}

impl KyberKeyPair {
    /// Generate a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, CryptoError> {
        let (ek, dk) = ml_kem_1024::KG::try_keygen_with_rng(rng).map_err(CryptoError::Kem)?;
        Ok(Self {
            public_key: KyberPublicKey(Box::from(ek.into_bytes())),
            secret_key: KyberSecretKey(Box::from(dk.into_bytes())),
        })
    }
}

fn strip_tag(bytes: &[u8]) -> Result<&[u8], CryptoError> {
    let (&tag, body) = bytes.split_first().ok_or(CryptoError::NoKeyTypeIdentifier)?;
    if tag != KYBER_1024_KEY_TYPE {
        return Err(CryptoError::BadKeyType(tag));
    }
    Ok(body)
}

fn encaps_key_array(body: &[u8]) -> Result<[u8; ml_kem_1024::EK_LEN], CryptoError> {
    body.try_into()
        .map_err(|_| CryptoError::BadKeyLength { key_type: "ML-KEM-1024", length: body.len() })
}

fn tagged(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(KYBER_1024_KEY_TYPE);
    out.extend_from_slice(body);
    out
}

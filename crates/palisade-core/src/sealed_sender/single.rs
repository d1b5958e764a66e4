//! Version 1 envelopes: one recipient, two AEAD layers.
//!
//! ```text
//!   E = fresh ephemeral, S = sender identity, R = recipient identity
//!
//!   (chain, k1, n1) = HKDF(DH(E, R), salt = label || R || E)
//!   encrypted_static  = AEAD(k1, n1, aad = E, S)
//!   (k2, n2)        = HKDF(DH(S, R), salt = chain || encrypted_static)
//!   encrypted_message = AEAD(k2, n2, aad = encrypted_static, content)
//! ```
//!
//! The second layer authenticates the sender: only the holder of S can
//! compute `DH(S, R)`.

use palisade_crypto::{IdentityKey, IdentityKeyPair, KeyPair, PublicKey, aead, kdf, serde_bytes};
use palisade_proto::codec;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{SEALED_SENDER_V1_VERSION_BYTE, content::UnidentifiedSenderMessageContent};
use crate::error::{EngineError, Result};

const EPHEMERAL_SALT_PREFIX: &[u8] = b"Palisade_UnidentifiedDelivery";

#[derive(Serialize, Deserialize)]
struct EnvelopeBody {
    ephemeral_public: PublicKey,
    #[serde(with = "serde_bytes")]
    encrypted_static: Vec<u8>,
    #[serde(with = "serde_bytes")]
    encrypted_message: Vec<u8>,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct EphemeralKeys {
    chain_key: [u8; 32],
    cipher_key: [u8; aead::KEY_SIZE],
    nonce: [u8; aead::NONCE_SIZE],
}

impl EphemeralKeys {
    fn derive(shared: &[u8; 32], recipient: &IdentityKey, ephemeral: &PublicKey) -> Result<Self> {
        let mut salt = EPHEMERAL_SALT_PREFIX.to_vec();
        salt.extend_from_slice(&recipient.serialize());
        salt.extend_from_slice(&ephemeral.serialize());

        let mut okm = [0u8; 32 + aead::KEY_SIZE + aead::NONCE_SIZE];
        kdf::derive_secrets(shared, Some(&salt), &[], &mut okm)?;
        let mut keys =
            Self { chain_key: [0; 32], cipher_key: [0; aead::KEY_SIZE], nonce: [0; aead::NONCE_SIZE] };
        keys.chain_key.copy_from_slice(&okm[..32]);
        keys.cipher_key.copy_from_slice(&okm[32..32 + aead::KEY_SIZE]);
        keys.nonce.copy_from_slice(&okm[32 + aead::KEY_SIZE..]);
        okm.zeroize();
        Ok(keys)
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct StaticKeys {
    cipher_key: [u8; aead::KEY_SIZE],
    nonce: [u8; aead::NONCE_SIZE],
}

impl StaticKeys {
    fn derive(shared: &[u8; 32], chain_key: &[u8; 32], encrypted_static: &[u8]) -> Result<Self> {
        let mut salt = chain_key.to_vec();
        salt.extend_from_slice(encrypted_static);

        let mut okm = [0u8; aead::KEY_SIZE + aead::NONCE_SIZE];
        kdf::derive_secrets(shared, Some(&salt), &[], &mut okm)?;
        salt.zeroize();
        let mut keys = Self { cipher_key: [0; aead::KEY_SIZE], nonce: [0; aead::NONCE_SIZE] };
        keys.cipher_key.copy_from_slice(&okm[..aead::KEY_SIZE]);
        keys.nonce.copy_from_slice(&okm[aead::KEY_SIZE..]);
        okm.zeroize();
        Ok(keys)
    }
}

pub(super) fn encrypt<R: RngCore + CryptoRng>(
    content: &UnidentifiedSenderMessageContent,
    sender: &IdentityKeyPair,
    recipient: &IdentityKey,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let ephemeral = KeyPair::generate(rng);
    let recipient_agreement = recipient.agreement_key();

    let eph_keys = EphemeralKeys::derive(
        &ephemeral.calculate_agreement(&recipient_agreement),
        recipient,
        &ephemeral.public_key,
    )?;
    let encrypted_static = aead::encrypt(
        &eph_keys.cipher_key,
        &eph_keys.nonce,
        &ephemeral.public_key.serialize(),
        &sender.identity_key().serialize(),
    )?;

    let static_keys = StaticKeys::derive(
        &sender.calculate_agreement(&recipient_agreement),
        &eph_keys.chain_key,
        &encrypted_static,
    )?;
    let encrypted_message =
        aead::encrypt(&static_keys.cipher_key, &static_keys.nonce, &encrypted_static, content.serialized())?;

    let mut out = vec![SEALED_SENDER_V1_VERSION_BYTE];
    codec::append_cbor(
        &EnvelopeBody { ephemeral_public: ephemeral.public_key, encrypted_static, encrypted_message },
        &mut out,
        "sealed sender v1 envelope",
    )?;
    Ok(out)
}

/// Decrypt a v1 envelope body (everything after the version byte).
pub(super) fn decrypt(body: &[u8], recipient: &IdentityKeyPair) -> Result<UnidentifiedSenderMessageContent> {
    let envelope: EnvelopeBody = codec::from_cbor(body, "sealed sender v1 envelope")
        .map_err(|e| EngineError::invalid_sealed_sender(e.to_string()))?;
    let recipient_identity = recipient.identity_key();

    let eph_keys = EphemeralKeys::derive(
        &recipient.calculate_agreement(&envelope.ephemeral_public),
        &recipient_identity,
        &envelope.ephemeral_public,
    )?;
    let static_key_bytes = aead::decrypt(
        &eph_keys.cipher_key,
        &eph_keys.nonce,
        &envelope.ephemeral_public.serialize(),
        &envelope.encrypted_static,
    )
    .map_err(|_| EngineError::invalid_sealed_sender("failed to decrypt sender identity"))?;
    let sender_identity = IdentityKey::deserialize(&static_key_bytes)?;

    let static_keys = StaticKeys::derive(
        &recipient.calculate_agreement(&sender_identity.agreement_key()),
        &eph_keys.chain_key,
        &envelope.encrypted_static,
    )?;
    let message_bytes = aead::decrypt(
        &static_keys.cipher_key,
        &static_keys.nonce,
        &envelope.encrypted_static,
        &envelope.encrypted_message,
    )
    .map_err(|_| EngineError::invalid_sealed_sender("failed to decrypt message"))?;

    let content = UnidentifiedSenderMessageContent::deserialize(&message_bytes)?;
    if content.sender().key() != &sender_identity {
        return Err(EngineError::invalid_sealed_sender(
            "sender certificate key does not match envelope identity",
        ));
    }
    Ok(content)
}

//! Symmetric ratchet chains.
//!
//! # Architecture
//!
//! ```text
//!   RootKey ──DH(their ratchet, our ratchet)──> (RootKey', ChainKey_0)
//!
//!   ChainKey_n ──HMAC(0x02)──> ChainKey_{n+1}
//!        │
//!        └──HMAC(0x01)──> seed_n ──HKDF──> MessageKeys_n
//! ```
//!
//! Group sessions use the same stepping on a [`SenderChainKey`], with
//! [`SenderMessageKey`] as the per-iteration output.
//!
//! # Security
//!
//! Chain keys only move forward. Callers persist the advanced chain and
//! discard the old one, which gives forward secrecy for consumed messages.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    aead::{KEY_SIZE, NONCE_SIZE},
    curve::{PrivateKey, PublicKey},
    error::CryptoError,
    kdf, mac,
};

const MESSAGE_KEY_SEED: &[u8] = &[0x01];
const CHAIN_KEY_SEED: &[u8] = &[0x02];

const ROOT_INFO: &[u8] = b"Palisade_Ratchet";
const MESSAGE_KEYS_INFO: &[u8] = b"Palisade_MessageKeys";
const SENDER_KEY_INFO: &[u8] = b"Palisade_SenderKey";

/// Root of the double ratchet.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    key: [u8; 32],
}

impl RootKey {
    /// Wrap raw root key bytes.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Raw key bytes.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// One DH ratchet step: mix a fresh agreement into the root and split off
    /// a new chain starting at index 0.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &PrivateKey,
    ) -> Result<(Self, ChainKey), CryptoError> {
        let mut shared = our_ratchet_key.calculate_agreement(their_ratchet_key);
        let mut derived = [0u8; 64];
        kdf::derive_secrets(&shared, Some(&self.key), ROOT_INFO, &mut derived)?;
        shared.zeroize();

        let (root, chain) = derived.split_at(32);
        let result = (Self { key: to_array(root) }, ChainKey::new(to_array(chain), 0));
        derived.zeroize();
        Ok(result)
    }
}

/// Sending or receiving chain of a pairwise session.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    /// Chain key at `index`.
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    /// Raw key bytes.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Counter of the next message this chain will produce.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Step the chain forward by one.
    pub fn next_chain_key(&self) -> Result<Self, CryptoError> {
        let index = self.index.checked_add(1).ok_or(CryptoError::ChainIndexExhausted)?;
        Ok(Self { key: mac::hmac_sha256(&self.key, &[CHAIN_KEY_SEED])?, index })
    }

    /// Seed for the message key at the current index. Seeds are what the
    /// skipped-key cache stores.
    pub fn message_key_seed(&self) -> Result<[u8; 32], CryptoError> {
        mac::hmac_sha256(&self.key, &[MESSAGE_KEY_SEED])
    }

    /// Message keys at the current index.
    pub fn message_keys(&self) -> Result<MessageKeys, CryptoError> {
        MessageKeys::derive_keys(&self.message_key_seed()?, self.index)
    }
}

/// Keys protecting one pairwise message.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    cipher_key: [u8; KEY_SIZE],
    mac_key: [u8; 32],
    nonce: [u8; NONCE_SIZE],
    counter: u32,
}

impl MessageKeys {
    /// Expand a message key seed.
    pub fn derive_keys(seed: &[u8; 32], counter: u32) -> Result<Self, CryptoError> {
        let mut okm = [0u8; KEY_SIZE + 32 + NONCE_SIZE];
        kdf::derive_secrets(seed, None, MESSAGE_KEYS_INFO, &mut okm)?;

        let keys = Self {
            cipher_key: to_array(&okm[..KEY_SIZE]),
            mac_key: to_array(&okm[KEY_SIZE..KEY_SIZE + 32]),
            nonce: to_array(&okm[KEY_SIZE + 32..]),
            counter,
        };
        okm.zeroize();
        Ok(keys)
    }

    /// AEAD key.
    pub fn cipher_key(&self) -> &[u8; KEY_SIZE] {
        &self.cipher_key
    }

    /// Key for the truncated message MAC.
    pub fn mac_key(&self) -> &[u8; 32] {
        &self.mac_key
    }

    /// AEAD nonce.
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Message counter these keys belong to.
    pub fn counter(&self) -> u32 {
        self.counter
    }
}

/// Chain of a sender-key (group) session.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SenderChainKey {
    iteration: u32,
    chain_key: [u8; 32],
}

impl SenderChainKey {
    /// Chain key at `iteration`.
    pub fn new(iteration: u32, chain_key: [u8; 32]) -> Self {
        Self { iteration, chain_key }
    }

    /// Iteration of the next message this chain will produce.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Raw chain key bytes.
    pub fn seed(&self) -> &[u8; 32] {
        &self.chain_key
    }

    /// Step forward by one iteration.
    pub fn next(&self) -> Result<Self, CryptoError> {
        let iteration = self.iteration.checked_add(1).ok_or(CryptoError::ChainIndexExhausted)?;
        Ok(Self { iteration, chain_key: mac::hmac_sha256(&self.chain_key, &[CHAIN_KEY_SEED])? })
    }

    /// Message key for the current iteration.
    pub fn sender_message_key(&self) -> Result<SenderMessageKey, CryptoError> {
        SenderMessageKey::new(self.iteration, mac::hmac_sha256(&self.chain_key, &[MESSAGE_KEY_SEED])?)
    }
}

/// Keys protecting one group message.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SenderMessageKey {
    iteration: u32,
    seed: [u8; 32],
    cipher_key: [u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
}

impl SenderMessageKey {
    /// Expand a message key seed.
    pub fn new(iteration: u32, seed: [u8; 32]) -> Result<Self, CryptoError> {
        let mut okm = [0u8; KEY_SIZE + NONCE_SIZE];
        kdf::derive_secrets(&seed, None, SENDER_KEY_INFO, &mut okm)?;
        let key = Self {
            iteration,
            seed,
            cipher_key: to_array(&okm[..KEY_SIZE]),
            nonce: to_array(&okm[KEY_SIZE..]),
        };
        okm.zeroize();
        Ok(key)
    }

    /// Iteration this key belongs to.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Seed the key was expanded from.
    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    /// AEAD key.
    pub fn cipher_key(&self) -> &[u8; KEY_SIZE] {
        &self.cipher_key
    }

    /// AEAD nonce.
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

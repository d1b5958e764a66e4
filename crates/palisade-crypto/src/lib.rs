//! Palisade Cryptographic Primitives
//!
//! Building blocks for the Palisade messaging engine: X25519 and Ed25519
//! keys, ML-KEM-1024, HKDF/HMAC over SHA-256, XChaCha20-Poly1305 and the
//! symmetric ratchet chains.
//!
//! # Design
//!
//! Everything here is pure. Randomness is passed in by the caller, which
//! keeps the engine deterministic under a seeded RNG in tests.
//!
//! Every serialized public key carries a one-byte type tag:
//!
//! | Tag    | Key                              |
//! |--------|----------------------------------|
//! | `0x05` | X25519 public key                |
//! | `0x06` | Ed25519 identity key             |
//! | `0x08` | ML-KEM-1024 key or ciphertext    |
//!
//! A key with an unknown tag or wrong body length fails to decode before any
//! cryptographic operation runs on it.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod chain;
pub mod curve;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod kem;
pub mod mac;
pub mod serde_bytes;

pub use chain::{ChainKey, MessageKeys, RootKey, SenderChainKey, SenderMessageKey};
pub use curve::{KeyPair, PrivateKey, PublicKey};
pub use error::CryptoError;
pub use identity::{IdentityKey, IdentityKeyPair};
pub use kem::{KyberKeyPair, KyberPublicKey, KyberSecretKey};

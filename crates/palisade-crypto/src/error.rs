//! Error type shared by every primitive in this crate.

use thiserror::Error;

/// Failures raised by key decoding and the primitive operations.
///
/// None of these carry secret material. Decoding errors are raised before any
/// cryptographic work happens on the input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Serialized key was empty, so it carries no type tag.
    #[error("serialized key has no type identifier")]
    NoKeyTypeIdentifier,

    /// Type tag does not name a key type this crate knows.
    #[error("unknown key type {0:#04x}")]
    BadKeyType(u8),

    /// Key body has the wrong length for its type.
    #[error("bad key length {length} for {key_type} key")]
    BadKeyLength {
        /// Human-readable key kind
        key_type: &'static str,
        /// Length actually supplied
        length: usize,
    },

    /// Key bytes have the right length but do not decode to a valid key.
    #[error("invalid {key_type} key material")]
    InvalidKeyMaterial {
        /// Human-readable key kind
        key_type: &'static str,
    },

    /// Signature bytes are malformed (wrong length).
    #[error("malformed signature of {0} bytes")]
    MalformedSignature(usize),

    /// AEAD seal or open failed. Open failures mean the ciphertext or its
    /// associated data was tampered with, or the key is wrong.
    #[error("AEAD operation failed")]
    AeadFailure,

    /// ML-KEM operation reported an error.
    #[error("KEM operation failed: {0}")]
    Kem(&'static str),

    /// Requested more HKDF output than SHA-256 can expand to.
    #[error("KDF output of {0} bytes is too long")]
    KdfOutputTooLong(usize),

    /// A chain index would overflow `u32`.
    #[error("chain index exhausted")]
    ChainIndexExhausted,
}

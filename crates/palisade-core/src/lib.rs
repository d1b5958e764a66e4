//! Palisade Engine
//!
//! End-to-end encryption for pairwise and group messaging: PQXDH session
//! agreement, the double ratchet, sender-key group chains, sealed sender
//! envelopes and safety numbers.
//!
//! # Architecture
//!
//! ```text
//!   PreKeyBundle ──► session::process_prekey_bundle ──► SessionRecord
//!                                                          │
//!   plaintext ──► session_cipher::message_encrypt ◄────────┘
//!                       │                       ▲
//!                       ▼                       │
//!              CiphertextMessage ──► session_cipher::message_decrypt
//!                       │
//!                       └─► sealed_sender (hide who sent it)
//!
//!   group: create_sender_key_distribution_message ─► (pairwise) ─►
//!          process_sender_key_distribution_message, then
//!          group_encrypt / group_decrypt
//! ```
//!
//! # Components
//!
//! - [`state`]: serializable records (sessions, prekeys, sender keys)
//! - [`storage`]: async store contracts and in-memory implementations
//! - [`session`] / [`session_cipher`]: pairwise agreement and ratchet
//! - [`group_cipher`]: sender-key chains
//! - [`sealed_sender`]: certificates and v1/v2 envelopes
//! - [`fingerprint`]: safety numbers
//!
//! # Invariants
//!
//! The engine holds no state of its own. Every operation loads records from
//! the caller's stores, works on owned copies and writes back only when all
//! cryptographic steps succeeded. Callers serialize operations per address
//! (or per sender and distribution id); nothing here locks.
//!
//! Time and randomness are arguments. Under a seeded RNG and fixed
//! timestamps every operation is deterministic.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
pub mod consts;
mod error;
pub mod fingerprint;
pub mod group_cipher;
mod ratchet;
pub mod sealed_sender;
pub mod session;
pub mod session_cipher;
pub mod state;
pub mod storage;

pub use config::SessionConfig;
pub use error::{EngineError, PreKeyKind, Result};
pub use fingerprint::{DisplayableFingerprint, Fingerprint, ScannableFingerprint};
pub use group_cipher::{
    create_sender_key_distribution_message, group_decrypt, group_encrypt,
    process_sender_key_distribution_message,
};
pub use sealed_sender::{
    ContentHint, SealedSenderDecryptionResult, SealedSenderV2SentMessage, SenderCertificate,
    ServerCertificate, UnidentifiedSenderMessageContent, sealed_sender_decrypt,
    sealed_sender_decrypt_to_usmc, sealed_sender_encrypt, sealed_sender_encrypt_from_usmc,
    sealed_sender_multi_recipient_encrypt, sealed_sender_multi_recipient_message_for_single_recipient,
};
pub use session::{initialize_session_from_bundle, process_prekey_bundle};
pub use session_cipher::{
    message_decrypt, message_decrypt_prekey, message_decrypt_signal, message_encrypt,
};
pub use state::{
    KyberPreKeyRecord, PreKeyBundle, PreKeyRecord, SenderKeyRecord, SessionRecord,
    SignedPreKeyRecord,
};
pub use storage::{
    Direction, IdentityChange, IdentityKeyStore, KyberPreKeyStore, MemoryIdentityKeyStore,
    MemoryKyberPreKeyStore, MemoryPreKeyStore, MemoryProtocolStore, MemorySenderKeyStore,
    MemorySessionStore, MemorySignedPreKeyStore, PreKeyStore, ProtocolStore, SenderKeyStore,
    SessionStore, SignedPreKeyStore,
};

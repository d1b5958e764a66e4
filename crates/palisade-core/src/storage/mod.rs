//! Store contracts the engine consumes.
//!
//! # Architecture
//!
//! ```text
//!   engine operation
//!        │  load (await)
//!        ▼
//!   owned record ──ratchet / agreement──> updated record
//!        │  store (await), only after every crypto step succeeded
//!        ▼
//!   backing store
//! ```
//!
//! The engine never holds a store borrow across two logical operations and
//! never caches records between calls. Callers serialize operations per
//! address (or per sender and distribution id); the stores provide no
//! locking of their own.
//!
//! Every method may fail. Store failures surface as [`EngineError::Store`]
//! and leave the engine's view of the world unchanged.
//!
//! [`EngineError::Store`]: crate::EngineError::Store

mod memory;

use async_trait::async_trait;
use palisade_crypto::{IdentityKey, IdentityKeyPair};
use palisade_proto::{KyberPreKeyId, PreKeyId, ProtocolAddress, SignedPreKeyId, Uuid};

pub use self::memory::{
    MemoryIdentityKeyStore, MemoryKyberPreKeyStore, MemoryPreKeyStore, MemoryProtocolStore,
    MemorySenderKeyStore, MemorySessionStore, MemorySignedPreKeyStore,
};
use crate::{
    error::{EngineError, Result},
    state::{KyberPreKeyRecord, PreKeyRecord, SenderKeyRecord, SessionRecord, SignedPreKeyRecord},
};

/// Which way a message is travelling when trust is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We are about to encrypt to the identity.
    Sending,
    /// We received a message signed by or agreed with the identity.
    Receiving,
}

/// Outcome of saving a peer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityChange {
    /// First sighting, or the same key as before.
    NewOrUnchanged,
    /// A different key was stored for this address and has been replaced.
    ReplacedExisting,
}

/// Local identity and the trust decisions about peers.
#[async_trait(?Send)]
pub trait IdentityKeyStore {
    /// The local identity key pair.
    async fn get_identity_key_pair(&self) -> Result<IdentityKeyPair>;

    /// The local registration id.
    async fn get_local_registration_id(&self) -> Result<u32>;

    /// Record `identity` for `address`.
    async fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<IdentityChange>;

    /// Whether `identity` may be used with `address` in `direction`.
    async fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool>;

    /// Stored identity for `address`.
    async fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>>;
}

/// One-time X25519 prekeys. Consumed keys are removed.
#[async_trait(?Send)]
pub trait PreKeyStore {
    /// Look up a prekey.
    async fn get_pre_key(&self, id: PreKeyId) -> Result<Option<PreKeyRecord>>;

    /// Store a prekey.
    async fn save_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<()>;

    /// Remove a consumed prekey.
    async fn remove_pre_key(&mut self, id: PreKeyId) -> Result<()>;
}

/// Signed X25519 prekeys.
#[async_trait(?Send)]
pub trait SignedPreKeyStore {
    /// Look up a signed prekey.
    async fn get_signed_pre_key(&self, id: SignedPreKeyId) -> Result<Option<SignedPreKeyRecord>>;

    /// Store a signed prekey.
    async fn save_signed_pre_key(
        &mut self,
        id: SignedPreKeyId,
        record: &SignedPreKeyRecord,
    ) -> Result<()>;
}

/// Signed ML-KEM prekeys.
///
/// Kyber prekeys are not deleted on use. The store remembers which ones took
/// part in an agreement so they are never used for a second one.
#[async_trait(?Send)]
pub trait KyberPreKeyStore {
    /// Look up a Kyber prekey.
    async fn get_kyber_pre_key(&self, id: KyberPreKeyId) -> Result<Option<KyberPreKeyRecord>>;

    /// Store a Kyber prekey.
    async fn save_kyber_pre_key(&mut self, id: KyberPreKeyId, record: &KyberPreKeyRecord) -> Result<()>;

    /// Record that `id` was used for an agreement.
    async fn mark_kyber_pre_key_used(&mut self, id: KyberPreKeyId) -> Result<()>;

    /// Whether `id` was already used for an agreement.
    async fn has_kyber_pre_key_been_used(&self, id: KyberPreKeyId) -> Result<bool>;
}

/// Pairwise session records, one per peer device.
#[async_trait(?Send)]
pub trait SessionStore {
    /// Load the record for `address`.
    async fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>>;

    /// Persist the record for `address`.
    async fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()>;

    /// Load the records for all `addresses`, failing if any is missing.
    async fn load_existing_sessions(&self, addresses: &[&ProtocolAddress]) -> Result<Vec<SessionRecord>> {
        let mut records = Vec::with_capacity(addresses.len());
        for address in addresses {
            let record = self
                .load_session(address)
                .await?
                .ok_or_else(|| EngineError::SessionNotFound { address: (*address).clone() })?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Sender-key records, one per sender device and distribution id.
#[async_trait(?Send)]
pub trait SenderKeyStore {
    /// Persist the record for `sender` and `distribution_id`.
    async fn store_sender_key(
        &mut self,
        sender: &ProtocolAddress,
        distribution_id: Uuid,
        record: &SenderKeyRecord,
    ) -> Result<()>;

    /// Load the record for `sender` and `distribution_id`.
    async fn load_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: Uuid,
    ) -> Result<Option<SenderKeyRecord>>;
}

/// Every store the engine needs, as one bundle.
pub trait ProtocolStore:
    IdentityKeyStore + PreKeyStore + SignedPreKeyStore + KyberPreKeyStore + SessionStore + SenderKeyStore
{
}

//! In-memory stores for tests and simulation.
//!
//! Peer identities follow trust-on-first-use: an unknown identity is
//! trusted, a known address is trusted only with the key first seen for it.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use palisade_crypto::{IdentityKey, IdentityKeyPair};
use palisade_proto::{KyberPreKeyId, PreKeyId, ProtocolAddress, SignedPreKeyId, Uuid};
use tracing::info;

use super::{
    Direction, IdentityChange, IdentityKeyStore, KyberPreKeyStore, PreKeyStore, ProtocolStore,
    SenderKeyStore, SessionStore, SignedPreKeyStore,
};
use crate::{
    error::Result,
    state::{KyberPreKeyRecord, PreKeyRecord, SenderKeyRecord, SessionRecord, SignedPreKeyRecord},
};

/// Identity store holding the local key pair and peer identities.
#[derive(Debug, Clone)]
pub struct MemoryIdentityKeyStore {
    key_pair: IdentityKeyPair,
    registration_id: u32,
    known_keys: HashMap<ProtocolAddress, IdentityKey>,
}

impl MemoryIdentityKeyStore {
    /// Store for the given local identity.
    pub fn new(key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self { key_pair, registration_id, known_keys: HashMap::new() }
    }
}

#[async_trait(?Send)]
impl IdentityKeyStore for MemoryIdentityKeyStore {
    async fn get_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        Ok(self.key_pair.clone())
    }

    async fn get_local_registration_id(&self) -> Result<u32> {
        Ok(self.registration_id)
    }

    async fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<IdentityChange> {
        match self.known_keys.insert(address.clone(), *identity) {
            Some(previous) if previous != *identity => {
                info!(%address, "replaced stored identity key");
                Ok(IdentityChange::ReplacedExisting)
            },
            _ => Ok(IdentityChange::NewOrUnchanged),
        }
    }

    async fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        _direction: Direction,
    ) -> Result<bool> {
        Ok(self.known_keys.get(address).is_none_or(|known| known == identity))
    }

    async fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>> {
        Ok(self.known_keys.get(address).copied())
    }
}

/// One-time prekey store.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreKeyStore {
    pre_keys: HashMap<PreKeyId, PreKeyRecord>,
}

impl MemoryPreKeyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of prekeys not yet consumed.
    pub fn len(&self) -> usize {
        self.pre_keys.len()
    }

    /// Whether every prekey was consumed.
    pub fn is_empty(&self) -> bool {
        self.pre_keys.is_empty()
    }
}

#[async_trait(?Send)]
impl PreKeyStore for MemoryPreKeyStore {
    async fn get_pre_key(&self, id: PreKeyId) -> Result<Option<PreKeyRecord>> {
        Ok(self.pre_keys.get(&id).cloned())
    }

    async fn save_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<()> {
        self.pre_keys.insert(id, record.clone());
        Ok(())
    }

    async fn remove_pre_key(&mut self, id: PreKeyId) -> Result<()> {
        self.pre_keys.remove(&id);
        Ok(())
    }
}

/// Signed prekey store.
#[derive(Debug, Clone, Default)]
pub struct MemorySignedPreKeyStore {
    signed_pre_keys: HashMap<SignedPreKeyId, SignedPreKeyRecord>,
}

impl MemorySignedPreKeyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl SignedPreKeyStore for MemorySignedPreKeyStore {
    async fn get_signed_pre_key(&self, id: SignedPreKeyId) -> Result<Option<SignedPreKeyRecord>> {
        Ok(self.signed_pre_keys.get(&id).cloned())
    }

    async fn save_signed_pre_key(
        &mut self,
        id: SignedPreKeyId,
        record: &SignedPreKeyRecord,
    ) -> Result<()> {
        self.signed_pre_keys.insert(id, record.clone());
        Ok(())
    }
}

/// Kyber prekey store with used-key markers.
#[derive(Debug, Clone, Default)]
pub struct MemoryKyberPreKeyStore {
    kyber_pre_keys: HashMap<KyberPreKeyId, KyberPreKeyRecord>,
    used: HashSet<KyberPreKeyId>,
}

impl MemoryKyberPreKeyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl KyberPreKeyStore for MemoryKyberPreKeyStore {
    async fn get_kyber_pre_key(&self, id: KyberPreKeyId) -> Result<Option<KyberPreKeyRecord>> {
        Ok(self.kyber_pre_keys.get(&id).cloned())
    }

    async fn save_kyber_pre_key(&mut self, id: KyberPreKeyId, record: &KyberPreKeyRecord) -> Result<()> {
        self.kyber_pre_keys.insert(id, record.clone());
        Ok(())
    }

    async fn mark_kyber_pre_key_used(&mut self, id: KyberPreKeyId) -> Result<()> {
        self.used.insert(id);
        Ok(())
    }

    async fn has_kyber_pre_key_been_used(&self, id: KyberPreKeyId) -> Result<bool> {
        Ok(self.used.contains(&id))
    }
}

/// Session store.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: HashMap<ProtocolAddress, SessionRecord>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.get(address).cloned())
    }

    async fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.sessions.insert(address.clone(), record.clone());
        Ok(())
    }
}

/// Sender-key store.
#[derive(Debug, Clone, Default)]
pub struct MemorySenderKeyStore {
    keys: HashMap<(ProtocolAddress, Uuid), SenderKeyRecord>,
}

impl MemorySenderKeyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl SenderKeyStore for MemorySenderKeyStore {
    async fn store_sender_key(
        &mut self,
        sender: &ProtocolAddress,
        distribution_id: Uuid,
        record: &SenderKeyRecord,
    ) -> Result<()> {
        self.keys.insert((sender.clone(), distribution_id), record.clone());
        Ok(())
    }

    async fn load_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: Uuid,
    ) -> Result<Option<SenderKeyRecord>> {
        Ok(self.keys.get(&(sender.clone(), distribution_id)).cloned())
    }
}

/// All in-memory stores for one device.
///
/// Fields are public so a caller can hand disjoint `&mut` borrows of the
/// individual stores to a single engine call.
#[derive(Debug, Clone)]
pub struct MemoryProtocolStore {
    /// Sessions.
    pub session_store: MemorySessionStore,
    /// One-time prekeys.
    pub pre_key_store: MemoryPreKeyStore,
    /// Signed prekeys.
    pub signed_pre_key_store: MemorySignedPreKeyStore,
    /// Kyber prekeys.
    pub kyber_pre_key_store: MemoryKyberPreKeyStore,
    /// Identities.
    pub identity_store: MemoryIdentityKeyStore,
    /// Sender keys.
    pub sender_key_store: MemorySenderKeyStore,
}

impl MemoryProtocolStore {
    /// Empty stores for the given local identity.
    pub fn new(key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            session_store: MemorySessionStore::new(),
            pre_key_store: MemoryPreKeyStore::new(),
            signed_pre_key_store: MemorySignedPreKeyStore::new(),
            kyber_pre_key_store: MemoryKyberPreKeyStore::new(),
            identity_store: MemoryIdentityKeyStore::new(key_pair, registration_id),
            sender_key_store: MemorySenderKeyStore::new(),
        }
    }
}

#[async_trait(?Send)]
impl IdentityKeyStore for MemoryProtocolStore {
    async fn get_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        self.identity_store.get_identity_key_pair().await
    }

    async fn get_local_registration_id(&self) -> Result<u32> {
        self.identity_store.get_local_registration_id().await
    }

    async fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<IdentityChange> {
        self.identity_store.save_identity(address, identity).await
    }

    async fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool> {
        self.identity_store.is_trusted_identity(address, identity, direction).await
    }

    async fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>> {
        self.identity_store.get_identity(address).await
    }
}

#[async_trait(?Send)]
impl PreKeyStore for MemoryProtocolStore {
    async fn get_pre_key(&self, id: PreKeyId) -> Result<Option<PreKeyRecord>> {
        self.pre_key_store.get_pre_key(id).await
    }

    async fn save_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<()> {
        self.pre_key_store.save_pre_key(id, record).await
    }

    async fn remove_pre_key(&mut self, id: PreKeyId) -> Result<()> {
        self.pre_key_store.remove_pre_key(id).await
    }
}

#[async_trait(?Send)]
impl SignedPreKeyStore for MemoryProtocolStore {
    async fn get_signed_pre_key(&self, id: SignedPreKeyId) -> Result<Option<SignedPreKeyRecord>> {
        self.signed_pre_key_store.get_signed_pre_key(id).await
    }

    async fn save_signed_pre_key(
        &mut self,
        id: SignedPreKeyId,
        record: &SignedPreKeyRecord,
    ) -> Result<()> {
        self.signed_pre_key_store.save_signed_pre_key(id, record).await
    }
}

#[async_trait(?Send)]
impl KyberPreKeyStore for MemoryProtocolStore {
    async fn get_kyber_pre_key(&self, id: KyberPreKeyId) -> Result<Option<KyberPreKeyRecord>> {
        self.kyber_pre_key_store.get_kyber_pre_key(id).await
    }

    async fn save_kyber_pre_key(&mut self, id: KyberPreKeyId, record: &KyberPreKeyRecord) -> Result<()> {
        self.kyber_pre_key_store.save_kyber_pre_key(id, record).await
    }

    async fn mark_kyber_pre_key_used(&mut self, id: KyberPreKeyId) -> Result<()> {
        self.kyber_pre_key_store.mark_kyber_pre_key_used(id).await
    }

    async fn has_kyber_pre_key_been_used(&self, id: KyberPreKeyId) -> Result<bool> {
        self.kyber_pre_key_store.has_kyber_pre_key_been_used(id).await
    }
}

#[async_trait(?Send)]
impl SessionStore for MemoryProtocolStore {
    async fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        self.session_store.load_session(address).await
    }

    async fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.session_store.store_session(address, record).await
    }
}

#[async_trait(?Send)]
impl SenderKeyStore for MemoryProtocolStore {
    async fn store_sender_key(
        &mut self,
        sender: &ProtocolAddress,
        distribution_id: Uuid,
        record: &SenderKeyRecord,
    ) -> Result<()> {
        self.sender_key_store.store_sender_key(sender, distribution_id, record).await
    }

    async fn load_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: Uuid,
    ) -> Result<Option<SenderKeyRecord>> {
        self.sender_key_store.load_sender_key(sender, distribution_id).await
    }
}

impl ProtocolStore for MemoryProtocolStore {}

#[cfg(test)]
mod tests {
    use palisade_proto::DeviceId;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    #[tokio::test]
    async fn trust_on_first_use() {
        let mut rng = ChaCha20Rng::seed_from_u64(80);
        let mut store = MemoryIdentityKeyStore::new(IdentityKeyPair::generate(&mut rng), 7);
        let address = ProtocolAddress::new("bob", DeviceId::from(1));
        let first = IdentityKeyPair::generate(&mut rng).identity_key();
        let second = IdentityKeyPair::generate(&mut rng).identity_key();

        assert!(store.is_trusted_identity(&address, &first, Direction::Sending).await.unwrap());
        assert_eq!(store.save_identity(&address, &first).await.unwrap(), IdentityChange::NewOrUnchanged);
        assert_eq!(store.save_identity(&address, &first).await.unwrap(), IdentityChange::NewOrUnchanged);
        assert!(!store.is_trusted_identity(&address, &second, Direction::Receiving).await.unwrap());

        assert_eq!(store.save_identity(&address, &second).await.unwrap(), IdentityChange::ReplacedExisting);
        assert_eq!(store.get_identity(&address).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn existing_sessions_require_every_address() {
        let mut store = MemorySessionStore::new();
        let alice = ProtocolAddress::new("alice", DeviceId::from(1));
        let bob = ProtocolAddress::new("bob", DeviceId::from(1));
        store.store_session(&alice, &SessionRecord::new_fresh()).await.unwrap();

        assert_eq!(store.load_existing_sessions(&[&alice]).await.unwrap().len(), 1);
        let err = store.load_existing_sessions(&[&alice, &bob]).await.unwrap_err();
        assert!(matches!(err, crate::EngineError::SessionNotFound { address } if address == bob));
    }

    #[tokio::test]
    async fn kyber_keys_are_marked_not_removed() {
        let mut rng = ChaCha20Rng::seed_from_u64(81);
        let identity = IdentityKeyPair::generate(&mut rng);
        let id = KyberPreKeyId::from(3);
        let record = KyberPreKeyRecord::generate(id, palisade_proto::Timestamp::from_epoch_millis(1), &identity, &mut rng)
            .unwrap();
        let mut store = MemoryKyberPreKeyStore::new();
        store.save_kyber_pre_key(id, &record).await.unwrap();

        assert!(!store.has_kyber_pre_key_been_used(id).await.unwrap());
        store.mark_kyber_pre_key_used(id).await.unwrap();
        assert!(store.has_kyber_pre_key_been_used(id).await.unwrap());
        assert!(store.get_kyber_pre_key(id).await.unwrap().is_some());
    }
}

//! One double-ratchet state.

use std::{collections::VecDeque, fmt};

use palisade_crypto::{ChainKey, IdentityKey, KeyPair, PrivateKey, PublicKey, RootKey, serde_bytes};
use palisade_proto::{KyberPreKeyId, PreKeyId, SignedPreKeyId, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    SessionConfig,
    consts::{MAX_MESSAGE_KEYS, MAX_RECEIVER_CHAINS},
    error::{EngineError, Result},
};

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SkippedMessageKey {
    counter: u32,
    seed: [u8; 32],
}

#[derive(Clone, Serialize, Deserialize)]
struct ReceiverChain {
    ratchet_key: PublicKey,
    chain_key: ChainKey,
    /// Oldest first; eviction pops the front.
    message_keys: VecDeque<SkippedMessageKey>,
}

#[derive(Clone, Serialize, Deserialize)]
struct SenderChain {
    ratchet_key: KeyPair,
    chain_key: ChainKey,
}

/// Agreement inputs the initiator repeats on every message until the peer
/// replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PendingPreKey {
    pub(crate) pre_key_id: Option<PreKeyId>,
    pub(crate) signed_pre_key_id: SignedPreKeyId,
    pub(crate) kyber_pre_key_id: KyberPreKeyId,
    #[serde(with = "serde_bytes")]
    pub(crate) kyber_ciphertext: Vec<u8>,
    pub(crate) base_key: PublicKey,
    pub(crate) timestamp: Timestamp,
}

/// Ratchet state of one session.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct SessionState {
    session_version: u8,
    local_identity: IdentityKey,
    remote_identity: IdentityKey,
    root_key: RootKey,
    previous_counter: u32,
    sender_chain: Option<SenderChain>,
    /// Oldest first.
    receiver_chains: VecDeque<ReceiverChain>,
    pending_pre_key: Option<PendingPreKey>,
    local_registration_id: u32,
    remote_registration_id: u32,
    alice_base_key: PublicKey,
}

impl SessionState {
    pub(crate) fn new(
        session_version: u8,
        local_identity: IdentityKey,
        remote_identity: IdentityKey,
        root_key: RootKey,
        alice_base_key: PublicKey,
    ) -> Self {
        Self {
            session_version,
            local_identity,
            remote_identity,
            root_key,
            previous_counter: 0,
            sender_chain: None,
            receiver_chains: VecDeque::new(),
            pending_pre_key: None,
            local_registration_id: 0,
            remote_registration_id: 0,
            alice_base_key,
        }
    }

    pub(crate) fn session_version(&self) -> u8 {
        self.session_version
    }

    pub(crate) fn alice_base_key(&self) -> &PublicKey {
        &self.alice_base_key
    }

    pub(crate) fn local_identity_key(&self) -> &IdentityKey {
        &self.local_identity
    }

    pub(crate) fn remote_identity_key(&self) -> &IdentityKey {
        &self.remote_identity
    }

    pub(crate) fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    pub(crate) fn set_root_key(&mut self, root_key: RootKey) {
        self.root_key = root_key;
    }

    pub(crate) fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub(crate) fn set_previous_counter(&mut self, counter: u32) {
        self.previous_counter = counter;
    }

    pub(crate) fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub(crate) fn set_local_registration_id(&mut self, id: u32) {
        self.local_registration_id = id;
    }

    pub(crate) fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub(crate) fn set_remote_registration_id(&mut self, id: u32) {
        self.remote_registration_id = id;
    }

    pub(crate) fn has_sender_chain(&self) -> bool {
        self.sender_chain.is_some()
    }

    /// Sending is allowed once a sender chain exists, and either the peer has
    /// replied or the handshake is younger than the configured maximum age.
    pub(crate) fn has_usable_sender_chain(&self, now: Timestamp, config: &SessionConfig) -> bool {
        if self.sender_chain.is_none() {
            return false;
        }
        match &self.pending_pre_key {
            None => true,
            Some(pending) => {
                now < pending.timestamp.add_duration(config.max_unacknowledged_session_age)
            },
        }
    }

    fn sender_chain(&self) -> Result<&SenderChain> {
        self.sender_chain
            .as_ref()
            .ok_or_else(|| EngineError::invalid_state("sender_chain", "session has no sender chain"))
    }

    pub(crate) fn sender_ratchet_key(&self) -> Result<PublicKey> {
        Ok(self.sender_chain()?.ratchet_key.public_key)
    }

    pub(crate) fn sender_ratchet_private_key(&self) -> Result<PrivateKey> {
        Ok(self.sender_chain()?.ratchet_key.private_key.clone())
    }

    pub(crate) fn sender_chain_key(&self) -> Result<ChainKey> {
        Ok(self.sender_chain()?.chain_key.clone())
    }

    pub(crate) fn set_sender_chain(&mut self, ratchet_key: KeyPair, chain_key: ChainKey) {
        self.sender_chain = Some(SenderChain { ratchet_key, chain_key });
    }

    pub(crate) fn set_sender_chain_key(&mut self, chain_key: ChainKey) -> Result<()> {
        let chain = self.sender_chain.as_mut().ok_or_else(|| {
            EngineError::invalid_state("set_sender_chain_key", "session has no sender chain")
        })?;
        chain.chain_key = chain_key;
        Ok(())
    }

    fn receiver_chain(&self, sender: &PublicKey) -> Option<&ReceiverChain> {
        self.receiver_chains.iter().find(|c| &c.ratchet_key == sender)
    }

    fn receiver_chain_mut(&mut self, sender: &PublicKey) -> Option<&mut ReceiverChain> {
        self.receiver_chains.iter_mut().find(|c| &c.ratchet_key == sender)
    }

    pub(crate) fn receiver_chain_key(&self, sender: &PublicKey) -> Option<ChainKey> {
        self.receiver_chain(sender).map(|c| c.chain_key.clone())
    }

    /// Ratchet key and chain of the most recently added receiving chain.
    pub(crate) fn latest_receiver_chain(&self) -> Option<(PublicKey, ChainKey)> {
        self.receiver_chains.back().map(|c| (c.ratchet_key, c.chain_key.clone()))
    }

    pub(crate) fn add_receiver_chain(&mut self, sender: PublicKey, chain_key: ChainKey) {
        self.receiver_chains.push_back(ReceiverChain {
            ratchet_key: sender,
            chain_key,
            message_keys: VecDeque::new(),
        });
        while self.receiver_chains.len() > MAX_RECEIVER_CHAINS {
            debug!("dropping oldest receiver chain");
            self.receiver_chains.pop_front();
        }
    }

    pub(crate) fn set_receiver_chain_key(&mut self, sender: &PublicKey, chain_key: ChainKey) -> Result<()> {
        let chain = self.receiver_chain_mut(sender).ok_or_else(|| {
            EngineError::invalid_state("set_receiver_chain_key", "no receiver chain for ratchet key")
        })?;
        chain.chain_key = chain_key;
        Ok(())
    }

    /// Take the cached seed for `counter` on the chain of `sender`. Each
    /// seed can be taken once.
    pub(crate) fn take_message_key(&mut self, sender: &PublicKey, counter: u32) -> Option<[u8; 32]> {
        let chain = self.receiver_chain_mut(sender)?;
        let position = chain.message_keys.iter().position(|k| k.counter == counter)?;
        chain.message_keys.remove(position).map(|k| k.seed)
    }

    /// Cache a skipped message key seed. The oldest entry is evicted once the
    /// chain holds [`MAX_MESSAGE_KEYS`].
    pub(crate) fn cache_message_key(&mut self, sender: &PublicKey, counter: u32, seed: [u8; 32]) -> Result<()> {
        let chain = self.receiver_chain_mut(sender).ok_or_else(|| {
            EngineError::invalid_state("cache_message_key", "no receiver chain for ratchet key")
        })?;
        chain.message_keys.push_back(SkippedMessageKey { counter, seed });
        while chain.message_keys.len() > MAX_MESSAGE_KEYS {
            chain.message_keys.pop_front();
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn cached_message_key_count(&self, sender: &PublicKey) -> usize {
        self.receiver_chain(sender).map_or(0, |c| c.message_keys.len())
    }

    pub(crate) fn set_pending_pre_key(&mut self, pending: PendingPreKey) {
        self.pending_pre_key = Some(pending);
    }

    pub(crate) fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub(crate) fn clear_pending_pre_key(&mut self) {
        self.pending_pre_key = None;
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("session_version", &self.session_version)
            .field("remote_identity", &self.remote_identity)
            .field("alice_base_key", &self.alice_base_key)
            .field("previous_counter", &self.previous_counter)
            .field("has_sender_chain", &self.sender_chain.is_some())
            .field("receiver_chains", &self.receiver_chains.len())
            .field("pending_pre_key", &self.pending_pre_key.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use palisade_crypto::IdentityKeyPair;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn state(rng: &mut ChaCha20Rng) -> SessionState {
        let local = IdentityKeyPair::generate(rng).identity_key();
        let remote = IdentityKeyPair::generate(rng).identity_key();
        let base = KeyPair::generate(rng).public_key;
        SessionState::new(4, local, remote, RootKey::new([1; 32]), base)
    }

    #[test]
    fn skipped_keys_are_single_use_and_bounded() {
        let mut rng = ChaCha20Rng::seed_from_u64(50);
        let mut state = state(&mut rng);
        let sender = KeyPair::generate(&mut rng).public_key;
        state.add_receiver_chain(sender, ChainKey::new([2; 32], 0));

        for counter in 0..(MAX_MESSAGE_KEYS as u32 + 10) {
            state.cache_message_key(&sender, counter, [counter as u8; 32]).unwrap();
        }
        assert_eq!(state.cached_message_key_count(&sender), MAX_MESSAGE_KEYS);

        // Oldest entries were evicted first.
        assert!(state.take_message_key(&sender, 0).is_none());
        assert_eq!(state.take_message_key(&sender, 15), Some([15; 32]));
        assert!(state.take_message_key(&sender, 15).is_none());
    }

    #[test]
    fn receiver_chains_are_bounded() {
        let mut rng = ChaCha20Rng::seed_from_u64(51);
        let mut state = state(&mut rng);
        let keys: Vec<_> = (0..MAX_RECEIVER_CHAINS + 1).map(|_| KeyPair::generate(&mut rng).public_key).collect();
        for key in &keys {
            state.add_receiver_chain(*key, ChainKey::new([3; 32], 0));
        }

        assert!(state.receiver_chain_key(&keys[0]).is_none());
        assert!(state.receiver_chain_key(&keys[MAX_RECEIVER_CHAINS]).is_some());
        assert_eq!(state.latest_receiver_chain().map(|(k, _)| k), Some(keys[MAX_RECEIVER_CHAINS]));
    }

    #[test]
    fn unacknowledged_session_expires() {
        let mut rng = ChaCha20Rng::seed_from_u64(52);
        let mut state = state(&mut rng);
        let config = SessionConfig::default();
        let ratchet = KeyPair::generate(&mut rng);
        state.set_sender_chain(ratchet, ChainKey::new([4; 32], 0));
        state.set_pending_pre_key(PendingPreKey {
            pre_key_id: None,
            signed_pre_key_id: SignedPreKeyId::from(1),
            kyber_pre_key_id: KyberPreKeyId::from(1),
            kyber_ciphertext: vec![],
            base_key: *state.alice_base_key(),
            timestamp: Timestamp::from_epoch_millis(0),
        });

        let limit = Timestamp::from_epoch_millis(0).add_duration(config.max_unacknowledged_session_age);
        assert!(state.has_usable_sender_chain(limit.sub_duration(Duration::from_millis(1)), &config));
        assert!(!state.has_usable_sender_chain(limit, &config));

        state.clear_pending_pre_key();
        assert!(state.has_usable_sender_chain(limit.add_duration(Duration::from_secs(3600)), &config));
    }
}

//! Sender-key (group) chain records.

use std::collections::VecDeque;

use palisade_crypto::{IdentityKey, IdentityKeyPair, SenderChainKey, SenderMessageKey};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{decode_record, encode_record};
use crate::{
    consts::{MAX_MESSAGE_KEYS, MAX_SENDER_KEY_STATES},
    error::Result,
};

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct CachedSenderMessageKey {
    iteration: u32,
    seed: [u8; 32],
}

/// One sender chain, identified by its chain id.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct SenderKeyState {
    message_version: u8,
    chain_id: u32,
    chain_key: SenderChainKey,
    signing_key_public: IdentityKey,
    /// Present only on the sending device.
    signing_key_private: Option<IdentityKeyPair>,
    /// Oldest first.
    message_keys: VecDeque<CachedSenderMessageKey>,
}

impl SenderKeyState {
    pub(crate) fn new(
        message_version: u8,
        chain_id: u32,
        chain_key: SenderChainKey,
        signing_key_public: IdentityKey,
        signing_key_private: Option<IdentityKeyPair>,
    ) -> Self {
        Self {
            message_version,
            chain_id,
            chain_key,
            signing_key_public,
            signing_key_private,
            message_keys: VecDeque::new(),
        }
    }

    pub(crate) fn message_version(&self) -> u8 {
        self.message_version
    }

    pub(crate) fn chain_id(&self) -> u32 {
        self.chain_id
    }

    pub(crate) fn chain_key(&self) -> &SenderChainKey {
        &self.chain_key
    }

    pub(crate) fn set_chain_key(&mut self, chain_key: SenderChainKey) {
        self.chain_key = chain_key;
    }

    pub(crate) fn signing_key_public(&self) -> &IdentityKey {
        &self.signing_key_public
    }

    pub(crate) fn signing_key_private(&self) -> Option<&IdentityKeyPair> {
        self.signing_key_private.as_ref()
    }

    pub(crate) fn add_message_key(&mut self, key: &SenderMessageKey) {
        self.message_keys
            .push_back(CachedSenderMessageKey { iteration: key.iteration(), seed: *key.seed() });
        while self.message_keys.len() > MAX_MESSAGE_KEYS {
            self.message_keys.pop_front();
        }
    }

    /// Take the cached key for `iteration`. Each key can be taken once.
    pub(crate) fn take_message_key(&mut self, iteration: u32) -> Result<Option<SenderMessageKey>> {
        let Some(position) = self.message_keys.iter().position(|k| k.iteration == iteration) else {
            return Ok(None);
        };
        match self.message_keys.remove(position) {
            Some(cached) => Ok(Some(SenderMessageKey::new(cached.iteration, cached.seed)?)),
            None => Ok(None),
        }
    }
}

/// All chains received from one sender for one distribution id.
///
/// The newest chain is first. A sender rotating its chain keeps earlier
/// messages decryptable until the record holds [`MAX_SENDER_KEY_STATES`].
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SenderKeyRecord {
    states: VecDeque<SenderKeyState>,
}

impl SenderKeyRecord {
    /// Record with no chains.
    pub fn new_empty() -> Self {
        Self::default()
    }

    /// Whether no chain has been stored.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Encode for storage.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_record(self, "sender key record")
    }

    /// Decode from storage.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        decode_record(bytes, "sender key record")
    }

    pub(crate) fn sender_key_state(&self) -> Option<&SenderKeyState> {
        self.states.front()
    }

    pub(crate) fn sender_key_state_mut(&mut self) -> Option<&mut SenderKeyState> {
        self.states.front_mut()
    }

    pub(crate) fn sender_key_state_for_chain_id(&mut self, chain_id: u32) -> Option<&mut SenderKeyState> {
        self.states.iter_mut().find(|s| s.chain_id == chain_id)
    }

    pub(crate) fn chain_ids(&self) -> Vec<u32> {
        self.states.iter().map(SenderKeyState::chain_id).collect()
    }

    /// Add a chain learned from a distribution message.
    ///
    /// Re-processing the same distribution message changes nothing. A chain
    /// id reused with a different signing key replaces the old chain.
    pub(crate) fn add_sender_key_state(&mut self, state: SenderKeyState) {
        if let Some(position) = self.states.iter().position(|s| s.chain_id == state.chain_id) {
            if self.states[position].signing_key_public == state.signing_key_public {
                debug!(chain_id = state.chain_id, "sender key chain already known");
                return;
            }
            debug!(chain_id = state.chain_id, "replacing sender key chain with new signing key");
            self.states.remove(position);
        }
        self.states.push_front(state);
        self.states.truncate(MAX_SENDER_KEY_STATES);
    }

    /// Install a freshly generated local chain, dropping any previous chain
    /// with the same id.
    pub(crate) fn set_sender_key_state(&mut self, state: SenderKeyState) {
        self.states.retain(|s| s.chain_id != state.chain_id);
        self.states.push_front(state);
        self.states.truncate(MAX_SENDER_KEY_STATES);
    }
}

impl std::fmt::Debug for SenderKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderKeyRecord").field("chain_ids", &self.chain_ids()).finish()
    }
}

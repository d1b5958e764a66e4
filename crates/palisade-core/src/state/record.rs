//! Session record: the current state plus archived predecessors.

use std::collections::VecDeque;

use palisade_crypto::{IdentityKey, PublicKey};
use palisade_proto::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SessionState, decode_record, encode_record};
use crate::{SessionConfig, consts::ARCHIVED_STATES_MAX_LENGTH, error::Result};

/// Everything known about the sessions with one peer device.
///
/// The current state is used for sending. Archived states are still tried
/// when decrypting, so messages sent before a re-keying remain readable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    current_session: Option<SessionState>,
    /// Most recent first.
    previous_sessions: VecDeque<SessionState>,
}

impl SessionRecord {
    /// Record with no states.
    pub fn new_fresh() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn new(state: SessionState) -> Self {
        Self { current_session: Some(state), previous_sessions: VecDeque::new() }
    }

    /// Whether a current state exists.
    pub fn has_current_state(&self) -> bool {
        self.current_session.is_some()
    }

    /// Whether the current state can encrypt at `now`.
    pub fn has_usable_sender_chain(&self, now: Timestamp, config: &SessionConfig) -> bool {
        self.current_session.as_ref().is_some_and(|s| s.has_usable_sender_chain(now, config))
    }

    /// Move the current state to the archive. No-op without a current state.
    pub fn archive_current_state(&mut self) {
        if let Some(state) = self.current_session.take() {
            debug!(version = state.session_version(), "archiving current session state");
            self.previous_sessions.push_front(state);
            self.previous_sessions.truncate(ARCHIVED_STATES_MAX_LENGTH);
        }
    }

    /// Remote identity of the current state.
    pub fn remote_identity_key(&self) -> Option<IdentityKey> {
        self.current_session.as_ref().map(|s| *s.remote_identity_key())
    }

    /// Local identity of the current state.
    pub fn local_identity_key(&self) -> Option<IdentityKey> {
        self.current_session.as_ref().map(|s| *s.local_identity_key())
    }

    /// Registration id of the peer, from the current state.
    pub fn remote_registration_id(&self) -> Option<u32> {
        self.current_session.as_ref().map(SessionState::remote_registration_id)
    }

    /// Local registration id, from the current state.
    pub fn local_registration_id(&self) -> Option<u32> {
        self.current_session.as_ref().map(SessionState::local_registration_id)
    }

    /// Protocol version of the current state.
    pub fn session_version(&self) -> Option<u8> {
        self.current_session.as_ref().map(SessionState::session_version)
    }

    /// Whether our current sending ratchet key is `key`.
    pub fn current_ratchet_key_matches(&self, key: &PublicKey) -> bool {
        self.current_session
            .as_ref()
            .and_then(|s| s.sender_ratchet_key().ok())
            .is_some_and(|current| &current == key)
    }

    /// Number of archived states.
    pub fn previous_session_count(&self) -> usize {
        self.previous_sessions.len()
    }

    /// Encode for storage.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_record(self, "session record")
    }

    /// Decode from storage.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        decode_record(bytes, "session record")
    }

    pub(crate) fn session_state(&self) -> Option<&SessionState> {
        self.current_session.as_ref()
    }

    pub(crate) fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current_session.as_mut()
    }

    pub(crate) fn previous_session_states(&self) -> impl Iterator<Item = &SessionState> {
        self.previous_sessions.iter()
    }

    /// Install `state` as current, archiving whatever was current before.
    pub(crate) fn promote_state(&mut self, state: SessionState) {
        self.archive_current_state();
        self.current_session = Some(state);
    }

    /// Replace archived state `index` with `updated` and make it current.
    pub(crate) fn promote_old_session(&mut self, index: usize, updated: SessionState) {
        self.previous_sessions.remove(index);
        self.promote_state(updated);
    }

    pub(crate) fn set_session_state(&mut self, state: SessionState) {
        self.current_session = Some(state);
    }

    /// Find the state created from `base_key`. Returns true if it exists,
    /// promoting it from the archive when needed.
    pub(crate) fn promote_matching_session(&mut self, version: u8, base_key: &PublicKey) -> bool {
        let matches = |s: &SessionState| s.session_version() == version && s.alice_base_key() == base_key;

        if self.current_session.as_ref().is_some_and(matches) {
            return true;
        }
        match self.previous_sessions.iter().position(matches) {
            Some(index) => {
                if let Some(state) = self.previous_sessions.remove(index) {
                    self.promote_state(state);
                }
                true
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use palisade_crypto::{IdentityKeyPair, KeyPair, RootKey};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn state(rng: &mut ChaCha20Rng) -> SessionState {
        let local = IdentityKeyPair::generate(rng).identity_key();
        let remote = IdentityKeyPair::generate(rng).identity_key();
        SessionState::new(4, local, remote, RootKey::new([9; 32]), KeyPair::generate(rng).public_key)
    }

    #[test]
    fn archive_is_bounded_and_idempotent() {
        let mut rng = ChaCha20Rng::seed_from_u64(60);
        let mut record = SessionRecord::new_fresh();
        record.archive_current_state();
        assert_eq!(record.previous_session_count(), 0);

        for _ in 0..ARCHIVED_STATES_MAX_LENGTH + 5 {
            record.promote_state(state(&mut rng));
        }
        assert!(record.has_current_state());
        assert_eq!(record.previous_session_count(), ARCHIVED_STATES_MAX_LENGTH);
    }

    #[test]
    fn matching_archived_session_is_promoted() {
        let mut rng = ChaCha20Rng::seed_from_u64(61);
        let first = state(&mut rng);
        let base = *first.alice_base_key();
        let mut record = SessionRecord::new(first);
        record.promote_state(state(&mut rng));

        assert!(record.promote_matching_session(4, &base));
        assert_eq!(record.session_state().map(|s| *s.alice_base_key()), Some(base));
        assert_eq!(record.previous_session_count(), 1);

        assert!(!record.promote_matching_session(3, &base));
    }

    #[test]
    fn record_survives_storage() {
        let mut rng = ChaCha20Rng::seed_from_u64(62);
        let mut record = SessionRecord::new(state(&mut rng));
        record.promote_state(state(&mut rng));

        let bytes = record.serialize().expect("serialize");
        let restored = SessionRecord::deserialize(&bytes).expect("deserialize");
        assert_eq!(restored.previous_session_count(), 1);
        assert_eq!(restored.remote_identity_key(), record.remote_identity_key());
        assert_eq!(restored.session_version(), Some(4));
    }

    #[test]
    fn unknown_record_version_rejected() {
        assert!(SessionRecord::deserialize(&[9, 0xa0]).is_err());
        assert!(SessionRecord::deserialize(&[]).is_err());
    }
}

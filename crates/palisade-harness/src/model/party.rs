use std::collections::{HashSet, VecDeque};

use palisade_core::consts::MAX_RECEIVER_CHAINS;

use super::operation::{OperationError, Side};

/// A message as the model sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMessage {
    /// Sender.
    pub from: Side,
    /// Sender's chain generation.
    pub chain: u32,
    /// Position in that chain.
    pub counter: u32,
    /// Plaintext.
    pub plaintext: Vec<u8>,
}

/// One side's ratchet bookkeeping.
#[derive(Debug, Clone)]
pub struct ModelParty {
    side: Side,
    sending_chain: u32,
    sending_counter: u32,
    peer_chains: VecDeque<u32>,
    consumed: HashSet<(u32, u32)>,
}

impl ModelParty {
    pub(super) fn new(side: Side) -> Self {
        let peer_chains = match side {
            Side::Alice => VecDeque::from([0]),
            Side::Bob => VecDeque::new(),
        };
        Self { side, sending_chain: 0, sending_counter: 0, peer_chains, consumed: HashSet::new() }
    }

    /// Whether this side can encrypt.
    pub fn has_session(&self) -> bool {
        !self.peer_chains.is_empty()
    }

    /// Peer chains still kept, oldest first.
    pub fn peer_chains(&self) -> impl Iterator<Item = u32> + '_ {
        self.peer_chains.iter().copied()
    }

    pub(super) fn send(&mut self, plaintext: Vec<u8>) -> Result<ModelMessage, OperationError> {
        if !self.has_session() {
            return Err(OperationError::NoSession);
        }
        let message =
            ModelMessage { from: self.side, chain: self.sending_chain, counter: self.sending_counter, plaintext };
        self.sending_counter += 1;
        Ok(message)
    }

    pub(super) fn receive(&mut self, message: &ModelMessage) -> Result<Vec<u8>, OperationError> {
        let key = (message.chain, message.counter);
        if self.peer_chains.contains(&message.chain) {
            if !self.consumed.insert(key) {
                return Err(OperationError::Duplicate);
            }
            return Ok(message.plaintext.clone());
        }

        if self.peer_chains.back().is_some_and(|&latest| message.chain < latest) {
            return Err(OperationError::Rejected);
        }

        self.peer_chains.push_back(message.chain);
        if self.peer_chains.len() > MAX_RECEIVER_CHAINS {
            if let Some(evicted) = self.peer_chains.pop_front() {
                self.consumed.retain(|&(chain, _)| chain != evicted);
            }
        }
        self.sending_chain += 1;
        self.sending_counter = 0;
        self.consumed.insert(key);
        Ok(message.plaintext.clone())
    }
}

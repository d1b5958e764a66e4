//! Model conversation: two parties and the wire between them.

use super::{
    operation::{Operation, OperationError, OperationResult, Side},
    party::{ModelMessage, ModelParty},
};

/// The reference implementation of a two-party conversation.
#[derive(Debug, Clone)]
pub struct ModelConversation {
    alice: ModelParty,
    bob: ModelParty,
    in_flight: Vec<ModelMessage>,
    delivered: Vec<ModelMessage>,
}

impl Default for ModelConversation {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelConversation {
    /// Alice holds a session from Bob's bundle; nothing has been sent.
    pub fn new() -> Self {
        Self {
            alice: ModelParty::new(Side::Alice),
            bob: ModelParty::new(Side::Bob),
            in_flight: Vec::new(),
            delivered: Vec::new(),
        }
    }

    /// Bookkeeping for `side`.
    pub fn party(&self, side: Side) -> &ModelParty {
        match side {
            Side::Alice => &self.alice,
            Side::Bob => &self.bob,
        }
    }

    fn party_mut(&mut self, side: Side) -> &mut ModelParty {
        match side {
            Side::Alice => &mut self.alice,
            Side::Bob => &mut self.bob,
        }
    }

    /// Messages sent but not yet delivered, in send order.
    pub fn in_flight(&self) -> &[ModelMessage] {
        &self.in_flight
    }

    /// Messages delivered at least once.
    pub fn delivered(&self) -> &[ModelMessage] {
        &self.delivered
    }

    /// Apply `op` and report what the real parties must observe.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::Send { from, content } => match self.party_mut(*from).send(content.to_bytes()) {
                Ok(message) => {
                    self.in_flight.push(message);
                    OperationResult::Sent
                },
                Err(e) => OperationResult::Error(e),
            },
            Operation::Deliver { pick } => {
                if self.in_flight.is_empty() {
                    return OperationResult::Error(OperationError::NothingToDeliver);
                }
                let message = self.in_flight.remove(usize::from(*pick) % self.in_flight.len());
                let result = self.party_mut(message.from.peer()).receive(&message);
                if result.is_ok() {
                    self.delivered.push(message);
                }
                result.map_or_else(OperationResult::Error, OperationResult::Delivered)
            },
            Operation::Replay { pick } => {
                if self.delivered.is_empty() {
                    return OperationResult::Error(OperationError::NothingToDeliver);
                }
                let message = self.delivered[usize::from(*pick) % self.delivered.len()].clone();
                self.party_mut(message.from.peer())
                    .receive(&message)
                    .map_or_else(OperationResult::Error, OperationResult::Delivered)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SmallMessage;

    fn send(from: Side) -> Operation {
        Operation::Send { from, content: SmallMessage { seed: 1, size_class: 1 } }
    }

    #[test]
    fn responder_cannot_send_first() {
        let mut model = ModelConversation::new();
        assert_eq!(model.apply(&send(Side::Bob)), OperationResult::Error(OperationError::NoSession));
        assert_eq!(model.apply(&send(Side::Alice)), OperationResult::Sent);
        assert!(matches!(model.apply(&Operation::Deliver { pick: 0 }), OperationResult::Delivered(_)));
        assert_eq!(model.apply(&send(Side::Bob)), OperationResult::Sent);
    }

    #[test]
    fn replay_is_duplicate() {
        let mut model = ModelConversation::new();
        model.apply(&send(Side::Alice));
        model.apply(&Operation::Deliver { pick: 0 });
        assert_eq!(model.apply(&Operation::Replay { pick: 0 }), OperationResult::Error(OperationError::Duplicate));
    }

    #[test]
    fn old_chains_are_forgotten() {
        let mut model = ModelConversation::new();
        // A message from Alice's first chain stays in flight while both
        // sides ratchet back and forth.
        model.apply(&send(Side::Alice));
        model.apply(&send(Side::Alice));
        model.apply(&Operation::Deliver { pick: 1 });
        for _ in 0..6 {
            model.apply(&send(Side::Bob));
            let last = (model.in_flight().len() - 1) as u8;
            model.apply(&Operation::Deliver { pick: last });
            model.apply(&send(Side::Alice));
            let last = (model.in_flight().len() - 1) as u8;
            model.apply(&Operation::Deliver { pick: last });
        }
        assert_eq!(model.apply(&Operation::Deliver { pick: 0 }), OperationResult::Error(OperationError::Rejected));
    }
}

//! Operations for model-based testing.
//!
//! Operations are generated randomly (by proptest or a fuzzer) and applied
//! to both the model and two real parties.

use arbitrary::Arbitrary;

/// One end of the conversation. Alice starts it from Bob's bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Arbitrary)]
pub enum Side {
    /// Initiator.
    Alice,
    /// Responder.
    Bob,
}

impl Side {
    /// The other side.
    pub fn peer(self) -> Self {
        match self {
            Self::Alice => Self::Bob,
            Self::Bob => Self::Alice,
        }
    }
}

/// Operations that can be applied to a conversation.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// `from` encrypts a message and puts it in flight.
    Send {
        /// Sender.
        from: Side,
        /// Message content.
        content: SmallMessage,
    },

    /// Deliver one in-flight message, chosen by `pick`.
    Deliver {
        /// Index into the in-flight list, modulo its length.
        pick: u8,
    },

    /// Deliver an already delivered message again.
    Replay {
        /// Index into the delivered list, modulo its length.
        pick: u8,
    },
}

/// Small message content for testing.
#[derive(Debug, Clone, Arbitrary)]
pub struct SmallMessage {
    /// Message seed.
    pub seed: u8,
    /// Length class (0-3 maps to empty/small/medium/large).
    pub size_class: u8,
}

impl SmallMessage {
    /// Expand to actual message bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = match self.size_class % 4 {
            0 => 0,
            1 => 8,
            2 => 64,
            _ => 256,
        };
        (0..len).map(|i| self.seed.wrapping_add(i as u8)).collect()
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// A message was encrypted.
    Sent,
    /// A message decrypted to these bytes.
    Delivered(Vec<u8>),
    /// Operation failed with an expected error.
    Error(OperationError),
}

/// Expected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// The sender has no session yet.
    NoSession,
    /// The chosen list was empty.
    NothingToDeliver,
    /// The message was already decrypted.
    Duplicate,
    /// The receiver no longer keeps the message's chain.
    Rejected,
}

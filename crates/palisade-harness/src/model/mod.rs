//! Reference model for pairwise delivery.
//!
//! The model knows nothing about keys. It tracks only what the double
//! ratchet guarantees to the receiver:
//!
//! - every message decrypts once, in any order, as long as the receiver
//!   still keeps the sender's chain
//! - a second delivery of a decrypted message is a duplicate
//! - each side keeps at most five of the peer's chains
//!
//! A side starts a new sending chain whenever it first hears from a new peer
//! chain. The initiator starts out knowing one peer chain, the responder's
//! signed prekey, that is never used to send.

mod conversation;
pub mod operation;
mod party;

pub use conversation::ModelConversation;
pub use operation::{Operation, OperationError, OperationResult, Side, SmallMessage};
pub use party::{ModelMessage, ModelParty};

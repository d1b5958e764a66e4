//! Model-based property tests.
//!
//! Random sequences of sends, deliveries in any order and replays are
//! applied to the reference model and to two real parties. Both must agree
//! on every result.
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!   ModelConversation   RealWorld      Compare
//!      (reference)    (two parties)    Results
//! ```

use palisade_core::EngineError;
use palisade_harness::{
    ModelConversation, Operation, OperationError, OperationResult, Side, SmallMessage, TestParty,
    establish_session,
};
use palisade_proto::{CiphertextMessage, Timestamp};
use proptest::prelude::*;

const NOW: Timestamp = Timestamp::from_epoch_millis(1_700_000_000_000);

/// Real system wrapper that mirrors the model's interface.
struct RealWorld {
    alice: TestParty,
    bob: TestParty,
    in_flight: Vec<(Side, CiphertextMessage)>,
    delivered: Vec<(Side, CiphertextMessage)>,
}

impl RealWorld {
    async fn new(seed: u64) -> Self {
        let mut alice = TestParty::new(seed, 1);
        let mut bob = TestParty::new(seed.wrapping_add(1), 1);
        establish_session(&mut alice, &mut bob, NOW).await.unwrap();
        Self { alice, bob, in_flight: Vec::new(), delivered: Vec::new() }
    }

    fn parties(&mut self, sender: Side) -> (&mut TestParty, &mut TestParty) {
        match sender {
            Side::Alice => (&mut self.alice, &mut self.bob),
            Side::Bob => (&mut self.bob, &mut self.alice),
        }
    }

    async fn receive(&mut self, from: Side, message: &CiphertextMessage) -> OperationResult {
        let (sender, receiver) = self.parties(from);
        let sender_address = sender.address.clone();
        match receiver.decrypt(&sender_address, message).await {
            Ok(ptext) => OperationResult::Delivered(ptext),
            Err(EngineError::DuplicatedMessage { .. }) => OperationResult::Error(OperationError::Duplicate),
            Err(_) => OperationResult::Error(OperationError::Rejected),
        }
    }

    async fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::Send { from, content } => {
                let (sender, receiver) = self.parties(*from);
                let receiver_address = receiver.address.clone();
                match sender.encrypt(&receiver_address, &content.to_bytes(), NOW).await {
                    Ok(message) => {
                        self.in_flight.push((*from, message));
                        OperationResult::Sent
                    },
                    Err(EngineError::SessionNotFound { .. }) => OperationResult::Error(OperationError::NoSession),
                    Err(_) => OperationResult::Error(OperationError::Rejected),
                }
            },
            Operation::Deliver { pick } => {
                if self.in_flight.is_empty() {
                    return OperationResult::Error(OperationError::NothingToDeliver);
                }
                let (from, message) = self.in_flight.remove(usize::from(*pick) % self.in_flight.len());
                let result = self.receive(from, &message).await;
                if matches!(result, OperationResult::Delivered(_)) {
                    self.delivered.push((from, message));
                }
                result
            },
            Operation::Replay { pick } => {
                if self.delivered.is_empty() {
                    return OperationResult::Error(OperationError::NothingToDeliver);
                }
                let (from, message) = self.delivered[usize::from(*pick) % self.delivered.len()].clone();
                self.receive(from, &message).await
            },
        }
    }
}

fn side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Alice), Just(Side::Bob)]
}

fn operation() -> impl Strategy<Value = Operation> {
    let content = (any::<u8>(), 0u8..4).prop_map(|(seed, size_class)| SmallMessage { seed, size_class });
    prop_oneof![
        // Weight towards sends and deliveries
        5 => (side(), content).prop_map(|(from, content)| Operation::Send { from, content }),
        5 => any::<u8>().prop_map(|pick| Operation::Deliver { pick }),
        1 => any::<u8>().prop_map(|pick| Operation::Replay { pick }),
    ]
}

fn run(seed: u64, ops: &[Operation]) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    runtime.block_on(async {
        let mut model = ModelConversation::new();
        let mut real = RealWorld::new(seed).await;

        for (i, op) in ops.iter().enumerate() {
            let expected = model.apply(op);
            let actual = real.apply(op).await;
            prop_assert_eq!(expected, actual, "operation {} ({:?}) diverged", i, op);
        }
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every delivery order the model accepts decrypts; every replay and
    /// every message on a forgotten chain is refused.
    #[test]
    fn prop_model_matches_real(seed in any::<u64>(), ops in prop::collection::vec(operation(), 1..60)) {
        run(seed, &ops)?;
    }
}

#[test]
fn reverse_order_delivery() {
    let ops: Vec<Operation> = (0..10u8)
        .map(|seed| Operation::Send { from: Side::Alice, content: SmallMessage { seed, size_class: 1 } })
        .chain((0..10u8).map(|i| Operation::Deliver { pick: 9 - i }))
        .collect();
    run(7, &ops).unwrap();
}

#[test]
fn forgotten_chain_is_rejected() {
    let msg = SmallMessage { seed: 3, size_class: 2 };
    let mut ops = vec![
        Operation::Send { from: Side::Alice, content: msg.clone() },
        Operation::Send { from: Side::Alice, content: msg.clone() },
        Operation::Deliver { pick: 1 },
    ];
    for _ in 0..6 {
        ops.push(Operation::Send { from: Side::Bob, content: msg.clone() });
        ops.push(Operation::Deliver { pick: 1 });
        ops.push(Operation::Send { from: Side::Alice, content: msg.clone() });
        ops.push(Operation::Deliver { pick: 1 });
    }
    ops.push(Operation::Deliver { pick: 0 });
    run(11, &ops).unwrap();
}

//! Deterministic test harness for the Palisade engine.
//!
//! Every party owns a seeded RNG and in-memory stores, so a failing test
//! replays exactly from its seed.
//!
//! # Model-Based Testing
//!
//! The [`model`] module is a reference for pairwise delivery: which messages
//! must decrypt, which are replays and which belong to chains the receiver
//! has already forgotten. Property tests apply random send and delivery
//! orders to both the model and two real parties and compare the results.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod certs;
pub mod model;
mod party;

pub use certs::TestCertificates;
pub use model::{
    ModelConversation, ModelMessage, Operation, OperationError, OperationResult, Side, SmallMessage,
};
pub use party::{TestParty, establish_session};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Route engine logs to the test output, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs the
/// subscriber.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(filter)
        .try_init();
}

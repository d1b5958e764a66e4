//! Protocol bounds.
//!
//! These are wire-level limits shared by every deployment. Policy that a
//! deployment may tune lives in [`crate::SessionConfig`].

use std::time::Duration;

/// Archived session states kept per record beyond the current one.
pub const ARCHIVED_STATES_MAX_LENGTH: usize = 40;

/// Receiving chains kept per session state.
pub const MAX_RECEIVER_CHAINS: usize = 5;

/// Cached skipped message keys per receiving chain.
pub const MAX_MESSAGE_KEYS: usize = 2000;

/// Largest counter jump accepted on a single chain.
pub const MAX_FORWARD_JUMPS: u32 = 25_000;

/// Sender-key chain states kept per record.
pub const MAX_SENDER_KEY_STATES: usize = 5;

/// Age after which a never-acknowledged session stops being usable for
/// sending.
pub const MAX_UNACKNOWLEDGED_SESSION_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 30);

/// Registration ids must fit in these bits; anything above is reserved.
pub const VALID_REGISTRATION_ID_MASK: u32 = 0x3FFF;

/// Encoding version of serialized records.
pub const RECORD_VERSION: u8 = 1;

//! Session policy.

use std::time::Duration;

use crate::consts::{MAX_FORWARD_JUMPS, MAX_UNACKNOWLEDGED_SESSION_AGE};

/// Deployment policy for pairwise sessions.
///
/// Passed explicitly to encrypt and decrypt; the engine keeps no global
/// configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a session may keep sending PreKeySignalMessages before the
    /// peer's first reply. Past this, encrypt fails with `SessionExpired`.
    pub max_unacknowledged_session_age: Duration,
    /// Largest counter jump accepted on one receiving chain. Capped by
    /// [`MAX_FORWARD_JUMPS`].
    pub max_forward_jumps: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_unacknowledged_session_age: MAX_UNACKNOWLEDGED_SESSION_AGE,
            max_forward_jumps: MAX_FORWARD_JUMPS,
        }
    }
}

impl SessionConfig {
    pub(crate) fn forward_jump_limit(&self) -> u32 {
        self.max_forward_jumps.min(MAX_FORWARD_JUMPS)
    }
}

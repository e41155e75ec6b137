//! Execution tiers — how much friction stands between a request and the chain.
//!
//! Tiers are ordered by friction: `Instant < Notify < Delay < Approval`.
//! Combining two tier opinions always takes the more frictional one.

use serde::{Deserialize, Serialize};

/// Execution-friction level assigned to a transaction by the policy engine.
///
/// - `Instant`: executes immediately, no owner involvement.
/// - `Notify`: executes immediately, owner is notified after the fact.
/// - `Delay`: held in the delay queue for a cooling-off window.
/// - `Approval`: held until the owner explicitly signs off (or it expires).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Instant,
    Notify,
    Delay,
    Approval,
}

impl Tier {
    /// The more frictional of two tiers.
    #[must_use]
    pub fn stricter(self, other: Self) -> Self {
        self.max(other)
    }

    /// Whether this tier halts the synchronous pipeline at the wait stage.
    #[must_use]
    pub fn requires_wait(self) -> bool {
        matches!(self, Self::Delay | Self::Approval)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instant => write!(f, "INSTANT"),
            Self::Notify => write!(f, "NOTIFY"),
            Self::Delay => write!(f, "DELAY"),
            Self::Approval => write!(f, "APPROVAL"),
        }
    }
}

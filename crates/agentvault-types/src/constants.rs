//! System-wide defaults and limits.

/// Default cool-off for DELAY-tier transactions when no spending-limit
/// policy sets its own (seconds).
pub const DEFAULT_DELAY_SECONDS: u64 = 300;

/// Default approval window when neither the request nor the configuration
/// sets one (seconds).
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 3_600;

/// Upper bound on the on-chain confirmation wait (milliseconds).
pub const CONFIRMATION_TIMEOUT_MS: u64 = 30_000;

/// Poll interval while waiting for confirmation (milliseconds).
pub const CONFIRMATION_POLL_INTERVAL_MS: u64 = 1_000;

/// Background scheduler tick: delay-queue release and approval-expiry
/// sweeps (seconds).
pub const SCHEDULER_TICK_SECS: u64 = 5;

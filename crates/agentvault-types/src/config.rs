//! Pipeline configuration.

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, VaultError};

/// Tunables for the pipeline, delay queue, approval workflow, and scheduler.
///
/// All durations are plain seconds/milliseconds so the struct deserializes
/// from flat config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cool-off applied to DELAY-tier transactions when the matched policy
    /// does not set its own.
    pub default_delay_seconds: u64,
    /// Approval window when the request does not override it.
    pub default_approval_timeout_seconds: u64,
    /// Upper bound on the confirmation wait in Stage 6.
    pub confirmation_timeout_ms: u64,
    /// Poll interval while waiting for confirmation.
    pub confirmation_poll_interval_ms: u64,
    /// Scheduler tick for delay-release and approval-expiry sweeps.
    pub scheduler_tick_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_delay_seconds: constants::DEFAULT_DELAY_SECONDS,
            default_approval_timeout_seconds: constants::DEFAULT_APPROVAL_TIMEOUT_SECS,
            confirmation_timeout_ms: constants::CONFIRMATION_TIMEOUT_MS,
            confirmation_poll_interval_ms: constants::CONFIRMATION_POLL_INTERVAL_MS,
            scheduler_tick_seconds: constants::SCHEDULER_TICK_SECS,
        }
    }
}

impl PipelineConfig {
    /// Reject zero-valued intervals that would spin or never fire.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler_tick_seconds == 0 {
            return Err(VaultError::Configuration(
                "scheduler_tick_seconds must be positive".to_owned(),
            ));
        }
        if self.confirmation_poll_interval_ms == 0 {
            return Err(VaultError::Configuration(
                "confirmation_poll_interval_ms must be positive".to_owned(),
            ));
        }
        if self.confirmation_timeout_ms < self.confirmation_poll_interval_ms {
            return Err(VaultError::Configuration(
                "confirmation_timeout_ms must be at least one poll interval".to_owned(),
            ));
        }
        Ok(())
    }
}

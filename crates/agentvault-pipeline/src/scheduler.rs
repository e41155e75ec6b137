//! Background maintenance tick.
//!
//! All queue and approval state lives in ledger rows, so the scheduler is
//! stateless: each tick re-derives the work from timestamps, and a process
//! restart resumes cleanly.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::pipeline::Pipeline;

pub struct Scheduler;

impl Scheduler {
    /// Spawn the periodic tick. Dropping or aborting the handle stops it;
    /// nothing is lost since the next start re-reads the ledger.
    pub fn spawn(pipeline: Arc<Pipeline>, tick_seconds: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = std::time::Duration::from_secs(tick_seconds);
            let mut interval = tokio::time::interval(period);
            // A stalled tick should not cause a burst of catch-up ticks.
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(tick_seconds, "scheduler started");
            loop {
                interval.tick().await;
                pipeline.tick();
            }
        })
    }
}

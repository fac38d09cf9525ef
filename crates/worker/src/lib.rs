//! Timer-driven queue initiator.
//!
//! Calls [`Orchestrator::tick`] every `interval` until cancelled. Each tick
//! blocks for as long as its invocation runs, so ticks never overlap within
//! one worker; other workers and the API are kept out by the GPU lease.

use std::time::Duration;

use cosmos_orchestrator::{Orchestrator, TickOutcome};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct TickLoop {
    orchestrator: Orchestrator,
    interval: Duration,
}

impl TickLoop {
    pub fn new(orchestrator: Orchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Tick until `cancel` fires. A tick in progress is finished first.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Queue worker started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Queue worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick_once().await;
                }
            }
        }
    }

    /// One tick, logged. Errors are logged and swallowed so the loop keeps
    /// going.
    pub async fn tick_once(&self) -> Option<TickOutcome> {
        match self.orchestrator.tick().await {
            Ok(outcome) => {
                match &outcome {
                    TickOutcome::Executed { run_ids, statuses } => {
                        tracing::info!(?run_ids, ?statuses, "Tick executed runs");
                    }
                    TickOutcome::Busy(reason) => tracing::debug!(?reason, "Tick: GPU busy"),
                    TickOutcome::Idle => tracing::trace!("Tick: nothing pending"),
                }
                Some(outcome)
            }
            Err(e) => {
                tracing::error!(error = %e, "Tick failed");
                None
            }
        }
    }
}

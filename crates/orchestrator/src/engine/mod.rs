//! Queue engine.
//!
//! Holds the caller-driven tick that claims pending runs and hands them to
//! the GPU executor, plus cancellation of queued and running work.

pub mod queue;

pub use queue::{BusyReason, CancelOutcome, KillReport, QueueService, TickOutcome};

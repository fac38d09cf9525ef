//! Cosmos GPU orchestrator.
//!
//! [`Orchestrator`] is the single entry point for callers (the HTTP API and
//! the worker binary). It validates requests, writes prompts and runs, and
//! drives the [`engine::queue::QueueService`], which is the only component
//! that moves runs out of `pending`.

pub mod config;
pub mod engine;
pub mod error;
pub mod facade;

pub use config::{ConfigError, GatewayConfig, OrchestratorConfig};
pub use engine::{BusyReason, CancelOutcome, KillReport, QueueService, TickOutcome};
pub use error::OrchestratorError;
pub use facade::{NewPrompt, NewRun, Orchestrator, RunDetail, SystemStatus};

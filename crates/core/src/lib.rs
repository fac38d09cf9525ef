//! Pure domain logic for the Cosmos GPU orchestrator.
//!
//! Nothing in this crate performs database or network I/O. It holds the
//! shared vocabulary (ids, errors, run lifecycle), the typed execution
//! configuration and outputs documents, and the deterministic pieces of the
//! executor (command building, batch descriptors, artifact reconciliation,
//! exit-code classification) so they can be unit tested in isolation.

pub mod command;
pub mod descriptor;
pub mod error;
pub mod execution_config;
pub mod exit;
pub mod model_type;
pub mod outputs;
pub mod prompt;
pub mod reconcile;
pub mod run_lifecycle;
pub mod types;

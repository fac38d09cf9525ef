use std::sync::Arc;

use cosmos_orchestrator::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via `State<AppState>`.
///
/// Cheaply cloneable: the orchestrator holds a pool and `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub config: Arc<ServerConfig>,
}

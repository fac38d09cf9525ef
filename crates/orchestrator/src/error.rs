use cosmos_core::error::CoreError;
use cosmos_executor::ExecutorError;
use cosmos_remote::GatewayError;

/// Error returned by the queue service and the facade.
///
/// Problems with an invocation never show up here: they are recorded on
/// the runs that carried it. What remains is caller mistakes
/// ([`CoreError`]), an unreachable store, or a GPU host that cannot be
/// asked to stop a container.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Executor error: {0}")]
    Executor(ExecutorError),
}

impl From<ExecutorError> for OrchestratorError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Database(e) => Self::Database(e),
            other => Self::Executor(other),
        }
    }
}

impl OrchestratorError {
    pub fn not_found(entity: &'static str, id: cosmos_core::types::DbId) -> Self {
        Self::Core(CoreError::NotFound { entity, id })
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Core(CoreError::Conflict(message.into()))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Core(CoreError::Validation(message.into()))
    }
}

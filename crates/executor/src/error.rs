/// Failures that prevent the executor from recording an outcome.
///
/// Everything that goes wrong with the invocation itself (transport, exit
/// code, missing artifacts) is written to the affected runs instead and
/// never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid invocation: {0}")]
    Invalid(String),
}

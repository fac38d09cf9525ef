use std::time::Duration;

/// Transport-level failures. A run that hits one of these is failed with
/// whatever stderr was captured; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The command could not be started, or the transport itself failed
    /// (e.g. ssh could not connect).
    #[error("Failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    /// The operation exceeded its deadline and was killed.
    #[error("{operation} timed out after {}s", elapsed.as_secs())]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    /// A file transfer finished unsuccessfully.
    #[error("Transfer {from} -> {to} failed: {message}")]
    Transfer {
        from: String,
        to: String,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

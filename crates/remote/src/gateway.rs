//! The gateway contract shared by every transport.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use cosmos_core::command::RemoteCommand;

use crate::error::GatewayError;

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code (`-1` if it was killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Command execution and file transfer against the GPU host.
///
/// A nonzero exit is *not* an error: it is reported in
/// [`CommandOutput::exit_code`]. Errors are reserved for the transport
/// (spawn failure, timeout, failed transfer).
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Short label for logs (`"local"`, `"ssh://gpu-box"`).
    fn describe(&self) -> String;

    /// Run `cmd` and wait for it to exit, killing it after `timeout`.
    async fn execute_command(
        &self,
        cmd: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, GatewayError>;

    /// Copy a local file or directory tree to `remote`, replacing it.
    async fn upload_path(
        &self,
        local: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Result<(), GatewayError>;

    /// Copy a remote file or directory tree to `local`, replacing it.
    async fn download_path(
        &self,
        remote: &str,
        local: &Path,
        timeout: Duration,
    ) -> Result<(), GatewayError>;
}

//! Gateway for a GPU attached to the current host.
//!
//! Commands are spawned directly (no shell); "remote" paths are plain local
//! paths and transfers are recursive copies.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use cosmos_core::command::RemoteCommand;
use tokio::process::Command;

use crate::error::GatewayError;
use crate::gateway::{CommandOutput, RemoteGateway};
use crate::subprocess;

#[derive(Debug, Clone, Default)]
pub struct LocalGateway;

impl LocalGateway {
    pub fn new() -> Self {
        Self
    }

    fn build_command(cmd: &RemoteCommand) -> Command {
        let mut command = Command::new(cmd.program());
        command.args(cmd.get_args());
        for (key, value) in cmd.get_env() {
            command.env(key, value);
        }
        if let Some(dir) = cmd.working_dir() {
            command.current_dir(dir);
        }
        command
    }
}

#[async_trait]
impl RemoteGateway for LocalGateway {
    fn describe(&self) -> String {
        "local".to_string()
    }

    async fn execute_command(
        &self,
        cmd: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, GatewayError> {
        tracing::debug!(command = %cmd, "Running local command");
        subprocess::run_command(&mut Self::build_command(cmd), timeout).await
    }

    async fn upload_path(
        &self,
        local: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        copy_with_timeout(local.to_path_buf(), PathBuf::from(remote), timeout).await
    }

    async fn download_path(
        &self,
        remote: &str,
        local: &Path,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        copy_with_timeout(PathBuf::from(remote), local.to_path_buf(), timeout).await
    }
}

async fn copy_with_timeout(
    from: PathBuf,
    to: PathBuf,
    timeout: Duration,
) -> Result<(), GatewayError> {
    let (from_label, to_label) = (from.display().to_string(), to.display().to_string());
    let task = tokio::task::spawn_blocking(move || replace_tree(&from, &to));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(GatewayError::Transfer {
            from: from_label,
            to: to_label,
            message: e.to_string(),
        }),
        Ok(Err(join_err)) => Err(GatewayError::Transfer {
            from: from_label,
            to: to_label,
            message: join_err.to_string(),
        }),
        Err(_) => Err(GatewayError::Timeout {
            operation: format!("copy {from_label}"),
            elapsed: timeout,
        }),
    }
}

/// Replace `to` with a copy of `from` (file or directory tree).
pub(crate) fn replace_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    if to.is_dir() {
        std::fs::remove_dir_all(to)?;
    } else if to.exists() {
        std::fs::remove_file(to)?;
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    copy_tree(from, to)
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    if from.is_dir() {
        std::fs::create_dir_all(to)?;
        for entry in std::fs::read_dir(from)? {
            let entry = entry?;
            copy_tree(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        std::fs::copy(from, to).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

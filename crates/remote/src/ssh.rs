//! Gateway for a GPU host reached over SSH.
//!
//! Shells out to the system `ssh` and `scp` binaries in batch mode so no
//! prompt can ever block a tick. Commands are rendered to a quoted shell
//! string only here, at the transport boundary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use cosmos_core::command::{shell_quote, RemoteCommand};
use tokio::process::Command;

use crate::error::GatewayError;
use crate::gateway::{CommandOutput, RemoteGateway};
use crate::subprocess;

/// `ssh` exits with 255 when the connection itself failed.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Connection settings for [`SshGateway`].
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl SshConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: 22,
            identity_file: None,
            connect_timeout_secs: 15,
        }
    }

    /// `user@host` or just `host`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshGateway {
    config: SshConfig,
}

impl SshGateway {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn common_options(&self, cmd: &mut Command) {
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout_secs));
        if let Some(key) = &self.config.identity_file {
            cmd.arg("-i").arg(key);
        }
    }

    /// Build the `ssh` invocation that runs `remote_line` on the host.
    pub fn ssh_command(&self, remote_line: &str) -> Command {
        let mut cmd = Command::new("ssh");
        self.common_options(&mut cmd);
        cmd.arg("-p")
            .arg(self.config.port.to_string())
            .arg(self.config.destination())
            .arg("--")
            .arg(remote_line);
        cmd
    }

    /// Build a recursive `scp` invocation between `from` and `to`.
    pub fn scp_command(&self, from: &str, to: &str) -> Command {
        let mut cmd = Command::new("scp");
        self.common_options(&mut cmd);
        cmd.arg("-r")
            .arg("-P")
            .arg(self.config.port.to_string())
            .arg(from)
            .arg(to);
        cmd
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}:{}", self.config.destination(), path)
    }

    /// Run a shell line remotely and require success.
    async fn run_checked(&self, line: &str, timeout: Duration) -> Result<(), GatewayError> {
        let out = subprocess::run_command(&mut self.ssh_command(line), timeout).await?;
        if out.success() {
            Ok(())
        } else {
            Err(GatewayError::Spawn {
                program: "ssh".to_string(),
                message: format!("`{line}` exited {}: {}", out.exit_code, out.stderr.trim()),
            })
        }
    }

    async fn scp(&self, from: String, to: String, timeout: Duration) -> Result<(), GatewayError> {
        let out = subprocess::run_command(&mut self.scp_command(&from, &to), timeout).await?;
        if out.success() {
            Ok(())
        } else {
            Err(GatewayError::Transfer {
                from,
                to,
                message: format!("scp exited {}: {}", out.exit_code, out.stderr.trim()),
            })
        }
    }
}

#[async_trait]
impl RemoteGateway for SshGateway {
    fn describe(&self) -> String {
        format!("ssh://{}", self.config.destination())
    }

    async fn execute_command(
        &self,
        cmd: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, GatewayError> {
        let line = cmd.to_shell_string();
        tracing::debug!(host = %self.config.host, command = %line, "Running remote command");

        let out = subprocess::run_command(&mut self.ssh_command(&line), timeout).await?;
        if out.exit_code == SSH_TRANSPORT_FAILURE {
            return Err(GatewayError::Spawn {
                program: "ssh".to_string(),
                message: out.stderr.trim().to_string(),
            });
        }
        Ok(out)
    }

    async fn upload_path(
        &self,
        local: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        // scp -r nests into an existing directory, so clear the target first.
        let parent = Path::new(remote)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string());
        let prepare = format!(
            "rm -rf {} && mkdir -p {}",
            shell_quote(remote),
            shell_quote(&parent)
        );
        self.run_checked(&prepare, timeout).await?;

        self.scp(
            local.display().to_string(),
            self.remote_spec(remote),
            timeout,
        )
        .await
    }

    async fn download_path(
        &self,
        remote: &str,
        local: &Path,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        if local.is_dir() {
            tokio::fs::remove_dir_all(local).await?;
        } else if local.exists() {
            tokio::fs::remove_file(local).await?;
        }
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.scp(
            self.remote_spec(remote),
            local.display().to_string(),
            timeout,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

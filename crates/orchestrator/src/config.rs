//! Orchestrator configuration loaded from environment variables.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cosmos_executor::ExecutorConfig;
use cosmos_remote::{LocalGateway, RemoteGateway, SshConfig, SshGateway};

/// Default number of runs one invocation may carry.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 8;
/// Default interval between worker ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// How the GPU host is reached.
#[derive(Debug, Clone)]
pub enum GatewayConfig {
    /// The GPU is on this machine.
    Local,
    Ssh(SshConfig),
}

impl GatewayConfig {
    pub fn build(&self) -> Arc<dyn RemoteGateway> {
        match self {
            Self::Local => Arc::new(LocalGateway),
            Self::Ssh(ssh) => Arc::new(SshGateway::new(ssh.clone())),
        }
    }
}

/// Everything needed to build an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub database_url: String,
    pub gateway: GatewayConfig,
    pub executor: ExecutorConfig,
    pub max_batch_size: usize,
    pub tick_interval: Duration,
}

impl OrchestratorConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                          | Default                     |
    /// |----------------------------------|-----------------------------|
    /// | `DATABASE_URL`                   | required                    |
    /// | `COSMOS_GATEWAY`                 | `local` (`local` or `ssh`)  |
    /// | `COSMOS_SSH_HOST`                | required when `ssh`         |
    /// | `COSMOS_SSH_USER`                | none                        |
    /// | `COSMOS_SSH_PORT`                | `22`                        |
    /// | `COSMOS_SSH_KEY`                 | none                        |
    /// | `COSMOS_REMOTE_ROOT`             | `/tmp/cosmos/remote`        |
    /// | `COSMOS_OUTPUTS_ROOT`            | `./outputs`                 |
    /// | `COSMOS_STAGING_ROOT`            | `/tmp/cosmos/staging`       |
    /// | `COSMOS_DOCKER_IMAGE`            | `cosmos-transfer:latest`    |
    /// | `COSMOS_DOCKER_BIN`              | `docker`                    |
    /// | `COSMOS_CONTAINER_LABEL`         | `cosmos.gpu`                |
    /// | `COSMOS_INVOCATION_TIMEOUT_SECS` | `3600`                      |
    /// | `COSMOS_TRANSFER_TIMEOUT_SECS`   | `600`                       |
    /// | `COSMOS_GRACE_PERIOD_SECS`       | `10`                        |
    /// | `COSMOS_MAX_BATCH_SIZE`          | `8`                         |
    /// | `COSMOS_TICK_INTERVAL_SECS`      | `2`                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let database_url = env.required("DATABASE_URL")?;

        let gateway = match env.get("COSMOS_GATEWAY").as_deref().unwrap_or("local") {
            "local" => GatewayConfig::Local,
            "ssh" => {
                let mut ssh = SshConfig::new(env.required("COSMOS_SSH_HOST")?);
                ssh.user = env.get("COSMOS_SSH_USER");
                ssh.port = env.parse("COSMOS_SSH_PORT", 22)?;
                ssh.identity_file = env.get("COSMOS_SSH_KEY").map(PathBuf::from);
                GatewayConfig::Ssh(ssh)
            }
            other => {
                return Err(ConfigError::Invalid {
                    name: "COSMOS_GATEWAY",
                    value: other.to_string(),
                    reason: "expected `local` or `ssh`".to_string(),
                })
            }
        };

        let mut executor = ExecutorConfig::new(
            env.get("COSMOS_REMOTE_ROOT")
                .unwrap_or_else(|| "/tmp/cosmos/remote".into()),
            env.get("COSMOS_OUTPUTS_ROOT")
                .unwrap_or_else(|| "./outputs".into()),
            env.get("COSMOS_STAGING_ROOT")
                .unwrap_or_else(|| "/tmp/cosmos/staging".into()),
        );
        if let Some(image) = env.get("COSMOS_DOCKER_IMAGE") {
            executor.docker_image = image;
        }
        if let Some(bin) = env.get("COSMOS_DOCKER_BIN") {
            executor.docker_bin = bin;
        }
        if let Some(label) = env.get("COSMOS_CONTAINER_LABEL") {
            executor.container_label = label;
        }
        executor.invocation_timeout = env.secs(
            "COSMOS_INVOCATION_TIMEOUT_SECS",
            executor.invocation_timeout,
        )?;
        executor.transfer_timeout =
            env.secs("COSMOS_TRANSFER_TIMEOUT_SECS", executor.transfer_timeout)?;
        executor.grace_period = env.secs("COSMOS_GRACE_PERIOD_SECS", executor.grace_period)?;

        let max_batch_size = env.parse("COSMOS_MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE)?;
        if max_batch_size == 0 {
            return Err(ConfigError::Invalid {
                name: "COSMOS_MAX_BATCH_SIZE",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let tick_interval = env.secs("COSMOS_TICK_INTERVAL_SECS", DEFAULT_TICK_INTERVAL)?;

        Ok(Self {
            database_url,
            gateway,
            executor,
            max_batch_size,
            tick_interval,
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn secs(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(name, default.as_secs()).map(Duration::from_secs)
    }
}

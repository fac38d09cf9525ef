use std::path::PathBuf;
use std::time::Duration;

/// Default upper bound for one model invocation (1 hour).
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(3600);
/// Default upper bound for an upload or download (10 minutes).
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);
/// Default time a container gets to exit after SIGTERM.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);
/// Default upper bound for short control commands (`docker ps`, `docker kill`).
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_DOCKER_BIN: &str = "docker";
pub const DEFAULT_DOCKER_IMAGE: &str = "cosmos-transfer:latest";
pub const DEFAULT_CONTAINER_LABEL: &str = "cosmos.gpu";

/// Executor settings. Paths under `remote_root` live on the GPU host; the
/// others are local to the orchestrator process.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Root of `inputs/` and `outputs/` on the GPU host.
    pub remote_root: String,
    /// Local root of per-run artifact directories (`run_<id>/`).
    pub outputs_root: PathBuf,
    /// Local scratch space for descriptors and downloads.
    pub staging_root: PathBuf,
    pub docker_bin: String,
    pub docker_image: String,
    /// Label attached to every container so any process can find it.
    pub container_label: String,
    pub invocation_timeout: Duration,
    pub transfer_timeout: Duration,
    pub grace_period: Duration,
    pub control_timeout: Duration,
}

impl ExecutorConfig {
    /// Config with default binaries, label and timeouts.
    pub fn new(
        remote_root: impl Into<String>,
        outputs_root: impl Into<PathBuf>,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote_root: remote_root.into().trim_end_matches('/').to_string(),
            outputs_root: outputs_root.into(),
            staging_root: staging_root.into(),
            docker_bin: DEFAULT_DOCKER_BIN.to_string(),
            docker_image: DEFAULT_DOCKER_IMAGE.to_string(),
            container_label: DEFAULT_CONTAINER_LABEL.to_string(),
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
        }
    }
}

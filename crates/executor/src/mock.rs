//! Scripted stand-in for a GPU host.
//!
//! Remote paths are real paths on the local filesystem (point
//! `remote_root` at a temporary directory). `docker run` is simulated: the
//! fake reads the invocation's `spec.json` and `batch.jsonl` and writes what
//! the model would, according to the next queued [`Behavior`].

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cosmos_core::command::RemoteCommand;
use cosmos_core::descriptor::{DescriptorRecord, InvocationSpec};
use cosmos_core::exit::{EXIT_SIGKILL, EXIT_SIGTERM};
use cosmos_remote::{CommandOutput, GatewayError, LocalGateway, RemoteGateway};
use tokio::sync::watch;

use crate::config::ExecutorConfig;

/// What the next `docker run` does.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// One `output_<index>.mp4` per record, `run.log`, exit 0.
    Succeed,
    /// Artifacts only for the listed record indices, named
    /// `output_<index>_run_<id>.mp4`; exit 0.
    SucceedPartially { produce: Vec<usize> },
    /// Exit nonzero without producing anything.
    Fail { exit_code: i32, stderr: String },
    /// Artifacts and exit 0, but `status.json` reports an error.
    ErrorMarker { message: String },
    /// Stay alive until `docker kill` (or the command timeout).
    HangUntilKilled,
}

/// One simulated `docker run`.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub name: String,
    pub spec: InvocationSpec,
    pub records: Vec<DescriptorRecord>,
}

/// A `docker kill` the fake received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillRecord {
    pub name: String,
    pub signal: Option<String>,
}

#[derive(Default)]
struct State {
    behaviors: VecDeque<Behavior>,
    live: HashMap<String, watch::Sender<Option<i32>>>,
    external: Vec<String>,
    invocations: Vec<Invocation>,
    kills: Vec<KillRecord>,
    commands: Vec<RemoteCommand>,
    ignore_term: bool,
    fail_uploads: bool,
}

/// In-memory GPU host for executor, queue and API tests.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<State>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the behavior of the next `docker run`. Unqueued runs succeed.
    pub fn push_behavior(&self, behavior: Behavior) {
        self.state.lock().unwrap().behaviors.push_back(behavior);
    }

    /// Make containers survive SIGTERM so only SIGKILL stops them.
    pub fn set_ignore_term(&self, ignore: bool) {
        self.state.lock().unwrap().ignore_term = ignore;
    }

    /// Make every upload fail.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.state.lock().unwrap().fail_uploads = fail;
    }

    /// Pretend a labeled container started by someone else is running.
    pub fn add_external_container(&self, name: &str) {
        self.state.lock().unwrap().external.push(name.to_string());
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().unwrap().invocations.clone()
    }

    pub fn kills(&self) -> Vec<KillRecord> {
        self.state.lock().unwrap().kills.clone()
    }

    pub fn commands(&self) -> Vec<RemoteCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Names of containers currently "running".
    pub fn live_containers(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.live.keys().cloned().collect();
        names.extend(state.external.iter().cloned());
        names.sort();
        names
    }

    /// Wait until `name` shows up as a running container.
    pub async fn wait_until_live(&self, name: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.live_containers().iter().any(|n| n == name) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    fn docker(&self, cmd: &RemoteCommand) -> CommandOutput {
        let args = cmd.get_args();
        match args.first().map(String::as_str) {
            Some("ps") => ok(self.live_containers().join("\n")),
            Some("kill") => self.docker_kill(&args[1..]),
            other => failed(125, format!("fake docker: unsupported subcommand {other:?}")),
        }
    }

    fn docker_kill(&self, args: &[String]) -> CommandOutput {
        let (signal, name) = match args {
            [flag, signal, name] if flag == "--signal" => (Some(signal.clone()), name.clone()),
            [name] => (None, name.clone()),
            _ => return failed(125, "fake docker: bad kill arguments".to_string()),
        };

        let mut state = self.state.lock().unwrap();
        state.kills.push(KillRecord {
            name: name.clone(),
            signal: signal.clone(),
        });

        if let Some(pos) = state.external.iter().position(|n| *n == name) {
            state.external.remove(pos);
            return ok(name);
        }

        let is_term = signal.as_deref() == Some("TERM");
        if is_term && state.ignore_term {
            return ok(name);
        }
        match state.live.remove(&name) {
            Some(stop) => {
                let code = if is_term { EXIT_SIGTERM } else { EXIT_SIGKILL };
                let _ = stop.send(Some(code));
                ok(name)
            }
            None => failed(1, format!("Error response from daemon: No such container: {name}")),
        }
    }

    async fn docker_run(
        &self,
        cmd: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, GatewayError> {
        let started = Instant::now();
        let (Some(name), Some(spec_path)) = (arg_after(cmd, "--name"), arg_after(cmd, "--spec"))
        else {
            return Ok(failed(125, "fake docker: run needs --name and --spec".to_string()));
        };

        let spec: InvocationSpec = read_json(Path::new(&spec_path))?;
        let (batch_path, output_dir) = match &spec {
            InvocationSpec::Inference {
                batch_input_path,
                output_dir,
                ..
            }
            | InvocationSpec::Upscale {
                batch_input_path,
                output_dir,
                ..
            } => (batch_input_path.clone(), PathBuf::from(output_dir)),
        };
        let records: Vec<DescriptorRecord> = std::fs::read_to_string(&batch_path)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| serde_json::from_str::<DescriptorRecord>(line))
            .collect::<Result<_, _>>()
            .map_err(std::io::Error::other)?;

        let (behavior, stop_rx) = {
            let mut state = self.state.lock().unwrap();
            state.invocations.push(Invocation {
                name: name.clone(),
                spec: spec.clone(),
                records: records.clone(),
            });
            let behavior = state.behaviors.pop_front().unwrap_or(Behavior::Succeed);
            let (tx, rx) = watch::channel(None);
            state.live.insert(name.clone(), tx);
            (behavior, rx)
        };

        let result = self
            .simulate(&name, behavior, &records, &output_dir, stop_rx, timeout)
            .await;
        self.state.lock().unwrap().live.remove(&name);

        result.map(|(exit_code, stdout, stderr)| CommandOutput {
            exit_code,
            stdout,
            stderr,
            duration: started.elapsed(),
        })
    }

    async fn simulate(
        &self,
        name: &str,
        behavior: Behavior,
        records: &[DescriptorRecord],
        output_dir: &Path,
        mut stop_rx: watch::Receiver<Option<i32>>,
        timeout: Duration,
    ) -> Result<(i32, String, String), GatewayError> {
        std::fs::create_dir_all(output_dir)?;
        let log = format!("fake model run {name}: {} record(s)\n", records.len());

        match behavior {
            Behavior::Succeed => {
                for record in records {
                    write_artifact(output_dir, &format!("output_{}.mp4", record.index))?;
                }
                std::fs::write(output_dir.join("run.log"), &log)?;
                Ok((0, "done".to_string(), String::new()))
            }
            Behavior::SucceedPartially { produce } => {
                for record in records.iter().filter(|r| produce.contains(&r.index)) {
                    write_artifact(
                        output_dir,
                        &format!("output_{}_{}.mp4", record.index, record.output_name),
                    )?;
                }
                std::fs::write(output_dir.join("run.log"), &log)?;
                Ok((0, "done".to_string(), String::new()))
            }
            Behavior::Fail { exit_code, stderr } => Ok((exit_code, String::new(), stderr)),
            Behavior::ErrorMarker { message } => {
                for record in records {
                    write_artifact(output_dir, &format!("output_{}.mp4", record.index))?;
                }
                std::fs::write(
                    output_dir.join("status.json"),
                    serde_json::json!({"status": "error", "message": message}).to_string(),
                )?;
                Ok((0, String::new(), String::new()))
            }
            Behavior::HangUntilKilled => {
                match tokio::time::timeout(timeout, stop_rx.wait_for(Option::is_some)).await {
                    Ok(Ok(code)) => {
                        let code = code.unwrap_or(EXIT_SIGKILL);
                        std::fs::write(output_dir.join("run.log"), format!("{log}terminated\n"))?;
                        Ok((code, String::new(), "terminated".to_string()))
                    }
                    Ok(Err(_closed)) => Ok((EXIT_SIGKILL, String::new(), String::new())),
                    Err(_elapsed) => Err(GatewayError::Timeout {
                        operation: "docker".to_string(),
                        elapsed: timeout,
                    }),
                }
            }
        }
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    async fn execute_command(
        &self,
        cmd: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, GatewayError> {
        self.state.lock().unwrap().commands.push(cmd.clone());

        match cmd.program() {
            "docker" if cmd.get_args().first().map(String::as_str) == Some("run") => {
                self.docker_run(cmd, timeout).await
            }
            "docker" => Ok(self.docker(cmd)),
            "mkdir" => {
                for dir in cmd.get_args().iter().filter(|a| !a.starts_with('-')) {
                    std::fs::create_dir_all(dir)?;
                }
                Ok(ok(String::new()))
            }
            "rm" => {
                for path in cmd.get_args().iter().filter(|a| !a.starts_with('-')) {
                    let _ = std::fs::remove_dir_all(path);
                }
                Ok(ok(String::new()))
            }
            other => Ok(failed(127, format!("fake host: {other}: command not found"))),
        }
    }

    async fn upload_path(
        &self,
        local: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        if self.state.lock().unwrap().fail_uploads {
            return Err(GatewayError::Transfer {
                from: local.display().to_string(),
                to: remote.to_string(),
                message: "connection reset".to_string(),
            });
        }
        LocalGateway.upload_path(local, remote, timeout).await
    }

    async fn download_path(
        &self,
        remote: &str,
        local: &Path,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        LocalGateway.download_path(remote, local, timeout).await
    }
}

/// Executor config rooted in `root` (`remote/`, `outputs/`, `staging/`),
/// with short grace and control timeouts.
pub fn test_config(root: &Path) -> ExecutorConfig {
    let mut config = ExecutorConfig::new(
        root.join("remote").display().to_string(),
        root.join("outputs"),
        root.join("staging"),
    );
    config.grace_period = Duration::from_millis(300);
    config.control_timeout = Duration::from_secs(5);
    config.transfer_timeout = Duration::from_secs(10);
    config.invocation_timeout = Duration::from_secs(10);
    config
}

fn ok(stdout: String) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout,
        stderr: String::new(),
        duration: Duration::ZERO,
    }
}

fn failed(exit_code: i32, stderr: String) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: String::new(),
        stderr,
        duration: Duration::ZERO,
    }
}

fn arg_after(cmd: &RemoteCommand, flag: &str) -> Option<String> {
    let args = cmd.get_args();
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, GatewayError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| GatewayError::Io(std::io::Error::other(e)))
}

fn write_artifact(dir: &Path, name: &str) -> std::io::Result<()> {
    std::fs::write(dir.join(name), format!("fake video {name}"))
}

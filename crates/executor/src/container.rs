//! Container naming and the docker command lines the executor issues.

use cosmos_core::command::RemoteCommand;
use cosmos_core::descriptor::{InvocationLayout, SPEC_FILE_NAME};
use cosmos_core::types::DbId;
use cosmos_db::models::run::Run;

use crate::config::ExecutorConfig;

/// Label carrying the invocation name, next to the configured GPU label.
pub const INVOCATION_LABEL: &str = "cosmos.invocation";

/// Container name for a single-run invocation.
pub fn single_invocation_name(run_id: DbId) -> String {
    format!("cosmos-run-{run_id}")
}

/// Container name for a batched invocation.
pub fn batch_invocation_name(batch_id: uuid::Uuid) -> String {
    format!("cosmos-batch-{batch_id}")
}

/// The container a claimed run executes in.
pub fn invocation_name_for(run: &Run) -> String {
    match run.batch_id {
        Some(batch_id) => batch_invocation_name(batch_id),
        None => single_invocation_name(run.id),
    }
}

/// Remote input/output directories for an invocation.
pub fn layout(config: &ExecutorConfig, invocation: &str) -> InvocationLayout {
    InvocationLayout {
        input_dir: format!("{}/inputs/{invocation}", config.remote_root),
        output_dir: format!("{}/outputs/{invocation}", config.remote_root),
    }
}

/// `docker run` for one invocation. Runs in the foreground; the exit code
/// of the command is the exit code of the model process.
pub fn run_command(config: &ExecutorConfig, invocation: &str, layout: &InvocationLayout) -> RemoteCommand {
    RemoteCommand::new(&config.docker_bin)
        .args(["run", "--rm"])
        .option("--name", invocation)
        .option("--label", &config.container_label)
        .option("--label", format!("{INVOCATION_LABEL}={invocation}"))
        .option("--gpus", "all")
        .arg("--ipc=host")
        .option("-v", format!("{0}:{0}", config.remote_root))
        .arg(&config.docker_image)
        .option("--spec", format!("{}/{SPEC_FILE_NAME}", layout.input_dir))
}

/// `docker ps` listing the names of live labeled containers.
pub fn ps_command(config: &ExecutorConfig) -> RemoteCommand {
    RemoteCommand::new(&config.docker_bin)
        .arg("ps")
        .option("--filter", format!("label={}", config.container_label))
        .option("--format", "{{.Names}}")
}

/// `docker kill`, with an explicit signal or the default SIGKILL.
pub fn kill_command(config: &ExecutorConfig, invocation: &str, signal: Option<&str>) -> RemoteCommand {
    let cmd = RemoteCommand::new(&config.docker_bin).arg("kill");
    let cmd = match signal {
        Some(signal) => cmd.option("--signal", signal),
        None => cmd,
    };
    cmd.arg(invocation)
}

/// `mkdir -p` on the GPU host.
pub fn mkdir_command(dir: &str) -> RemoteCommand {
    RemoteCommand::new("mkdir").args(["-p", dir])
}

/// `rm -rf` on the GPU host.
pub fn remove_command(dirs: &[&str]) -> RemoteCommand {
    RemoteCommand::new("rm").arg("-rf").args(dirs.iter().copied())
}

/// Parse `docker ps --format {{.Names}}` output.
pub fn parse_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExecutorConfig {
        ExecutorConfig::new("/srv/cosmos", "/data/outputs", "/tmp/staging")
    }

    #[test]
    fn names_identify_runs_and_batches() {
        assert_eq!(single_invocation_name(42), "cosmos-run-42");
        let id = uuid::Uuid::nil();
        assert_eq!(
            batch_invocation_name(id),
            "cosmos-batch-00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn layout_is_under_remote_root() {
        let l = layout(&config(), "cosmos-run-7");
        assert_eq!(l.input_dir, "/srv/cosmos/inputs/cosmos-run-7");
        assert_eq!(l.output_dir, "/srv/cosmos/outputs/cosmos-run-7");
    }

    #[test]
    fn run_command_labels_and_points_at_spec() {
        let cfg = config();
        let l = layout(&cfg, "cosmos-run-7");
        let cmd = run_command(&cfg, "cosmos-run-7", &l);
        let args = cmd.get_args();

        assert_eq!(cmd.program(), "docker");
        assert_eq!(&args[..2], ["run", "--rm"]);
        assert!(args.windows(2).any(|w| w == ["--name", "cosmos-run-7"]));
        assert!(args.windows(2).any(|w| w == ["--label", "cosmos.gpu"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["--label", "cosmos.invocation=cosmos-run-7"]));
        assert_eq!(
            &args[args.len() - 2..],
            ["--spec", "/srv/cosmos/inputs/cosmos-run-7/spec.json"]
        );
    }

    #[test]
    fn kill_command_with_and_without_signal() {
        let cfg = config();
        assert_eq!(
            kill_command(&cfg, "cosmos-run-1", Some("TERM")).get_args(),
            ["kill", "--signal", "TERM", "cosmos-run-1"]
        );
        assert_eq!(kill_command(&cfg, "cosmos-run-1", None).get_args(), ["kill", "cosmos-run-1"]);
    }

    #[test]
    fn ps_output_is_split_into_names() {
        assert_eq!(
            parse_names("cosmos-run-1\n\n  cosmos-batch-x \n"),
            vec!["cosmos-run-1", "cosmos-batch-x"]
        );
        assert!(parse_names("").is_empty());
    }
}

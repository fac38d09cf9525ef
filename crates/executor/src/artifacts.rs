//! Local artifact layout and the files derived from an output directory.
//!
//! Every run owns `<outputs_root>/run_<id>/` with an `outputs/` directory
//! for its artifacts and `logs/run.log`.

use std::path::{Path, PathBuf};

use cosmos_core::descriptor::output_name;
use cosmos_core::exit::tail;
use cosmos_core::outputs::OutputFile;
use cosmos_core::reconcile::is_artifact;
use cosmos_core::types::DbId;
use serde::Deserialize;

/// Log file the model writes into its output directory.
pub const REMOTE_LOG_NAME: &str = "run.log";
/// Optional status marker in the output directory.
pub const STATUS_MARKER_NAME: &str = "status.json";

const LOG_STREAM_TAIL_CHARS: usize = 8_000;

/// Local directories of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub root: PathBuf,
    pub outputs_dir: PathBuf,
    pub log_path: PathBuf,
}

impl RunPaths {
    pub fn new(outputs_root: &Path, run_id: DbId) -> Self {
        let root = run_dir(outputs_root, run_id);
        Self {
            outputs_dir: root.join("outputs"),
            log_path: root.join("logs").join(REMOTE_LOG_NAME),
            root,
        }
    }

    /// Create `outputs/` and `logs/`.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.outputs_dir)?;
        if let Some(logs) = self.log_path.parent() {
            std::fs::create_dir_all(logs)?;
        }
        Ok(())
    }

    pub fn log_path_string(&self) -> String {
        self.log_path.display().to_string()
    }
}

/// `<outputs_root>/run_<id>`.
pub fn run_dir(outputs_root: &Path, run_id: DbId) -> PathBuf {
    outputs_root.join(output_name(run_id))
}

/// Delete a run's artifact directory. Missing directories are fine.
pub fn remove_run_dir(outputs_root: &Path, run_id: DbId) -> std::io::Result<()> {
    match std::fs::remove_dir_all(run_dir(outputs_root, run_id)) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// File names (not paths) of every regular file directly inside `dir`.
pub fn list_file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Artifact file names directly inside `dir`; empty when `dir` is missing.
pub fn list_artifacts(dir: &Path) -> Vec<String> {
    list_file_names(dir)
        .map(|names| names.into_iter().filter(|n| is_artifact(n)).collect())
        .unwrap_or_default()
}

/// Manifest of every file in `dir`, sorted by name.
pub fn manifest(dir: &Path) -> std::io::Result<Vec<OutputFile>> {
    let mut files = Vec::new();
    for name in list_file_names(dir)? {
        let path = dir.join(&name);
        let size_bytes = std::fs::metadata(&path)?.len();
        files.push(OutputFile {
            name,
            path: path.display().to_string(),
            size_bytes,
        });
    }
    Ok(files)
}

/// Contents of `status.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusMarker {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusMarker {
    pub fn is_error(&self) -> bool {
        self.status.eq_ignore_ascii_case("error")
    }
}

/// Read `status.json` from a downloaded output directory. A missing or
/// malformed marker is treated as absent.
pub fn read_status_marker(dir: &Path) -> Option<StatusMarker> {
    let raw = std::fs::read_to_string(dir.join(STATUS_MARKER_NAME)).ok()?;
    match serde_json::from_str(&raw) {
        Ok(marker) => Some(marker),
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Ignoring malformed status marker");
            None
        }
    }
}

/// Inputs for a synthesized log.
#[derive(Debug, Clone, Copy)]
pub struct LogContext<'a> {
    pub invocation: &'a str,
    pub exit_code: Option<i32>,
    pub reason: Option<&'a str>,
    pub stdout: &'a str,
    pub stderr: &'a str,
}

/// Minimal log for invocations that never produced their own.
pub fn synthesize_log(ctx: &LogContext<'_>) -> String {
    let mut log = format!(
        "[{}] invocation {}\n",
        chrono::Utc::now().to_rfc3339(),
        ctx.invocation
    );
    match ctx.exit_code {
        Some(code) => log.push_str(&format!("exit code: {code}\n")),
        None => log.push_str("exit code: (process did not exit normally)\n"),
    }
    if let Some(reason) = ctx.reason {
        log.push_str(&format!("reason: {reason}\n"));
    }
    log.push_str("\n--- stderr ---\n");
    log.push_str(&tail(ctx.stderr, LOG_STREAM_TAIL_CHARS));
    log.push_str("\n--- stdout (tail) ---\n");
    log.push_str(&tail(ctx.stdout, LOG_STREAM_TAIL_CHARS));
    log.push('\n');
    log
}

//! Running claimed runs on the GPU.
//!
//! One call to [`GpuExecutor::execute_batch`] is one container invocation:
//! stage, upload, run (awaited until the process exits), download,
//! reconcile, record. Problems with the invocation are written onto the
//! runs it carried; only store failures are returned as errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cosmos_core::command::RemoteCommand;
use cosmos_core::descriptor::{
    build_inference_descriptor, build_upscale_descriptor, BatchDescriptor, InferenceEntry,
    InvocationLayout, UpscaleEntry,
};
use cosmos_core::error::CoreError;
use cosmos_core::execution_config::ExecutionConfig;
use cosmos_core::exit::{classify_exit, tail, ExitDisposition, FailureKind};
use cosmos_core::model_type::ModelType;
use cosmos_core::outputs::{OutputStatus, OutputSummary, RunOutputs};
use cosmos_core::prompt::PromptInputs;
use cosmos_core::reconcile::{self, MatchStrategy};
use cosmos_core::types::DbId;
use cosmos_db::models::progress::ProgressStage;
use cosmos_db::models::prompt::Prompt;
use cosmos_db::models::run::Run;
use cosmos_db::models::status::RunStatus;
use cosmos_db::repositories::{ProgressRepo, RunRepo};
use cosmos_remote::{GatewayError, RemoteGateway};
use sqlx::PgPool;

use crate::artifacts::{
    list_artifacts, manifest, read_status_marker, synthesize_log, LogContext, RunPaths,
    StatusMarker, REMOTE_LOG_NAME,
};
use crate::config::ExecutorConfig;
use crate::container;
use crate::error::ExecutorError;
use crate::staging;

/// How often liveness is probed while waiting out the grace period.
const TERMINATION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Characters of stderr kept in `error_details`.
const ERROR_STREAM_TAIL_CHARS: usize = 4_000;

/// The recorded result of one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: DbId,
    pub status: RunStatus,
    pub outputs: RunOutputs,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
}

/// What [`GpuExecutor::terminate`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// No such container was alive.
    NotRunning,
    /// The container exited within the grace period after SIGTERM.
    Graceful,
    /// The container had to be killed.
    Forced,
}

#[derive(Debug, Clone)]
struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_gateway(err: &GatewayError, context: &str) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else {
            FailureKind::Transport
        };
        Self::new(kind, format!("{context}: {err}"))
    }
}

/// How an invocation ended, before per-run reconciliation.
enum InvocationEnd {
    /// The listed runs were cancelled before the container started.
    CancelledBeforeStart(Vec<DbId>),
    /// The invocation could not be carried out.
    Aborted {
        failure: Failure,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The container ran and exited.
    Exited {
        exit_code: i32,
        stdout: String,
        stderr: String,
        output_dir: Option<PathBuf>,
    },
}

impl InvocationEnd {
    fn aborted(failure: Failure) -> Self {
        Self::Aborted {
            failure,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Per-run verdict before it is written.
enum Verdict {
    Completed { artifact: PathBuf },
    Cancelled,
    Failed(Failure),
}

/// Log attached to every run of an invocation.
enum SharedLog {
    Downloaded(PathBuf),
    Synthesized(String),
}

/// Invocation-wide facts needed to record each run.
struct Recording<'a> {
    invocation: &'a str,
    exit_code: Option<i32>,
    stderr: &'a str,
    duration_secs: f64,
    batched: bool,
    log: SharedLog,
}

/// Executes runs on the GPU host reached through a [`RemoteGateway`].
#[derive(Clone)]
pub struct GpuExecutor {
    pool: PgPool,
    gateway: Arc<dyn RemoteGateway>,
    config: ExecutorConfig,
}

impl GpuExecutor {
    pub fn new(pool: PgPool, gateway: Arc<dyn RemoteGateway>, config: ExecutorConfig) -> Self {
        Self {
            pool,
            gateway,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn RemoteGateway> {
        &self.gateway
    }

    // -----------------------------------------------------------------------
    // Probing and termination
    // -----------------------------------------------------------------------

    /// Names of live labeled containers on the GPU host.
    pub async fn active_invocations(&self) -> Result<Vec<String>, GatewayError> {
        let out = self
            .gateway
            .execute_command(&container::ps_command(&self.config), self.config.control_timeout)
            .await?;
        if !out.success() {
            return Err(GatewayError::Spawn {
                program: format!("{} ps", self.config.docker_bin),
                message: format!("exited {}: {}", out.exit_code, out.stderr.trim()),
            });
        }
        Ok(container::parse_names(&out.stdout))
    }

    /// Stop an invocation: SIGTERM, wait up to the grace period, then SIGKILL.
    pub async fn terminate(&self, invocation: &str) -> Result<Termination, GatewayError> {
        if !self.is_alive(invocation).await? {
            return Ok(Termination::NotRunning);
        }

        tracing::info!(invocation, "Sending SIGTERM to invocation");
        let term = container::kill_command(&self.config, invocation, Some("TERM"));
        let out = self
            .gateway
            .execute_command(&term, self.config.control_timeout)
            .await?;
        if !out.success() {
            tracing::debug!(invocation, stderr = %out.stderr.trim(), "docker kill --signal TERM failed");
        }

        let deadline = Instant::now() + self.config.grace_period;
        loop {
            if !self.is_alive(invocation).await? {
                tracing::info!(invocation, "Invocation stopped after SIGTERM");
                return Ok(Termination::Graceful);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(TERMINATION_POLL_INTERVAL.min(deadline - now)).await;
        }

        tracing::warn!(invocation, "Invocation ignored SIGTERM; killing");
        let kill = container::kill_command(&self.config, invocation, None);
        self.gateway
            .execute_command(&kill, self.config.control_timeout)
            .await?;
        Ok(Termination::Forced)
    }

    async fn is_alive(&self, invocation: &str) -> Result<bool, GatewayError> {
        Ok(self
            .active_invocations()
            .await?
            .iter()
            .any(|name| name == invocation))
    }

    async fn force_kill(&self, invocation: &str) {
        let kill = container::kill_command(&self.config, invocation, None);
        match self
            .gateway
            .execute_command(&kill, self.config.control_timeout)
            .await
        {
            Ok(out) if out.success() => tracing::warn!(invocation, "Force-killed invocation"),
            Ok(_) => {}
            Err(e) => tracing::warn!(invocation, error = %e, "Could not force-kill invocation"),
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Execute one claimed run and record its outcome.
    pub async fn execute_single(&self, run: &Run, prompt: &Prompt) -> Result<RunOutcome, ExecutorError> {
        let mut outcomes = self
            .execute_batch(std::slice::from_ref(run), std::slice::from_ref(prompt))
            .await?;
        outcomes
            .pop()
            .ok_or_else(|| ExecutorError::Invalid(format!("no outcome recorded for run {}", run.id)))
    }

    /// Execute claimed runs as one invocation and record every outcome.
    ///
    /// `runs` must be in claim order; that order becomes the descriptor
    /// order and the positional reconciliation order. `prompts` holds the
    /// prompt of every run (any order, duplicates allowed). Returns one
    /// outcome per run, in the same order.
    pub async fn execute_batch(
        &self,
        runs: &[Run],
        prompts: &[Prompt],
    ) -> Result<Vec<RunOutcome>, ExecutorError> {
        let Some(first) = runs.first() else {
            return Ok(Vec::new());
        };

        let invocation = if runs.len() == 1 || first.batch_id.is_some() {
            container::invocation_name_for(first)
        } else {
            container::batch_invocation_name(uuid::Uuid::now_v7())
        };
        let layout = container::layout(&self.config, &invocation);
        let staging_dir = self.config.staging_root.join(&invocation);
        let started = Instant::now();

        let run_ids: Vec<DbId> = runs.iter().map(|r| r.id).collect();
        tracing::info!(
            invocation = %invocation,
            run_ids = ?run_ids,
            gateway = %self.gateway.describe(),
            "Starting invocation"
        );

        let mut remaining = runs.to_vec();
        let mut outcomes = Vec::with_capacity(runs.len());
        loop {
            let end = self
                .invoke(&remaining, prompts, &invocation, &layout, &staging_dir)
                .await;

            // Cancelled runs leave the batch; the rest are restaged without them.
            if let InvocationEnd::CancelledBeforeStart(cancelled) = &end {
                if cancelled.len() < remaining.len() {
                    let (dropped, kept): (Vec<Run>, Vec<Run>) = remaining
                        .into_iter()
                        .partition(|r| cancelled.contains(&r.id));
                    tracing::info!(
                        invocation = %invocation,
                        cancelled = ?cancelled,
                        remaining = kept.len(),
                        "Dropping cancelled runs before start"
                    );
                    let end = InvocationEnd::CancelledBeforeStart(cancelled.clone());
                    let recorded = self.finalize(&dropped, &invocation, end, started).await;
                    self.cleanup(&invocation, &layout, &staging_dir).await;
                    outcomes.extend(recorded?);
                    remaining = kept;
                    continue;
                }
            }

            let recorded = self.finalize(&remaining, &invocation, end, started).await;
            self.cleanup(&invocation, &layout, &staging_dir).await;
            outcomes.extend(recorded?);
            break;
        }

        outcomes.sort_by_key(|o| runs.iter().position(|r| r.id == o.run_id));
        Ok(outcomes)
    }

    async fn invoke(
        &self,
        runs: &[Run],
        prompts: &[Prompt],
        invocation: &str,
        layout: &InvocationLayout,
        staging_dir: &Path,
    ) -> InvocationEnd {
        let descriptor = match self.prepare(runs, prompts, layout).await {
            Ok(descriptor) => descriptor,
            Err(message) => {
                return InvocationEnd::aborted(Failure::new(FailureKind::Execution, message))
            }
        };

        let input_local = staging_dir.join("input");
        if let Err(e) = stage(descriptor, input_local.clone()).await {
            return InvocationEnd::aborted(Failure::new(
                FailureKind::Transport,
                format!("failed to stage invocation input: {e}"),
            ));
        }

        self.progress(runs, ProgressStage::Uploading, 0, Some("uploading inputs"))
            .await;
        if let Err(e) = self
            .gateway
            .upload_path(&input_local, &layout.input_dir, self.config.transfer_timeout)
            .await
        {
            return InvocationEnd::aborted(Failure::from_gateway(&e, "upload failed"));
        }
        if let Err(failure) = self
            .control(&container::mkdir_command(&layout.output_dir), "create output directory")
            .await
        {
            return InvocationEnd::aborted(failure);
        }
        self.progress(runs, ProgressStage::Uploading, 100, None).await;

        let cancelled = self.cancel_requested_ids(runs).await;
        if !cancelled.is_empty() {
            tracing::info!(invocation, cancelled = ?cancelled, "Cancel requested before start");
            return InvocationEnd::CancelledBeforeStart(cancelled);
        }

        self.progress(runs, ProgressStage::Executing, 0, Some("model running"))
            .await;
        let run_cmd = container::run_command(&self.config, invocation, layout);
        let output = match self
            .gateway
            .execute_command(&run_cmd, self.config.invocation_timeout)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                // The container can outlive a timed-out or dropped transport.
                self.force_kill(invocation).await;
                let context = if e.is_timeout() {
                    "invocation exceeded its time limit"
                } else {
                    "invocation could not be run"
                };
                return InvocationEnd::aborted(Failure::from_gateway(&e, context));
            }
        };
        tracing::info!(
            invocation,
            exit_code = output.exit_code,
            duration_secs = output.duration.as_secs_f64(),
            "Container exited"
        );

        self.progress(runs, ProgressStage::Downloading, 0, Some("downloading outputs"))
            .await;
        let local_output = staging_dir.join("output");
        let output_dir = match self
            .gateway
            .download_path(&layout.output_dir, &local_output, self.config.transfer_timeout)
            .await
        {
            Ok(()) => Some(local_output),
            Err(e) if output.success() => {
                return InvocationEnd::Aborted {
                    failure: Failure::from_gateway(&e, "download failed"),
                    exit_code: Some(output.exit_code),
                    stdout: output.stdout,
                    stderr: output.stderr,
                };
            }
            Err(e) => {
                tracing::warn!(invocation, error = %e, "Could not download outputs of a failed invocation");
                None
            }
        };
        self.progress(runs, ProgressStage::Downloading, 100, None).await;

        InvocationEnd::Exited {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            output_dir,
        }
    }

    /// Build the descriptor, or explain why the runs cannot be invoked.
    async fn prepare(
        &self,
        runs: &[Run],
        prompts: &[Prompt],
        layout: &InvocationLayout,
    ) -> Result<BatchDescriptor, String> {
        let first = runs.first().ok_or("no runs to invoke")?;
        let model_type: ModelType = first.model_type.parse().map_err(|e: CoreError| e.to_string())?;
        if runs.iter().any(|r| r.model_type != first.model_type) {
            return Err("runs in one invocation must share a model type".to_string());
        }

        match model_type {
            ModelType::Inference => {
                let mut entries = Vec::with_capacity(runs.len());
                for run in runs {
                    let prompt = find_prompt(prompts, run)?;
                    let ExecutionConfig::Inference(config) = parse_config(run, model_type)? else {
                        return Err(format!("run {} does not carry an inference config", run.id));
                    };
                    let inputs = PromptInputs::parse(&prompt.inputs)
                        .and_then(|inputs| inputs.validate_paths_exist().map(|()| inputs))
                        .map_err(|e| format!("prompt {}: {e}", prompt.id))?;
                    entries.push(InferenceEntry {
                        run_id: run.id,
                        prompt_text: prompt.description.clone(),
                        negative_prompt: prompt.negative_prompt.clone(),
                        video: inputs.video,
                        controls: inputs.controls,
                        config,
                    });
                }
                build_inference_descriptor(&entries, layout).map_err(|e| e.to_string())
            }
            ModelType::Upscale => {
                let [run] = runs else {
                    return Err(format!("upscale runs are never batched (got {})", runs.len()));
                };
                let prompt = find_prompt(prompts, run)?;
                let ExecutionConfig::Upscale(config) = parse_config(run, model_type)? else {
                    return Err(format!("run {} does not carry an upscale config", run.id));
                };
                let source_video = self.source_video(config.source_run_id).await?;
                Ok(build_upscale_descriptor(
                    &UpscaleEntry {
                        run_id: run.id,
                        prompt_text: prompt.description.clone(),
                        source_video,
                        control_weight: config.control_weight,
                    },
                    layout,
                ))
            }
        }
    }

    /// Local primary output of the completed inference run being upscaled.
    async fn source_video(&self, source_run_id: DbId) -> Result<String, String> {
        let source = RunRepo::find_by_id(&self.pool, source_run_id)
            .await
            .map_err(|e| format!("could not load source run {source_run_id}: {e}"))?
            .ok_or_else(|| format!("source run {source_run_id} not found"))?;

        if source.status() != Some(RunStatus::Completed)
            || source.model_type != ModelType::Inference.as_str()
        {
            return Err(format!(
                "source run {source_run_id} is not a completed inference run"
            ));
        }
        let path = source
            .typed_outputs()
            .and_then(|o| o.primary_output_path().map(str::to_string))
            .ok_or_else(|| format!("source run {source_run_id} has no primary output"))?;
        if !is_file(Path::new(&path)).await {
            return Err(format!("source output {path} no longer exists"));
        }
        Ok(path)
    }

    /// Run a short control command that must succeed.
    async fn control(
        &self,
        cmd: &RemoteCommand,
        what: &str,
    ) -> Result<(), Failure> {
        match self
            .gateway
            .execute_command(cmd, self.config.control_timeout)
            .await
        {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(Failure::new(
                FailureKind::Transport,
                format!("{what} failed (exit {}): {}", out.exit_code, out.stderr.trim()),
            )),
            Err(e) => Err(Failure::from_gateway(&e, what)),
        }
    }

    async fn cancel_requested_ids(&self, runs: &[Run]) -> Vec<DbId> {
        let mut ids = Vec::new();
        for run in runs {
            if self.cancel_requested(run.id).await {
                ids.push(run.id);
            }
        }
        ids
    }

    async fn cancel_requested(&self, run_id: DbId) -> bool {
        RunRepo::is_cancel_requested(&self.pool, run_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(run_id, error = %e, "Could not read cancel flag");
                false
            })
    }

    async fn progress(&self, runs: &[Run], stage: ProgressStage, percent: i16, message: Option<&str>) {
        for run in runs {
            if let Err(e) = ProgressRepo::append(&self.pool, run.id, stage, percent, message).await {
                tracing::warn!(run_id = run.id, error = %e, "Failed to record progress");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reconciliation and recording
    // -----------------------------------------------------------------------

    async fn finalize(
        &self,
        runs: &[Run],
        invocation: &str,
        end: InvocationEnd,
        started: Instant,
    ) -> Result<Vec<RunOutcome>, ExecutorError> {
        let duration_secs = started.elapsed().as_secs_f64();
        let batched = runs.len() > 1;

        let (verdicts, exit_code, stderr, log) = match end {
            InvocationEnd::CancelledBeforeStart(_) => {
                let log = synthesize_log(&LogContext {
                    invocation,
                    exit_code: None,
                    reason: Some("cancelled before the container started"),
                    stdout: "",
                    stderr: "",
                });
                let verdicts: Vec<Verdict> = runs.iter().map(|_| Verdict::Cancelled).collect();
                (verdicts, None, String::new(), SharedLog::Synthesized(log))
            }
            InvocationEnd::Aborted {
                failure,
                exit_code,
                stdout,
                stderr,
            } => {
                tracing::error!(
                    invocation,
                    kind = failure.kind.as_str(),
                    error = %failure.message,
                    "Invocation failed"
                );
                let log = synthesize_log(&LogContext {
                    invocation,
                    exit_code,
                    reason: Some(failure.message.as_str()),
                    stdout: &stdout,
                    stderr: &stderr,
                });
                let verdicts: Vec<Verdict> =
                    runs.iter().map(|_| Verdict::Failed(failure.clone())).collect();
                (verdicts, exit_code, stderr, SharedLog::Synthesized(log))
            }
            InvocationEnd::Exited {
                exit_code,
                stdout,
                stderr,
                output_dir,
            } => {
                let verdicts = self
                    .reconcile(runs, invocation, exit_code, output_dir.as_deref())
                    .await;
                let downloaded = match output_dir.map(|dir| dir.join(REMOTE_LOG_NAME)) {
                    Some(path) if is_file(&path).await => Some(path),
                    _ => None,
                };
                let log = match downloaded {
                    Some(path) => SharedLog::Downloaded(path),
                    None => {
                        let reason = match classify_exit(exit_code, false) {
                            ExitDisposition::Failed { reason } => Some(reason),
                            _ => None,
                        };
                        SharedLog::Synthesized(synthesize_log(&LogContext {
                            invocation,
                            exit_code: Some(exit_code),
                            reason: reason.as_deref(),
                            stdout: &stdout,
                            stderr: &stderr,
                        }))
                    }
                };
                (verdicts, Some(exit_code), stderr, log)
            }
        };

        let recording = Recording {
            invocation,
            exit_code,
            stderr: &stderr,
            duration_secs,
            batched,
            log,
        };

        let mut outcomes = Vec::with_capacity(runs.len());
        for (index, (run, verdict)) in runs.iter().zip(verdicts).enumerate() {
            outcomes.push(self.record(run, index, verdict, &recording).await?);
        }
        Ok(outcomes)
    }

    /// Pair the downloaded artifacts with runs and decide each run's fate.
    async fn reconcile(
        &self,
        runs: &[Run],
        invocation: &str,
        exit_code: i32,
        output_dir: Option<&Path>,
    ) -> Vec<Verdict> {
        let (marker, artifacts) = match output_dir {
            Some(dir) => {
                let dir = dir.to_path_buf();
                off_runtime(move || Ok((read_status_marker(&dir), list_artifacts(&dir))))
                    .await
                    .unwrap_or_default()
            }
            None => (None, Vec::new()),
        };
        let error_marker = marker.filter(StatusMarker::is_error);

        let mut dispositions = Vec::with_capacity(runs.len());
        for run in runs {
            let cancel_requested = self.cancel_requested(run.id).await;
            let disposition = match (classify_exit(exit_code, cancel_requested), &error_marker) {
                (ExitDisposition::Completed, Some(marker)) => ExitDisposition::Failed {
                    reason: format!(
                        "model reported an error: {}",
                        marker.message.as_deref().unwrap_or("no message")
                    ),
                },
                (disposition, _) => disposition,
            };
            dispositions.push(disposition);
        }

        let run_ids: Vec<DbId> = runs.iter().map(|r| r.id).collect();
        let plan = reconcile::plan(&run_ids, &artifacts);
        if plan.strategy == MatchStrategy::Identifier && exit_code == 0 {
            tracing::warn!(
                invocation,
                expected = run_ids.len(),
                found = artifacts.len(),
                matched = plan.matched_count(),
                "Artifact count mismatch; matching by run id"
            );
        }

        dispositions
            .into_iter()
            .zip(plan.assignments)
            .map(|(disposition, assignment)| match disposition {
                ExitDisposition::Completed => match (assignment.artifact, output_dir) {
                    (Some(name), Some(dir)) => Verdict::Completed {
                        artifact: dir.join(name),
                    },
                    _ => Verdict::Failed(Failure::new(
                        FailureKind::Reconciliation,
                        format!("output not found for run {}", assignment.run_id),
                    )),
                },
                ExitDisposition::Cancelled => Verdict::Cancelled,
                ExitDisposition::Failed { reason } => {
                    Verdict::Failed(Failure::new(FailureKind::Execution, reason))
                }
            })
            .collect()
    }

    /// Copy artifacts and log into the run's directory and persist the outcome.
    async fn record(
        &self,
        run: &Run,
        index: usize,
        verdict: Verdict,
        recording: &Recording<'_>,
    ) -> Result<RunOutcome, ExecutorError> {
        let paths = RunPaths::new(&self.config.outputs_root, run.id);
        let ensure = {
            let paths = paths.clone();
            off_runtime(move || paths.ensure()).await
        };
        if let Err(e) = ensure {
            tracing::warn!(run_id = run.id, error = %e, "Could not create run output directory");
        }
        write_log(&paths, &recording.log).await;

        let (status, primary_output_path, failure) = match verdict {
            Verdict::Completed { artifact } => match copy_artifact(&artifact, &paths.outputs_dir).await {
                Ok(dest) => (OutputStatus::Completed, Some(dest.display().to_string()), None),
                Err(e) => (
                    OutputStatus::Failed,
                    None,
                    Some(Failure::new(
                        FailureKind::Reconciliation,
                        format!("could not copy artifact {}: {e}", artifact.display()),
                    )),
                ),
            },
            Verdict::Cancelled => (OutputStatus::Cancelled, None, None),
            Verdict::Failed(failure) => (OutputStatus::Failed, None, Some(failure)),
        };

        let summary = OutputSummary {
            status,
            primary_output_path,
            log_path: paths.log_path_string(),
            files: {
                let dir = paths.outputs_dir.clone();
                off_runtime(move || manifest(&dir)).await.unwrap_or_default()
            },
            exit_code: recording.exit_code,
            duration_secs: recording.duration_secs,
        };
        let outputs = if run.model_type == ModelType::Upscale.as_str() {
            let source_run_id = run
                .execution_config
                .get("source_run_id")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or_default();
            RunOutputs::upscale(summary, source_run_id)
        } else {
            RunOutputs::inference(summary, recording.batched.then_some(index))
        };
        let value = outputs.to_value();

        let (run_status, recorded) = match &failure {
            None if status == OutputStatus::Completed => {
                tracing::info!(run_id = run.id, invocation = recording.invocation, "Run completed");
                (
                    RunStatus::Completed,
                    RunRepo::complete(&self.pool, run.id, &value).await?,
                )
            }
            None => {
                tracing::info!(run_id = run.id, invocation = recording.invocation, "Run cancelled");
                (
                    RunStatus::Cancelled,
                    RunRepo::finish_cancelled(&self.pool, run.id, Some(&value)).await?,
                )
            }
            Some(failure) => {
                tracing::error!(
                    run_id = run.id,
                    invocation = recording.invocation,
                    kind = failure.kind.as_str(),
                    error = %failure.message,
                    "Run failed"
                );
                let details = serde_json::json!({
                    "kind": failure.kind,
                    "invocation": recording.invocation,
                    "exit_code": recording.exit_code,
                    "stderr_tail": tail(recording.stderr, ERROR_STREAM_TAIL_CHARS),
                });
                (
                    RunStatus::Failed,
                    RunRepo::fail(&self.pool, run.id, &failure.message, Some(&details), Some(&value))
                        .await?,
                )
            }
        };
        if !recorded {
            tracing::warn!(run_id = run.id, "Run was no longer running; outcome not recorded");
        }

        Ok(RunOutcome {
            run_id: run.id,
            status: run_status,
            outputs,
            error_message: failure.as_ref().map(|f| f.message.clone()),
            failure_kind: failure.map(|f| f.kind),
        })
    }

    /// Close out a run left `running` by a process that no longer exists.
    ///
    /// Only valid while holding the GPU lease with no live container. The
    /// run ends cancelled if a cancel had been requested, failed otherwise.
    pub async fn recover_orphan(&self, run: &Run) -> Result<RunOutcome, ExecutorError> {
        let cancel_requested = self.cancel_requested(run.id).await;
        let invocation = container::invocation_name_for(run);
        let (verdict, reason) = if cancel_requested {
            (Verdict::Cancelled, "cancelled while no orchestrator was executing it")
        } else {
            let reason = "the orchestrator executing this run exited before it finished";
            (Verdict::Failed(Failure::new(FailureKind::Orphaned, reason)), reason)
        };
        tracing::warn!(run_id = run.id, invocation = %invocation, cancel_requested, "Recovering orphaned run");

        let log = synthesize_log(&LogContext {
            invocation: &invocation,
            exit_code: None,
            reason: Some(reason),
            stdout: "",
            stderr: "",
        });
        let recording = Recording {
            invocation: &invocation,
            exit_code: None,
            stderr: "",
            duration_secs: 0.0,
            batched: false,
            log: SharedLog::Synthesized(log),
        };
        self.record(run, 0, verdict, &recording).await
    }

    async fn cleanup(&self, invocation: &str, layout: &InvocationLayout, staging_dir: &Path) {
        let rm = container::remove_command(&[layout.input_dir.as_str(), layout.output_dir.as_str()]);
        if let Err(e) = self.gateway.execute_command(&rm, self.config.control_timeout).await {
            tracing::warn!(invocation, error = %e, "Could not remove remote invocation directories");
        }
        if let Err(e) = tokio::fs::remove_dir_all(staging_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(invocation, error = %e, "Could not remove staging directory");
            }
        }
    }
}

fn find_prompt<'a>(prompts: &'a [Prompt], run: &Run) -> Result<&'a Prompt, String> {
    prompts
        .iter()
        .find(|p| p.id == run.prompt_id)
        .ok_or_else(|| format!("prompt {} of run {} was not provided", run.prompt_id, run.id))
}

fn parse_config(run: &Run, model_type: ModelType) -> Result<ExecutionConfig, String> {
    ExecutionConfig::parse(model_type, &run.execution_config).map_err(|e| format!("run {}: {e}", run.id))
}

/// Run filesystem work on the blocking pool.
async fn off_runtime<T, F>(work: F) -> std::io::Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(std::io::Error::other)?
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn stage(descriptor: BatchDescriptor, input_dir: PathBuf) -> std::io::Result<()> {
    off_runtime(move || staging::write_input_dir(&descriptor, &input_dir)).await
}

async fn copy_artifact(artifact: &Path, dest_dir: &Path) -> std::io::Result<PathBuf> {
    let file_name = artifact
        .file_name()
        .ok_or_else(|| std::io::Error::other("artifact has no file name"))?;
    let dest = dest_dir.join(file_name);
    tokio::fs::copy(artifact, &dest).await?;
    Ok(dest)
}

async fn write_log(paths: &RunPaths, log: &SharedLog) {
    let result = match log {
        SharedLog::Downloaded(source) => tokio::fs::copy(source, &paths.log_path).await.map(|_| ()),
        SharedLog::Synthesized(text) => tokio::fs::write(&paths.log_path, text).await,
    };
    if let Err(e) = result {
        tracing::warn!(log_path = %paths.log_path.display(), error = %e, "Could not write run log");
    }
}

//! The orchestrator facade: the only way callers create, inspect, run,
//! cancel and delete prompts and runs.

use std::path::PathBuf;
use std::sync::Arc;

use cosmos_core::execution_config::ExecutionConfig;
use cosmos_core::exit::tail;
use cosmos_core::model_type::ModelType;
use cosmos_core::outputs::RunOutputs;
use cosmos_core::prompt::{validate_description, validate_parameters, PromptInputs};
use cosmos_core::types::DbId;
use cosmos_db::lease::GpuLease;
use cosmos_db::models::progress::RunProgress;
use cosmos_db::models::prompt::{CreatePrompt, Prompt, PromptListQuery};
use cosmos_db::models::run::{CreateRun, Run, RunListQuery};
use cosmos_db::models::status::RunStatus;
use cosmos_db::repositories::{ProgressRepo, PromptRepo, RunRepo};
use cosmos_executor::artifacts::remove_run_dir;
use cosmos_executor::GpuExecutor;
use cosmos_remote::RemoteGateway;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::OrchestratorConfig;
use crate::engine::{CancelOutcome, KillReport, QueueService, TickOutcome};
use crate::error::OrchestratorError;

/// Characters of a run log returned by [`Orchestrator::get_run`].
const MAX_LOG_CHARS: usize = 200_000;

/// Input for [`Orchestrator::create_prompt`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPrompt {
    pub description: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// `{"video": path, "controls": {modality: path}}`; paths must exist.
    #[serde(default)]
    pub inputs: serde_json::Value,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Input for [`Orchestrator::create_run`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewRun {
    pub prompt_id: DbId,
    pub model_type: String,
    #[serde(default)]
    pub execution_config: serde_json::Value,
}

/// A run with everything a caller needs to show it.
#[derive(Debug, Serialize)]
pub struct RunDetail {
    pub run: Run,
    pub status: RunStatus,
    pub prompt: Prompt,
    pub outputs: Option<RunOutputs>,
    /// Contents of the run log, when one has been written.
    pub log: Option<String>,
    pub progress: Vec<RunProgress>,
}

/// Snapshot of the GPU and the queue.
#[derive(Debug, Serialize)]
pub struct SystemStatus {
    /// A container is alive or the lease is held.
    pub gpu_busy: bool,
    pub active_invocations: Vec<String>,
    /// Set when the GPU host could not be probed.
    pub probe_error: Option<String>,
    pub lease_held: bool,
    pub pending: i64,
    pub running: i64,
    pub running_run_ids: Vec<DbId>,
}

#[derive(Clone)]
pub struct Orchestrator {
    pool: PgPool,
    queue: QueueService,
}

impl Orchestrator {
    pub fn new(pool: PgPool, gateway: Arc<dyn RemoteGateway>, config: &OrchestratorConfig) -> Self {
        let executor = GpuExecutor::new(pool.clone(), gateway, config.executor.clone());
        Self::with_executor(pool, executor, config.max_batch_size)
    }

    pub fn with_executor(pool: PgPool, executor: GpuExecutor, max_batch_size: usize) -> Self {
        let queue = QueueService::new(pool.clone(), executor, max_batch_size);
        Self { pool, queue }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn queue(&self) -> &QueueService {
        &self.queue
    }

    fn outputs_root(&self) -> PathBuf {
        self.queue.executor().config().outputs_root.clone()
    }

    // -----------------------------------------------------------------------
    // Prompts
    // -----------------------------------------------------------------------

    /// Validate and store a prompt. Every referenced media file must exist.
    pub async fn create_prompt(&self, input: NewPrompt) -> Result<Prompt, OrchestratorError> {
        validate_description(&input.description)?;
        validate_parameters(&input.parameters)?;
        let inputs = PromptInputs::parse(&input.inputs)?;
        inputs.validate_paths_exist()?;

        let prompt = PromptRepo::create(
            &self.pool,
            &CreatePrompt {
                description: input.description.trim().to_string(),
                negative_prompt: input
                    .negative_prompt
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                inputs: inputs.to_value(),
                parameters: input.parameters,
                parent_prompt_id: None,
            },
        )
        .await?;
        tracing::info!(prompt_id = prompt.id, "Prompt created");
        Ok(prompt)
    }

    pub async fn get_prompt(&self, prompt_id: DbId) -> Result<Prompt, OrchestratorError> {
        PromptRepo::find_by_id(&self.pool, prompt_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Prompt", prompt_id))
    }

    pub async fn list_prompts(&self, query: &PromptListQuery) -> Result<Vec<Prompt>, OrchestratorError> {
        Ok(PromptRepo::list(&self.pool, query).await?)
    }

    /// Case-insensitive substring search over prompt descriptions.
    pub async fn search_prompts(
        &self,
        text: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Prompt>, OrchestratorError> {
        let query = PromptListQuery {
            search: Some(text.to_string()),
            limit,
            offset: None,
        };
        Ok(PromptRepo::list(&self.pool, &query).await?)
    }

    /// Store externally enhanced text as a new prompt derived from
    /// `parent_id`. The parent is left untouched.
    pub async fn enhance_prompt_record(
        &self,
        parent_id: DbId,
        enhanced_description: &str,
    ) -> Result<Prompt, OrchestratorError> {
        validate_description(enhanced_description)?;
        let parent = self.get_prompt(parent_id).await?;

        let prompt = PromptRepo::create(
            &self.pool,
            &CreatePrompt {
                description: enhanced_description.trim().to_string(),
                negative_prompt: parent.negative_prompt,
                inputs: parent.inputs,
                parameters: parent.parameters,
                parent_prompt_id: Some(parent.id),
            },
        )
        .await?;
        tracing::info!(prompt_id = prompt.id, parent_prompt_id = parent_id, "Enhanced prompt stored");
        Ok(prompt)
    }

    /// Delete a prompt with all its runs and their artifacts.
    pub async fn delete_prompt(&self, prompt_id: DbId) -> Result<(), OrchestratorError> {
        self.get_prompt(prompt_id).await?;
        if RunRepo::count_running_for_prompt(&self.pool, prompt_id).await? > 0 {
            return Err(OrchestratorError::conflict(format!(
                "prompt {prompt_id} has a running run; cancel it first"
            )));
        }

        let run_ids = RunRepo::ids_for_prompt(&self.pool, prompt_id).await?;
        if !PromptRepo::delete(&self.pool, prompt_id).await? {
            return Err(OrchestratorError::not_found("Prompt", prompt_id));
        }
        self.remove_artifacts(run_ids.clone()).await;
        tracing::info!(prompt_id, run_ids = ?run_ids, "Prompt deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Create a pending run. Creating it is what enqueues it.
    pub async fn create_run(&self, input: NewRun) -> Result<Run, OrchestratorError> {
        self.get_prompt(input.prompt_id).await?;
        let model_type: ModelType = input.model_type.parse()?;
        let config = ExecutionConfig::parse(model_type, &input.execution_config)?;
        if let ExecutionConfig::Upscale(upscale) = &config {
            self.check_upscale_source(upscale.source_run_id).await?;
        }

        let run = RunRepo::create(
            &self.pool,
            &CreateRun {
                prompt_id: input.prompt_id,
                model_type: model_type.as_str().to_string(),
                execution_config: config.to_value(),
                batch_key: config.batch_key(),
                retry_of_run_id: None,
            },
        )
        .await?;
        tracing::info!(
            run_id = run.id,
            prompt_id = run.prompt_id,
            model_type = %run.model_type,
            "Run created"
        );
        Ok(run)
    }

    async fn check_upscale_source(&self, source_run_id: DbId) -> Result<(), OrchestratorError> {
        let source = RunRepo::find_by_id(&self.pool, source_run_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::validation(format!("source run {source_run_id} does not exist"))
            })?;
        let usable = source.status() == Some(RunStatus::Completed)
            && source.model_type == ModelType::Inference.as_str()
            && source
                .typed_outputs()
                .is_some_and(|o| o.primary_output_path().is_some());
        if !usable {
            return Err(OrchestratorError::validation(format!(
                "source run {source_run_id} is not a completed inference run with an output"
            )));
        }
        Ok(())
    }

    pub async fn get_run(&self, run_id: DbId) -> Result<RunDetail, OrchestratorError> {
        let run = self.find_run(run_id).await?;
        let prompt = self.get_prompt(run.prompt_id).await?;
        let progress = ProgressRepo::list_for_run(&self.pool, run_id).await?;
        let outputs = run.typed_outputs();
        let log = match &outputs {
            Some(o) => read_log(o.log_path()).await,
            None => None,
        };
        let status = run.status().unwrap_or(RunStatus::Failed);

        Ok(RunDetail {
            run,
            status,
            prompt,
            outputs,
            log,
            progress,
        })
    }

    pub async fn list_runs(&self, query: &RunListQuery) -> Result<Vec<Run>, OrchestratorError> {
        Ok(RunRepo::list(&self.pool, query).await?)
    }

    /// Check that a run is queued. Non-blocking; the next tick picks it up.
    pub async fn enqueue(&self, run_id: DbId) -> Result<Run, OrchestratorError> {
        let run = self.find_run(run_id).await?;
        self.ensure_pending(&run)?;
        Ok(run)
    }

    /// Execute one pending run now and wait until it is terminal.
    ///
    /// Fails with a conflict instead of waiting when the GPU is busy.
    pub async fn run_now(&self, run_id: DbId) -> Result<Run, OrchestratorError> {
        let run = self.find_run(run_id).await?;
        self.ensure_pending(&run)?;

        match self.queue.claim_specific(run_id).await? {
            TickOutcome::Busy(reason) => {
                tracing::info!(run_id, ?reason, "run_now refused: GPU busy");
                Err(OrchestratorError::conflict("the GPU is busy; try again later"))
            }
            TickOutcome::Idle => Err(OrchestratorError::conflict(format!(
                "run {run_id} was claimed by another process"
            ))),
            TickOutcome::Executed { .. } => self.find_run(run_id).await,
        }
    }

    pub async fn tick(&self) -> Result<TickOutcome, OrchestratorError> {
        self.queue.tick().await
    }

    pub async fn cancel_run(&self, run_id: DbId) -> Result<CancelOutcome, OrchestratorError> {
        self.queue.cancel(run_id).await
    }

    pub async fn kill_active(&self) -> Result<KillReport, OrchestratorError> {
        self.queue.kill_active().await
    }

    /// Queue a new pending run with the same prompt and config as a failed
    /// or cancelled one.
    pub async fn retry_run(&self, run_id: DbId) -> Result<Run, OrchestratorError> {
        let run = self.find_run(run_id).await?;
        match run.status() {
            Some(RunStatus::Failed | RunStatus::Cancelled) => {}
            other => {
                return Err(OrchestratorError::conflict(format!(
                    "only failed or cancelled runs can be retried (run {run_id} is {})",
                    other.map_or("unknown", RunStatus::name)
                )))
            }
        }
        let retry = RunRepo::retry(&self.pool, run_id).await?;
        tracing::info!(run_id = retry.id, retry_of_run_id = run_id, "Run retried");
        Ok(retry)
    }

    /// Delete a run that is not running, together with its artifacts.
    pub async fn delete_run(&self, run_id: DbId) -> Result<(), OrchestratorError> {
        let run = self.find_run(run_id).await?;
        if run.status() == Some(RunStatus::Running) || !RunRepo::delete(&self.pool, run_id).await? {
            return Err(OrchestratorError::conflict(format!(
                "run {run_id} is running; cancel it first"
            )));
        }
        self.remove_artifacts(vec![run_id]).await;
        tracing::info!(run_id, "Run deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub async fn system_status(&self) -> Result<SystemStatus, OrchestratorError> {
        let (active_invocations, probe_error) = match self.queue.executor().active_invocations().await {
            Ok(active) => (active, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        let lease_held = GpuLease::is_held(&self.pool).await?;
        let pending = RunRepo::count_by_status(&self.pool, RunStatus::Pending).await?;
        let running_run_ids = RunRepo::list_running(&self.pool)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect::<Vec<_>>();

        Ok(SystemStatus {
            gpu_busy: !active_invocations.is_empty() || lease_held || probe_error.is_some(),
            active_invocations,
            probe_error,
            lease_held,
            pending,
            running: running_run_ids.len() as i64,
            running_run_ids,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn find_run(&self, run_id: DbId) -> Result<Run, OrchestratorError> {
        RunRepo::find_by_id(&self.pool, run_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Run", run_id))
    }

    fn ensure_pending(&self, run: &Run) -> Result<(), OrchestratorError> {
        match run.status() {
            Some(RunStatus::Pending) => Ok(()),
            other => Err(OrchestratorError::conflict(format!(
                "run {} is {}, not pending",
                run.id,
                other.map_or("unknown", RunStatus::name)
            ))),
        }
    }

    async fn remove_artifacts(&self, run_ids: Vec<DbId>) {
        let root = self.outputs_root();
        let result = tokio::task::spawn_blocking(move || {
            for run_id in run_ids {
                if let Err(e) = remove_run_dir(&root, run_id) {
                    tracing::warn!(run_id, error = %e, "Could not remove run artifacts");
                }
            }
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Artifact cleanup task failed");
        }
    }
}

async fn read_log(path: &str) -> Option<String> {
    match read_log_tail(path, MAX_LOG_CHARS).await {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(log_path = path, error = %e, "Could not read run log");
            None
        }
    }
}

/// Last `max_chars` characters of the file, reading at most four bytes per
/// character from the end.
async fn read_log_tail(path: &str, max_chars: usize) -> std::io::Result<String> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let budget = (max_chars as u64).saturating_mul(4);
    let start = len.saturating_sub(budget);
    file.seek(SeekFrom::Start(start)).await?;

    let mut bytes = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut bytes).await?;
    // Skip a character split by the seek.
    let skip = if start > 0 {
        bytes.iter().take_while(|b| (**b & 0xC0) == 0x80).count()
    } else {
        0
    };
    Ok(tail(&String::from_utf8_lossy(&bytes[skip..]), max_chars))
}

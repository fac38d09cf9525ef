//! Queue service: the only path from `pending` to an invocation.
//!
//! There is no scheduler task. Something outside calls [`QueueService::tick`]
//! on a timer (the worker binary, or the UI through the HTTP API); each tick
//! either finds the GPU busy, finds nothing to do, or claims and executes one
//! invocation to completion before returning.
//!
//! Mutual exclusion is held by the database and the GPU host, never by this
//! process: a live labeled container means busy, and claiming requires the
//! GPU lease (a session advisory lock that dies with its connection).

use cosmos_core::types::DbId;
use cosmos_db::lease::GpuLease;
use cosmos_db::models::prompt::Prompt;
use cosmos_db::models::run::Run;
use cosmos_db::models::status::RunStatus;
use cosmos_db::repositories::{PromptRepo, RunRepo};
use cosmos_executor::container;
use cosmos_executor::{GpuExecutor, Termination};
use serde::Serialize;
use sqlx::PgPool;

use crate::error::OrchestratorError;

/// Why a tick did not claim anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BusyReason {
    /// Labeled containers are alive on the GPU host.
    ContainerActive { invocations: Vec<String> },
    /// Another process holds the GPU lease.
    LeaseHeld,
    /// The GPU host could not be asked, so it is treated as busy.
    ProbeFailed { message: String },
}

/// Result of one [`QueueService::tick`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Busy(BusyReason),
    /// Nothing pending.
    Idle,
    /// One invocation ran; every listed run is now terminal.
    Executed {
        run_ids: Vec<DbId>,
        statuses: Vec<RunStatus>,
    },
}

/// Result of [`QueueService::cancel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The run was pending and is now cancelled.
    Cancelled,
    /// The run is running; the request is recorded and its container was
    /// asked to stop. The executing process marks it cancelled on exit.
    CancelRequested { termination: Option<Termination> },
    /// The run had already finished; nothing changed.
    AlreadyTerminal { status: RunStatus },
}

/// Result of [`QueueService::kill_active`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KillReport {
    /// Running runs that now carry a cancel request.
    pub cancel_requested: Vec<DbId>,
    /// Containers that were stopped, with how.
    pub terminated: Vec<(String, Termination)>,
}

enum ClaimTarget {
    Next,
    Specific(DbId),
}

/// Serializes GPU work across every process sharing the database.
#[derive(Clone)]
pub struct QueueService {
    pool: PgPool,
    executor: GpuExecutor,
    max_batch_size: usize,
}

impl QueueService {
    pub fn new(pool: PgPool, executor: GpuExecutor, max_batch_size: usize) -> Self {
        Self {
            pool,
            executor,
            max_batch_size: max_batch_size.max(1),
        }
    }

    pub fn executor(&self) -> &GpuExecutor {
        &self.executor
    }

    /// Claim the oldest pending run (plus compatible siblings) and execute
    /// it, unless the GPU is busy.
    pub async fn tick(&self) -> Result<TickOutcome, OrchestratorError> {
        self.claim_and_execute(ClaimTarget::Next).await
    }

    /// Like [`tick`](Self::tick), but claims only the named run.
    ///
    /// Returns `Idle` if the run is no longer pending.
    pub async fn claim_specific(&self, run_id: DbId) -> Result<TickOutcome, OrchestratorError> {
        self.claim_and_execute(ClaimTarget::Specific(run_id)).await
    }

    async fn claim_and_execute(&self, target: ClaimTarget) -> Result<TickOutcome, OrchestratorError> {
        match self.executor.active_invocations().await {
            Ok(active) if !active.is_empty() => {
                tracing::debug!(invocations = ?active, "GPU busy: container alive");
                return Ok(TickOutcome::Busy(BusyReason::ContainerActive {
                    invocations: active,
                }));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Could not probe GPU host; treating it as busy");
                return Ok(TickOutcome::Busy(BusyReason::ProbeFailed {
                    message: e.to_string(),
                }));
            }
        }

        let Some(mut lease) = GpuLease::try_acquire(&self.pool).await? else {
            tracing::debug!("GPU busy: lease held elsewhere");
            return Ok(TickOutcome::Busy(BusyReason::LeaseHeld));
        };

        let result = self.with_lease(&mut lease, target).await;

        if let Err(e) = lease.release().await {
            tracing::warn!(error = %e, "Failed to release GPU lease; it ends with its connection");
        }
        result
    }

    async fn with_lease(
        &self,
        lease: &mut GpuLease,
        target: ClaimTarget,
    ) -> Result<TickOutcome, OrchestratorError> {
        self.recover_orphans().await?;

        let runs = match target {
            ClaimTarget::Next => RunRepo::claim_next(lease.conn(), self.max_batch_size).await?,
            ClaimTarget::Specific(run_id) => RunRepo::claim_by_id(lease.conn(), run_id)
                .await?
                .into_iter()
                .collect(),
        };
        if runs.is_empty() {
            return Ok(TickOutcome::Idle);
        }

        let run_ids: Vec<DbId> = runs.iter().map(|r| r.id).collect();
        tracing::info!(
            run_ids = ?run_ids,
            batch_id = ?runs[0].batch_id,
            "Claimed runs"
        );

        let prompts = self.prompts_for(&runs).await?;
        let outcomes = self.executor.execute_batch(&runs, &prompts).await?;

        Ok(TickOutcome::Executed {
            run_ids,
            statuses: outcomes.iter().map(|o| o.status).collect(),
        })
    }

    async fn prompts_for(&self, runs: &[Run]) -> Result<Vec<Prompt>, OrchestratorError> {
        let mut ids: Vec<DbId> = runs.iter().map(|r| r.prompt_id).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(PromptRepo::find_by_ids(&self.pool, &ids).await?)
    }

    /// With the lease held and no container alive, nothing can legitimately
    /// be running: whoever claimed those runs is gone.
    async fn recover_orphans(&self) -> Result<(), OrchestratorError> {
        for run in RunRepo::list_running(&self.pool).await? {
            let outcome = self.executor.recover_orphan(&run).await?;
            tracing::warn!(
                run_id = run.id,
                status = outcome.status.name(),
                "Recovered orphaned run"
            );
        }
        Ok(())
    }

    /// Cancel a run. Pending runs are cancelled on the spot; running runs
    /// get a durable cancel request and their container is terminated.
    pub async fn cancel(&self, run_id: DbId) -> Result<CancelOutcome, OrchestratorError> {
        let run = self.find_run(run_id).await?;

        if run.status() == Some(RunStatus::Pending) {
            if RunRepo::cancel_pending(&self.pool, run_id).await? {
                tracing::info!(run_id, "Cancelled pending run");
                return Ok(CancelOutcome::Cancelled);
            }
            // Claimed in the meantime; fall through to the running path.
        }

        if RunRepo::request_cancel(&self.pool, run_id).await? {
            // Re-read: the claim may have assigned a batch id since.
            let run = self.find_run(run_id).await?;
            let invocation = container::invocation_name_for(&run);
            tracing::info!(run_id, invocation = %invocation, "Cancel requested for running run");
            let termination = match self.executor.terminate(&invocation).await {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::warn!(run_id, invocation = %invocation, error = %e, "Could not terminate invocation");
                    None
                }
            };
            return Ok(CancelOutcome::CancelRequested { termination });
        }

        let run = self.find_run(run_id).await?;
        let status = run.status().unwrap_or(RunStatus::Failed);
        tracing::debug!(run_id, status = status.name(), "Cancel on a finished run ignored");
        Ok(CancelOutcome::AlreadyTerminal { status })
    }

    /// Request cancel on every running run and stop every live container.
    pub async fn kill_active(&self) -> Result<KillReport, OrchestratorError> {
        let mut report = KillReport::default();
        for run in RunRepo::list_running(&self.pool).await? {
            if RunRepo::request_cancel(&self.pool, run.id).await? {
                report.cancel_requested.push(run.id);
            }
        }

        for invocation in self.executor.active_invocations().await? {
            let termination = self.executor.terminate(&invocation).await?;
            tracing::warn!(invocation = %invocation, ?termination, "Killed active invocation");
            report.terminated.push((invocation, termination));
        }
        Ok(report)
    }

    async fn find_run(&self, run_id: DbId) -> Result<Run, OrchestratorError> {
        RunRepo::find_by_id(&self.pool, run_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Run", run_id))
    }
}

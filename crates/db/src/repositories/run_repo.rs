//! Repository for the `runs` table.
//!
//! Uses `RunStatus` for every status literal. Every status-changing
//! statement guards on the expected source status, so a lost race turns
//! into `rows_affected() == 0` instead of an illegal transition (the
//! `trg_runs_monotonic_status` trigger backs this up in the database).

use cosmos_core::types::DbId;
use sqlx::{Acquire, PgConnection, PgPool};

use super::{clamp_limit, clamp_offset};
use crate::models::run::{CreateRun, Run, RunListQuery};
use crate::models::status::RunStatus;

/// Column list for `runs` queries.
const COLUMNS: &str = "\
    id, prompt_id, model_type, execution_config, status_id, outputs, \
    batch_id, batch_key, error_message, error_details, cancel_requested_at, \
    retry_of_run_id, started_at, completed_at, created_at, updated_at";

/// Provides lifecycle and query operations for runs.
pub struct RunRepo;

impl RunRepo {
    /// Create a new pending run. Creating it is what enqueues it.
    pub async fn create(pool: &PgPool, input: &CreateRun) -> Result<Run, sqlx::Error> {
        let query = format!(
            "INSERT INTO runs (prompt_id, model_type, execution_config, status_id, batch_key, retry_of_run_id) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(input.prompt_id)
            .bind(&input.model_type)
            .bind(&input.execution_config)
            .bind(RunStatus::Pending.id())
            .bind(&input.batch_key)
            .bind(input.retry_of_run_id)
            .fetch_one(pool)
            .await
    }

    /// Find a run by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Run>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM runs WHERE id = $1");
        sqlx::query_as::<_, Run>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List runs newest first with optional filters and pagination.
    pub async fn list(pool: &PgPool, params: &RunListQuery) -> Result<Vec<Run>, sqlx::Error> {
        let limit = clamp_limit(params.limit);
        let offset = clamp_offset(params.offset);

        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if params.status_id.is_some() {
            conditions.push(format!("status_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.prompt_id.is_some() {
            conditions.push(format!("prompt_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.model_type.is_some() {
            conditions.push(format!("model_type = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.batch_id.is_some() {
            conditions.push(format!("batch_id = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM runs \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Run>(&query);
        if let Some(status_id) = params.status_id {
            q = q.bind(status_id);
        }
        if let Some(prompt_id) = params.prompt_id {
            q = q.bind(prompt_id);
        }
        if let Some(model_type) = &params.model_type {
            q = q.bind(model_type);
        }
        if let Some(batch_id) = params.batch_id {
            q = q.bind(batch_id);
        }
        q = q.bind(limit).bind(offset);

        q.fetch_all(pool).await
    }

    /// All runs currently in `running`, oldest claim first.
    pub async fn list_running(pool: &PgPool) -> Result<Vec<Run>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM runs WHERE status_id = $1 ORDER BY started_at, id"
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(RunStatus::Running.id())
            .fetch_all(pool)
            .await
    }

    /// Number of runs in the given status.
    pub async fn count_by_status(pool: &PgPool, status: RunStatus) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM runs WHERE status_id = $1")
            .bind(status.id())
            .fetch_one(pool)
            .await
    }

    /// Number of running runs belonging to a prompt.
    pub async fn count_running_for_prompt(
        pool: &PgPool,
        prompt_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM runs WHERE prompt_id = $1 AND status_id = $2",
        )
        .bind(prompt_id)
        .bind(RunStatus::Running.id())
        .fetch_one(pool)
        .await
    }

    /// IDs of every run belonging to a prompt.
    pub async fn ids_for_prompt(pool: &PgPool, prompt_id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>("SELECT id FROM runs WHERE prompt_id = $1 ORDER BY id")
            .bind(prompt_id)
            .fetch_all(pool)
            .await
    }

    // -----------------------------------------------------------------------
    // Claim
    // -----------------------------------------------------------------------

    /// Atomically claim the oldest pending run plus up to `max_batch - 1`
    /// pending siblings sharing its batch key.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent claimers never
    /// select the same row. When more than one run is claimed they all get
    /// a fresh `batch_id`. Returns the claimed runs in queue order (empty
    /// when nothing is pending).
    pub async fn claim_next(
        conn: &mut PgConnection,
        max_batch: usize,
    ) -> Result<Vec<Run>, sqlx::Error> {
        let mut tx = conn.begin().await?;

        let head_query = format!(
            "SELECT {COLUMNS} FROM runs \
             WHERE status_id = $1 \
             ORDER BY created_at ASC, id ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED"
        );
        let Some(head) = sqlx::query_as::<_, Run>(&head_query)
            .bind(RunStatus::Pending.id())
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.commit().await?;
            return Ok(Vec::new());
        };

        let mut ids = vec![head.id];
        if let (Some(key), true) = (head.batch_key.as_deref(), max_batch > 1) {
            let siblings: Vec<DbId> = sqlx::query_scalar(
                "SELECT id FROM runs \
                 WHERE status_id = $1 AND batch_key = $2 AND id <> $3 \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT $4 \
                 FOR UPDATE SKIP LOCKED",
            )
            .bind(RunStatus::Pending.id())
            .bind(key)
            .bind(head.id)
            .bind((max_batch - 1) as i64)
            .fetch_all(&mut *tx)
            .await?;
            ids.extend(siblings);
        }

        let batch_id = (ids.len() > 1).then(uuid::Uuid::now_v7);

        let update = format!(
            "UPDATE runs \
             SET status_id = $2, started_at = NOW(), batch_id = $3 \
             WHERE id = ANY($1) AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        let mut claimed = sqlx::query_as::<_, Run>(&update)
            .bind(&ids)
            .bind(RunStatus::Running.id())
            .bind(batch_id)
            .bind(RunStatus::Pending.id())
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        claimed.sort_by_key(|r| (r.created_at, r.id));
        Ok(claimed)
    }

    /// Atomically claim one specific pending run.
    ///
    /// Returns `None` if the run does not exist, is not pending, or is
    /// locked by a concurrent claimer.
    pub async fn claim_by_id(
        conn: &mut PgConnection,
        run_id: DbId,
    ) -> Result<Option<Run>, sqlx::Error> {
        let query = format!(
            "UPDATE runs \
             SET status_id = $2, started_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM runs \
                 WHERE id = $1 AND status_id = $3 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(run_id)
            .bind(RunStatus::Running.id())
            .bind(RunStatus::Pending.id())
            .fetch_optional(conn)
            .await
    }

    // -----------------------------------------------------------------------
    // Terminal transitions (running -> terminal)
    // -----------------------------------------------------------------------

    /// Mark a running run as completed with its outputs document.
    ///
    /// Returns `false` if the run was not running.
    pub async fn complete(
        pool: &PgPool,
        run_id: DbId,
        outputs: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE runs \
             SET status_id = $2, outputs = $3, completed_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(run_id)
        .bind(RunStatus::Completed.id())
        .bind(outputs)
        .bind(RunStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a running run as failed with an error message, structured
    /// details and (when available) a partial outputs document.
    ///
    /// No automatic retry is performed.
    pub async fn fail(
        pool: &PgPool,
        run_id: DbId,
        error: &str,
        details: Option<&serde_json::Value>,
        outputs: Option<&serde_json::Value>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE runs \
             SET status_id = $2, error_message = $3, error_details = $4, \
                 outputs = COALESCE($5, outputs), completed_at = NOW() \
             WHERE id = $1 AND status_id = $6",
        )
        .bind(run_id)
        .bind(RunStatus::Failed.id())
        .bind(error)
        .bind(details)
        .bind(outputs)
        .bind(RunStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a running run as cancelled once its process exit was observed.
    pub async fn finish_cancelled(
        pool: &PgPool,
        run_id: DbId,
        outputs: Option<&serde_json::Value>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE runs \
             SET status_id = $2, outputs = COALESCE($3, outputs), \
                 error_message = COALESCE(error_message, 'cancelled by request'), \
                 completed_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(run_id)
        .bind(RunStatus::Cancelled.id())
        .bind(outputs)
        .bind(RunStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Cancel a pending run outright.
    ///
    /// Returns `false` if the run was not pending (already claimed or
    /// terminal).
    pub async fn cancel_pending(pool: &PgPool, run_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE runs \
             SET status_id = $2, completed_at = NOW(), \
                 cancel_requested_at = NOW(), error_message = 'cancelled before execution' \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(run_id)
        .bind(RunStatus::Cancelled.id())
        .bind(RunStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a durable cancel request on a running run.
    ///
    /// Returns `false` if the run is not running. Repeated requests keep the
    /// first timestamp.
    pub async fn request_cancel(pool: &PgPool, run_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE runs \
             SET cancel_requested_at = COALESCE(cancel_requested_at, NOW()) \
             WHERE id = $1 AND status_id = $2",
        )
        .bind(run_id)
        .bind(RunStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether a cancel was requested for the run.
    pub async fn is_cancel_requested(pool: &PgPool, run_id: DbId) -> Result<bool, sqlx::Error> {
        let requested: Option<bool> = sqlx::query_scalar(
            "SELECT cancel_requested_at IS NOT NULL FROM runs WHERE id = $1",
        )
        .bind(run_id)
        .fetch_optional(pool)
        .await?;
        Ok(requested.unwrap_or(false))
    }

    // -----------------------------------------------------------------------
    // Retry / delete
    // -----------------------------------------------------------------------

    /// Create a new pending run from an existing run's prompt and config.
    ///
    /// The new run has `retry_of_run_id` pointing to the original. This is
    /// the only way to re-execute a run; no automatic retries exist.
    pub async fn retry(pool: &PgPool, run_id: DbId) -> Result<Run, sqlx::Error> {
        let original = Self::find_by_id(pool, run_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        Self::create(
            pool,
            &CreateRun {
                prompt_id: original.prompt_id,
                model_type: original.model_type,
                execution_config: original.execution_config,
                batch_key: original.batch_key,
                retry_of_run_id: Some(run_id),
            },
        )
        .await
    }

    /// Delete a run that is not currently running.
    ///
    /// Returns `false` if the run does not exist or is running.
    pub async fn delete(pool: &PgPool, run_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM runs WHERE id = $1 AND status_id <> $2")
            .bind(run_id)
            .bind(RunStatus::Running.id())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

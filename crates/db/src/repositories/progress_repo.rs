//! Repository for the `run_progress` table.

use cosmos_core::types::DbId;
use sqlx::PgPool;

use crate::models::progress::{ProgressStage, RunProgress};

/// Column list for `run_progress` queries.
const COLUMNS: &str = "id, run_id, stage, percent, message, created_at";

/// Append-only progress log. Entries never influence run status.
pub struct ProgressRepo;

impl ProgressRepo {
    /// Append a progress entry. `percent` is clamped to `0..=100`.
    pub async fn append(
        pool: &PgPool,
        run_id: DbId,
        stage: ProgressStage,
        percent: i16,
        message: Option<&str>,
    ) -> Result<RunProgress, sqlx::Error> {
        let query = format!(
            "INSERT INTO run_progress (run_id, stage, percent, message) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RunProgress>(&query)
            .bind(run_id)
            .bind(stage.as_str())
            .bind(percent.clamp(0, 100))
            .bind(message)
            .fetch_one(pool)
            .await
    }

    /// All progress entries for a run, oldest first.
    pub async fn list_for_run(pool: &PgPool, run_id: DbId) -> Result<Vec<RunProgress>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM run_progress WHERE run_id = $1 ORDER BY created_at, id"
        );
        sqlx::query_as::<_, RunProgress>(&query)
            .bind(run_id)
            .fetch_all(pool)
            .await
    }

    /// Most recent progress entry for a run.
    pub async fn latest_for_run(
        pool: &PgPool,
        run_id: DbId,
    ) -> Result<Option<RunProgress>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM run_progress WHERE run_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        sqlx::query_as::<_, RunProgress>(&query)
            .bind(run_id)
            .fetch_optional(pool)
            .await
    }
}

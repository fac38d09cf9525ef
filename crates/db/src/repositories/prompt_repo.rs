//! Repository for the `prompts` table.

use cosmos_core::types::DbId;
use sqlx::PgPool;

use super::{clamp_limit, clamp_offset};
use crate::models::prompt::{CreatePrompt, Prompt, PromptListQuery};

/// Column list for `prompts` queries.
const COLUMNS: &str = "\
    id, description, negative_prompt, inputs, parameters, parent_prompt_id, \
    created_at, updated_at";

/// Provides CRUD operations for prompts. Prompts are immutable once created.
pub struct PromptRepo;

impl PromptRepo {
    /// Insert a new prompt and return the stored row.
    pub async fn create(pool: &PgPool, input: &CreatePrompt) -> Result<Prompt, sqlx::Error> {
        let query = format!(
            "INSERT INTO prompts (description, negative_prompt, inputs, parameters, parent_prompt_id) \
             VALUES ($1, $2, COALESCE($3, '{{}}'::jsonb), COALESCE($4, '{{}}'::jsonb), $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Prompt>(&query)
            .bind(&input.description)
            .bind(&input.negative_prompt)
            .bind(non_null(&input.inputs))
            .bind(non_null(&input.parameters))
            .bind(input.parent_prompt_id)
            .fetch_one(pool)
            .await
    }

    /// Find a prompt by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Prompt>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM prompts WHERE id = $1");
        sqlx::query_as::<_, Prompt>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find several prompts by ID (any order).
    pub async fn find_by_ids(pool: &PgPool, ids: &[DbId]) -> Result<Vec<Prompt>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM prompts WHERE id = ANY($1)");
        sqlx::query_as::<_, Prompt>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await
    }

    /// List prompts newest first, optionally filtered by a description
    /// substring (case-insensitive).
    pub async fn list(pool: &PgPool, params: &PromptListQuery) -> Result<Vec<Prompt>, sqlx::Error> {
        let limit = clamp_limit(params.limit);
        let offset = clamp_offset(params.offset);
        let pattern = params
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(s)));

        let query = format!(
            "SELECT {COLUMNS} FROM prompts \
             WHERE ($1::TEXT IS NULL OR description ILIKE $1 ESCAPE '\\') \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, Prompt>(&query)
            .bind(pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Delete a prompt. Its runs and their progress rows cascade.
    ///
    /// Returns `true` if a row was deleted.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM prompts WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Map JSON `null` to SQL NULL so the column default applies.
fn non_null(value: &serde_json::Value) -> Option<&serde_json::Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

/// Escape `LIKE` metacharacters in user-supplied search text.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

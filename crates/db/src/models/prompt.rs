//! Prompt entity model and DTOs.

use cosmos_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `prompts` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Prompt {
    pub id: DbId,
    pub description: String,
    pub negative_prompt: Option<String>,
    pub inputs: serde_json::Value,
    pub parameters: serde_json::Value,
    pub parent_prompt_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a prompt. Validated by the orchestrator before insert.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePrompt {
    pub description: String,
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub inputs: serde_json::Value,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub parent_prompt_id: Option<DbId>,
}

/// Query parameters for prompt listing and search.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptListQuery {
    /// Case-insensitive substring match on the description.
    pub search: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

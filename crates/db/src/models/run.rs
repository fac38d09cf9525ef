//! Run entity model and DTOs.

use cosmos_core::outputs::RunOutputs;
use cosmos_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{RunStatus, StatusId};

/// A row from the `runs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Run {
    pub id: DbId,
    pub prompt_id: DbId,
    pub model_type: String,
    pub execution_config: serde_json::Value,
    pub status_id: StatusId,
    pub outputs: Option<serde_json::Value>,
    pub batch_id: Option<uuid::Uuid>,
    pub batch_key: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub cancel_requested_at: Option<Timestamp>,
    pub retry_of_run_id: Option<DbId>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Run {
    pub fn status(&self) -> Option<RunStatus> {
        RunStatus::from_id(self.status_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(RunStatus::is_terminal)
    }

    /// Typed view of the outputs document, if present and well-formed.
    pub fn typed_outputs(&self) -> Option<RunOutputs> {
        self.outputs.as_ref().and_then(RunOutputs::from_value)
    }
}

/// Insert DTO. The orchestrator fills it from a validated execution config.
#[derive(Debug, Clone)]
pub struct CreateRun {
    pub prompt_id: DbId,
    pub model_type: String,
    pub execution_config: serde_json::Value,
    pub batch_key: Option<String>,
    pub retry_of_run_id: Option<DbId>,
}

/// Query parameters for run listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunListQuery {
    /// Filter by status ID (1 = pending ... 5 = cancelled).
    pub status_id: Option<StatusId>,
    pub prompt_id: Option<DbId>,
    pub model_type: Option<String>,
    pub batch_id: Option<uuid::Uuid>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

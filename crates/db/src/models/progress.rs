//! Run progress entries (append-only, observational only).

use cosmos_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Execution stage a progress entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Uploading,
    Executing,
    Downloading,
}

impl ProgressStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Executing => "executing",
            Self::Downloading => "downloading",
        }
    }
}

/// A row from the `run_progress` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RunProgress {
    pub id: DbId,
    pub run_id: DbId,
    pub stage: String,
    pub percent: i16,
    pub message: Option<String>,
    pub created_at: Timestamp,
}

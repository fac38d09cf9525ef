//! Typed outputs document stored in `runs.outputs`.
//!
//! The document is a tagged union keyed by `model_type`. Every variant
//! flattens an [`OutputSummary`], so the persisted JSON always carries
//! `status`, `primary_output_path` and `log_path` regardless of model.

use serde::{Deserialize, Serialize};

use crate::model_type::ModelType;
use crate::types::DbId;

/// Final disposition recorded in the outputs document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    Completed,
    Failed,
    Cancelled,
}

/// One file in the per-run output manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
}

/// Fields shared by every outputs variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSummary {
    pub status: OutputStatus,
    /// Local path of the run's main artifact; `null` when none was produced.
    pub primary_output_path: Option<String>,
    /// Local path of the run's log. Always set, synthesized if necessary.
    pub log_path: String,
    #[serde(default)]
    pub files: Vec<OutputFile>,
    pub exit_code: Option<i32>,
    pub duration_secs: f64,
}

/// Outputs of a generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutputs {
    #[serde(flatten)]
    pub summary: OutputSummary,
    /// Position of the run in its batch descriptor, when batched.
    pub batch_index: Option<usize>,
}

/// Outputs of an upscale run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpscaleOutputs {
    #[serde(flatten)]
    pub summary: OutputSummary,
    pub source_run_id: DbId,
}

/// The `runs.outputs` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum RunOutputs {
    Inference(InferenceOutputs),
    Upscale(UpscaleOutputs),
}

impl RunOutputs {
    pub fn inference(summary: OutputSummary, batch_index: Option<usize>) -> Self {
        Self::Inference(InferenceOutputs {
            summary,
            batch_index,
        })
    }

    pub fn upscale(summary: OutputSummary, source_run_id: DbId) -> Self {
        Self::Upscale(UpscaleOutputs {
            summary,
            source_run_id,
        })
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            Self::Inference(_) => ModelType::Inference,
            Self::Upscale(_) => ModelType::Upscale,
        }
    }

    pub fn summary(&self) -> &OutputSummary {
        match self {
            Self::Inference(o) => &o.summary,
            Self::Upscale(o) => &o.summary,
        }
    }

    pub fn primary_output_path(&self) -> Option<&str> {
        self.summary().primary_output_path.as_deref()
    }

    pub fn log_path(&self) -> &str {
        &self.summary().log_path
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Parse a stored document; `None` for null or foreign shapes.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

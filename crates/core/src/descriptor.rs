//! Batch descriptor builder.
//!
//! Turns one or more (run, prompt) entries into the file-based input
//! contract of the external model process:
//!
//! - `spec.json`: parameters shared by the whole invocation
//! - `batch.jsonl`: one record per run, in claim order, carrying the
//!   per-run overrides (prompt text, control weights, media paths)
//! - `media/run_<id>/...`: the referenced media, staged for upload
//!
//! Record order is the contract for positional reconciliation, so the
//! builder never reorders its entries.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::execution_config::{ControlLevel, ControlModality, InferenceConfig};
use crate::model_type::ModelType;
use crate::types::DbId;

/// File name of the shared parameters document.
pub const SPEC_FILE_NAME: &str = "spec.json";
/// File name of the line-delimited per-run records.
pub const BATCH_FILE_NAME: &str = "batch.jsonl";
/// Directory (relative to the invocation input dir) holding staged media.
pub const MEDIA_DIR_NAME: &str = "media";

/// Token embedded in per-run output names so artifacts can be matched back
/// by identifier when positional reconciliation is not possible.
pub fn output_name(run_id: DbId) -> String {
    format!("run_{run_id}")
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Remote directories assigned to one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationLayout {
    pub input_dir: String,
    pub output_dir: String,
}

/// One generation run to place in a descriptor.
#[derive(Debug, Clone)]
pub struct InferenceEntry {
    pub run_id: DbId,
    pub prompt_text: String,
    pub negative_prompt: Option<String>,
    pub video: Option<String>,
    pub controls: BTreeMap<ControlModality, String>,
    pub config: InferenceConfig,
}

/// One upscale run to place in a descriptor.
#[derive(Debug, Clone)]
pub struct UpscaleEntry {
    pub run_id: DbId,
    pub prompt_text: String,
    /// Local path of the source run's primary output.
    pub source_video: String,
    pub control_weight: f64,
}

// ---------------------------------------------------------------------------
// Contract documents
// ---------------------------------------------------------------------------

/// Contents of `spec.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum InvocationSpec {
    Inference {
        num_steps: u32,
        guidance: f64,
        seed: u64,
        sigma_max: f64,
        resolution: u32,
        fps: u32,
        blur_strength: ControlLevel,
        canny_threshold: ControlLevel,
        batch_input_path: String,
        output_dir: String,
    },
    Upscale {
        control_weight: f64,
        batch_input_path: String,
        output_dir: String,
    },
}

/// Per-run control override inside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlOverride {
    pub control_weight: f64,
    /// Remote path of a pre-computed control video; the model derives the
    /// control on the fly when absent.
    pub input_control: Option<String>,
}

/// One line of `batch.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub index: usize,
    pub run_id: DbId,
    pub output_name: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub input_video_path: Option<String>,
    #[serde(default)]
    pub controls: BTreeMap<ControlModality, ControlOverride>,
}

/// A local file to upload as part of the invocation input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMedia {
    pub local_path: String,
    /// Path relative to the invocation input directory.
    pub relative_path: String,
}

/// Everything needed to materialize one invocation's input directory.
#[derive(Debug, Clone)]
pub struct BatchDescriptor {
    pub model_type: ModelType,
    pub spec: InvocationSpec,
    pub records: Vec<DescriptorRecord>,
    pub media: Vec<StagedMedia>,
}

impl BatchDescriptor {
    /// Run IDs in descriptor order.
    pub fn run_ids(&self) -> Vec<DbId> {
        self.records.iter().map(|r| r.run_id).collect()
    }

    /// Serialize the records as JSON lines, one per run, newline-terminated.
    pub fn to_jsonl(&self) -> Result<String, CoreError> {
        let mut out = String::new();
        for record in &self.records {
            let line = serde_json::to_string(record)
                .map_err(|e| CoreError::Internal(format!("serialize descriptor record: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn spec_json(&self) -> Result<String, CoreError> {
        serde_json::to_string_pretty(&self.spec)
            .map_err(|e| CoreError::Internal(format!("serialize invocation spec: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Build a descriptor for one or more generation runs sharing a batch key.
pub fn build_inference_descriptor(
    entries: &[InferenceEntry],
    layout: &InvocationLayout,
) -> Result<BatchDescriptor, CoreError> {
    let first = entries
        .first()
        .ok_or_else(|| CoreError::Validation("cannot build an empty batch".to_string()))?;
    let key = first.config.batch_key();
    if let Some(odd) = entries.iter().find(|e| e.config.batch_key() != key) {
        return Err(CoreError::Validation(format!(
            "run {} is not batch-compatible with run {}",
            odd.run_id, first.run_id
        )));
    }

    let mut records = Vec::with_capacity(entries.len());
    let mut media = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let input_video_path = entry.video.as_ref().map(|local| {
            stage(&mut media, layout, entry.run_id, "video", local)
        });

        let mut controls = BTreeMap::new();
        for modality in entry.config.active_modalities() {
            let weight = entry.config.weights.get(&modality).copied().unwrap_or(0.0);
            let input_control = entry
                .controls
                .get(&modality)
                .map(|local| stage(&mut media, layout, entry.run_id, modality.as_str(), local));
            controls.insert(
                modality,
                ControlOverride {
                    control_weight: weight,
                    input_control,
                },
            );
        }

        records.push(DescriptorRecord {
            index,
            run_id: entry.run_id,
            output_name: output_name(entry.run_id),
            prompt: entry.prompt_text.clone(),
            negative_prompt: entry.negative_prompt.clone(),
            input_video_path,
            controls,
        });
    }

    let c = &first.config;
    let spec = InvocationSpec::Inference {
        num_steps: c.num_steps,
        guidance: c.guidance,
        seed: c.seed,
        sigma_max: c.sigma_max,
        resolution: c.resolution,
        fps: c.fps,
        blur_strength: c.blur_strength,
        canny_threshold: c.canny_threshold,
        batch_input_path: format!("{}/{BATCH_FILE_NAME}", layout.input_dir),
        output_dir: layout.output_dir.clone(),
    };

    Ok(BatchDescriptor {
        model_type: ModelType::Inference,
        spec,
        records,
        media,
    })
}

/// Build a single-record descriptor for an upscale run.
pub fn build_upscale_descriptor(
    entry: &UpscaleEntry,
    layout: &InvocationLayout,
) -> BatchDescriptor {
    let mut media = Vec::new();
    let input = stage(&mut media, layout, entry.run_id, "source", &entry.source_video);
    let record = DescriptorRecord {
        index: 0,
        run_id: entry.run_id,
        output_name: output_name(entry.run_id),
        prompt: entry.prompt_text.clone(),
        negative_prompt: None,
        input_video_path: Some(input),
        controls: BTreeMap::new(),
    };
    BatchDescriptor {
        model_type: ModelType::Upscale,
        spec: InvocationSpec::Upscale {
            control_weight: entry.control_weight,
            batch_input_path: format!("{}/{BATCH_FILE_NAME}", layout.input_dir),
            output_dir: layout.output_dir.clone(),
        },
        records: vec![record],
        media,
    }
}

/// Register `local` for upload and return its remote path.
fn stage(
    media: &mut Vec<StagedMedia>,
    layout: &InvocationLayout,
    run_id: DbId,
    role: &str,
    local: &str,
) -> String {
    let file_name = Path::new(local)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("input");
    let relative_path = format!("{MEDIA_DIR_NAME}/{}/{role}_{file_name}", output_name(run_id));
    let remote = format!("{}/{relative_path}", layout.input_dir);
    media.push(StagedMedia {
        local_path: local.to_string(),
        relative_path,
    });
    remote
}

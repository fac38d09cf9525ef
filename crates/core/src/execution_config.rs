//! Typed execution configuration for runs.
//!
//! A run's `execution_config` column is a flat JSON document whose shape is
//! selected by the run's [`ModelType`]. Parsing fills in defaults, rejects
//! unknown fields, and validates ranges so that a malformed document is
//! reported before any run row is written.
//!
//! The batch key is the canonical fingerprint of the subset of fields that
//! must be identical across every run sharing one physical invocation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model_type::ModelType;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Limits and defaults
// ---------------------------------------------------------------------------

/// Minimum diffusion step count.
pub const MIN_STEPS: u32 = 1;
/// Maximum diffusion step count.
pub const MAX_STEPS: u32 = 100;
/// Maximum classifier-free guidance value.
pub const MAX_GUIDANCE: f64 = 20.0;
/// Maximum output frame rate.
pub const MAX_FPS: u32 = 60;
/// Output resolutions the model supports.
pub const SUPPORTED_RESOLUTIONS: &[u32] = &[480, 720];

fn default_num_steps() -> u32 {
    35
}
fn default_guidance() -> f64 {
    7.0
}
fn default_seed() -> u64 {
    1
}
fn default_sigma_max() -> f64 {
    70.0
}
fn default_resolution() -> u32 {
    720
}
fn default_fps() -> u32 {
    24
}
fn default_weights() -> BTreeMap<ControlModality, f64> {
    ControlModality::ALL.iter().map(|m| (*m, 0.25)).collect()
}
fn default_upscale_weight() -> f64 {
    0.5
}

// ---------------------------------------------------------------------------
// Control modalities
// ---------------------------------------------------------------------------

/// A control signal the inference model can condition on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlModality {
    Vis,
    Edge,
    Depth,
    Seg,
}

impl ControlModality {
    pub const ALL: [ControlModality; 4] = [Self::Vis, Self::Edge, Self::Depth, Self::Seg];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vis => "vis",
            Self::Edge => "edge",
            Self::Depth => "depth",
            Self::Seg => "seg",
        }
    }
}

impl fmt::Display for ControlModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five-step strength scale used by the blur and edge-threshold settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlLevel {
    VeryLow,
    Low,
    #[default]
    Medium,
    High,
    VeryHigh,
}

impl ControlLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

// ---------------------------------------------------------------------------
// Per-model configs
// ---------------------------------------------------------------------------

/// Execution parameters for controlled video generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InferenceConfig {
    #[serde(default = "default_num_steps")]
    pub num_steps: u32,
    #[serde(default = "default_guidance")]
    pub guidance: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_sigma_max")]
    pub sigma_max: f64,
    #[serde(default = "default_resolution")]
    pub resolution: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub blur_strength: ControlLevel,
    #[serde(default)]
    pub canny_threshold: ControlLevel,
    /// Per-run control weights. May differ between runs of one batch.
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<ControlModality, f64>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            num_steps: default_num_steps(),
            guidance: default_guidance(),
            seed: default_seed(),
            sigma_max: default_sigma_max(),
            resolution: default_resolution(),
            fps: default_fps(),
            blur_strength: ControlLevel::default(),
            canny_threshold: ControlLevel::default(),
            weights: default_weights(),
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(MIN_STEPS..=MAX_STEPS).contains(&self.num_steps) {
            return Err(CoreError::Validation(format!(
                "num_steps must be between {MIN_STEPS} and {MAX_STEPS}, got {}",
                self.num_steps
            )));
        }
        if !(0.0..=MAX_GUIDANCE).contains(&self.guidance) {
            return Err(CoreError::Validation(format!(
                "guidance must be between 0 and {MAX_GUIDANCE}, got {}",
                self.guidance
            )));
        }
        if !self.sigma_max.is_finite() || self.sigma_max <= 0.0 {
            return Err(CoreError::Validation(format!(
                "sigma_max must be positive, got {}",
                self.sigma_max
            )));
        }
        if !SUPPORTED_RESOLUTIONS.contains(&self.resolution) {
            return Err(CoreError::Validation(format!(
                "resolution must be one of {SUPPORTED_RESOLUTIONS:?}, got {}",
                self.resolution
            )));
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(CoreError::Validation(format!(
                "fps must be between 1 and {MAX_FPS}, got {}",
                self.fps
            )));
        }
        for (modality, weight) in &self.weights {
            if !(0.0..=1.0).contains(weight) {
                return Err(CoreError::Validation(format!(
                    "weight for {modality} must be between 0 and 1, got {weight}"
                )));
            }
        }
        if !self.weights.values().any(|w| *w > 0.0) {
            return Err(CoreError::Validation(
                "at least one control weight must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Modalities with a non-zero weight, in canonical order.
    pub fn active_modalities(&self) -> Vec<ControlModality> {
        self.weights
            .iter()
            .filter(|(_, w)| **w > 0.0)
            .map(|(m, _)| *m)
            .collect()
    }

    /// Canonical fingerprint of the fields shared by a whole invocation.
    pub fn batch_key(&self) -> String {
        format!(
            "inference:steps={};guidance={};seed={};sigma_max={};resolution={};fps={};blur={};canny={}",
            self.num_steps,
            self.guidance,
            self.seed,
            self.sigma_max,
            self.resolution,
            self.fps,
            self.blur_strength.as_str(),
            self.canny_threshold.as_str(),
        )
    }
}

/// Execution parameters for upscaling a finished inference run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpscaleConfig {
    pub source_run_id: DbId,
    #[serde(default = "default_upscale_weight")]
    pub control_weight: f64,
}

impl UpscaleConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&self.control_weight) {
            return Err(CoreError::Validation(format!(
                "control_weight must be between 0 and 1, got {}",
                self.control_weight
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Discriminated config
// ---------------------------------------------------------------------------

/// A run's execution config, selected by its model type.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionConfig {
    Inference(InferenceConfig),
    Upscale(UpscaleConfig),
}

impl ExecutionConfig {
    /// Parse and validate a raw config document for `model_type`.
    ///
    /// Missing fields take their defaults; unknown fields are rejected.
    pub fn parse(model_type: ModelType, raw: &serde_json::Value) -> Result<Self, CoreError> {
        let raw = if raw.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            raw.clone()
        };
        let config = match model_type {
            ModelType::Inference => Self::Inference(
                serde_json::from_value(raw)
                    .map_err(|e| CoreError::Validation(format!("invalid inference config: {e}")))?,
            ),
            ModelType::Upscale => Self::Upscale(
                serde_json::from_value(raw)
                    .map_err(|e| CoreError::Validation(format!("invalid upscale config: {e}")))?,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            Self::Inference(_) => ModelType::Inference,
            Self::Upscale(_) => ModelType::Upscale,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::Inference(c) => c.validate(),
            Self::Upscale(c) => c.validate(),
        }
    }

    /// Batch key, or `None` when the model type never batches.
    pub fn batch_key(&self) -> Option<String> {
        match self {
            Self::Inference(c) => Some(c.batch_key()),
            Self::Upscale(_) => None,
        }
    }

    /// Normalized document (defaults filled in) for persistence.
    pub fn to_value(&self) -> serde_json::Value {
        let value = match self {
            Self::Inference(c) => serde_json::to_value(c),
            Self::Upscale(c) => serde_json::to_value(c),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

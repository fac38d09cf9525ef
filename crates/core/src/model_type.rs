//! Model types understood by the executor.
//!
//! The model type is the discriminator for both the execution config and the
//! outputs document of a run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Which external model a run invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Controlled video generation from a prompt and control inputs.
    Inference,
    /// Upscaling of a completed inference run's video.
    Upscale,
}

impl ModelType {
    /// Database / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inference => "inference",
            Self::Upscale => "upscale",
        }
    }

    /// Whether runs of this type may share one physical invocation.
    pub fn supports_batching(self) -> bool {
        matches!(self, Self::Inference)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inference" => Ok(Self::Inference),
            "upscale" => Ok(Self::Upscale),
            other => Err(CoreError::Validation(format!(
                "Unknown model type '{other}'. Must be one of: inference, upscale"
            ))),
        }
    }
}

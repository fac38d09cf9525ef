//! Prompt input validation.
//!
//! A prompt references its media by local path. Paths are checked at
//! creation time so that a missing file is reported as a validation error
//! instead of surfacing later as a failed invocation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::execution_config::ControlModality;

/// Maximum prompt description length in characters.
pub const MAX_DESCRIPTION_LEN: usize = 8_000;

/// Media references attached to a prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptInputs {
    /// Source video the generation is conditioned on.
    #[serde(default)]
    pub video: Option<String>,
    /// Pre-computed control videos keyed by modality.
    #[serde(default)]
    pub controls: BTreeMap<ControlModality, String>,
}

impl PromptInputs {
    /// Parse an inputs document. `null` means "no inputs".
    pub fn parse(raw: &serde_json::Value) -> Result<Self, CoreError> {
        if raw.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(raw.clone())
            .map_err(|e| CoreError::Validation(format!("invalid prompt inputs: {e}")))
    }

    /// Every referenced path, video first.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.video
            .iter()
            .chain(self.controls.values())
            .map(String::as_str)
    }

    /// Check every referenced file exists on the local filesystem.
    pub fn validate_paths_exist(&self) -> Result<(), CoreError> {
        for path in self.paths() {
            if !Path::new(path).is_file() {
                return Err(CoreError::Validation(format!(
                    "input file does not exist: {path}"
                )));
            }
        }
        Ok(())
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Validate a prompt description.
pub fn validate_description(description: &str) -> Result<(), CoreError> {
    if description.trim().is_empty() {
        return Err(CoreError::Validation(
            "prompt description must not be empty".to_string(),
        ));
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(CoreError::Validation(format!(
            "prompt description exceeds {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate the free-form parameters document: it must be a JSON object.
pub fn validate_parameters(parameters: &serde_json::Value) -> Result<(), CoreError> {
    if parameters.is_null() || parameters.is_object() {
        Ok(())
    } else {
        Err(CoreError::Validation(
            "prompt parameters must be a JSON object".to_string(),
        ))
    }
}

//! Materializing a descriptor into a local input directory.

use std::path::Path;

use cosmos_core::descriptor::{BatchDescriptor, BATCH_FILE_NAME, SPEC_FILE_NAME};

/// Write `spec.json`, `batch.jsonl` and the staged media under `input_dir`,
/// replacing anything already there.
pub fn write_input_dir(descriptor: &BatchDescriptor, input_dir: &Path) -> std::io::Result<()> {
    if input_dir.exists() {
        std::fs::remove_dir_all(input_dir)?;
    }
    std::fs::create_dir_all(input_dir)?;

    let spec = descriptor.spec_json().map_err(std::io::Error::other)?;
    std::fs::write(input_dir.join(SPEC_FILE_NAME), spec)?;

    let records = descriptor.to_jsonl().map_err(std::io::Error::other)?;
    std::fs::write(input_dir.join(BATCH_FILE_NAME), records)?;

    for media in &descriptor.media {
        let target = input_dir.join(&media.relative_path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&media.local_path, &target).map_err(|e| {
            std::io::Error::new(e.kind(), format!("stage {}: {e}", media.local_path))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use cosmos_core::descriptor::{build_inference_descriptor, InferenceEntry, InvocationLayout};
    use cosmos_core::execution_config::InferenceConfig;

    use super::*;

    #[test]
    fn writes_contract_files_and_media() {
        let src = tempfile::tempdir().unwrap();
        let video = src.path().join("clip.mp4");
        std::fs::write(&video, b"video").unwrap();

        let entry = InferenceEntry {
            run_id: 9,
            prompt_text: "a robot arm".to_string(),
            negative_prompt: None,
            video: Some(video.display().to_string()),
            controls: BTreeMap::new(),
            config: InferenceConfig::default(),
        };
        let layout = InvocationLayout {
            input_dir: "/remote/inputs/x".to_string(),
            output_dir: "/remote/outputs/x".to_string(),
        };
        let descriptor = build_inference_descriptor(&[entry], &layout).unwrap();

        let staging = tempfile::tempdir().unwrap();
        let input_dir = staging.path().join("input");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::write(input_dir.join("stale"), b"x").unwrap();

        write_input_dir(&descriptor, &input_dir).unwrap();

        assert!(input_dir.join(SPEC_FILE_NAME).is_file());
        let jsonl = std::fs::read_to_string(input_dir.join(BATCH_FILE_NAME)).unwrap();
        assert_eq!(jsonl.lines().count(), 1);
        assert!(input_dir.join("media/run_9/video_clip.mp4").is_file());
        assert!(!input_dir.join("stale").exists());
    }

    #[test]
    fn missing_media_is_an_error() {
        let entry = InferenceEntry {
            run_id: 1,
            prompt_text: "p".to_string(),
            negative_prompt: None,
            video: Some("/nonexistent/clip.mp4".to_string()),
            controls: BTreeMap::new(),
            config: InferenceConfig::default(),
        };
        let layout = InvocationLayout {
            input_dir: "/r/in".to_string(),
            output_dir: "/r/out".to_string(),
        };
        let descriptor = build_inference_descriptor(&[entry], &layout).unwrap();
        let staging = tempfile::tempdir().unwrap();
        let err = write_input_dir(&descriptor, &staging.path().join("input")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/clip.mp4"));
    }
}

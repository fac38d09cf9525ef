//! Mapping a batch's shared output directory back to individual runs.
//!
//! The model process names artifacts with a sequence index in descriptor
//! order (`output_0.mp4`, `output_1.mp4`, ...) and may also embed the
//! record's output name (`..._run_<id>...`). Reconciliation is positional
//! when the artifact count matches the descriptor; otherwise it falls back
//! to the embedded identifiers and leaves the rest unmatched.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::DbId;

/// File extensions treated as primary artifacts.
pub const ARTIFACT_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv"];

static RUN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"run_(\d+)").expect("valid regex"));

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// How a plan paired artifacts with runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Sorted artifacts zipped against descriptor order.
    Positional,
    /// Artifacts matched by their embedded `run_<id>` token.
    Identifier,
}

/// The artifact (if any) assigned to one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactAssignment {
    pub run_id: DbId,
    pub batch_index: usize,
    pub artifact: Option<String>,
}

/// Result of reconciling one output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub strategy: MatchStrategy,
    pub assignments: Vec<ArtifactAssignment>,
}

impl ReconciliationPlan {
    pub fn unmatched(&self) -> impl Iterator<Item = &ArtifactAssignment> {
        self.assignments.iter().filter(|a| a.artifact.is_none())
    }

    pub fn matched_count(&self) -> usize {
        self.assignments.iter().filter(|a| a.artifact.is_some()).count()
    }
}

/// Whether a file name looks like a primary artifact.
pub fn is_artifact(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| ARTIFACT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// The run ID embedded in a file name, if any.
pub fn embedded_run_id(name: &str) -> Option<DbId> {
    RUN_ID_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// The sequence index embedded in a file name: the last number outside any
/// `run_<id>` token.
pub fn sequence_index(name: &str) -> Option<u64> {
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    let without_ids = RUN_ID_RE.replace_all(stem, "");
    DIGITS_RE
        .find_iter(&without_ids)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}

/// Pair `artifact_names` (any order, non-artifacts ignored) with
/// `expected_runs` (descriptor order).
pub fn plan(expected_runs: &[DbId], artifact_names: &[String]) -> ReconciliationPlan {
    let mut artifacts: Vec<&String> = artifact_names.iter().filter(|n| is_artifact(n)).collect();
    artifacts.sort_by(|a, b| {
        let ka = (sequence_index(a).unwrap_or(u64::MAX), a.as_str());
        let kb = (sequence_index(b).unwrap_or(u64::MAX), b.as_str());
        ka.cmp(&kb)
    });

    if artifacts.len() == expected_runs.len() {
        let assignments = expected_runs
            .iter()
            .zip(artifacts)
            .enumerate()
            .map(|(batch_index, (run_id, artifact))| ArtifactAssignment {
                run_id: *run_id,
                batch_index,
                artifact: Some(artifact.clone()),
            })
            .collect();
        return ReconciliationPlan {
            strategy: MatchStrategy::Positional,
            assignments,
        };
    }

    let assignments = expected_runs
        .iter()
        .enumerate()
        .map(|(batch_index, run_id)| ArtifactAssignment {
            run_id: *run_id,
            batch_index,
            artifact: artifacts
                .iter()
                .find(|name| embedded_run_id(name) == Some(*run_id))
                .map(|name| (*name).clone()),
        })
        .collect();

    ReconciliationPlan {
        strategy: MatchStrategy::Identifier,
        assignments,
    }
}

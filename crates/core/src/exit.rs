//! Exit-code taxonomy for model invocations.
//!
//! | Exit                         | Cancel requested | Disposition |
//! |------------------------------|------------------|-------------|
//! | `0`                          | any              | completed   |
//! | `137` / `143` (KILL / TERM)  | yes              | cancelled   |
//! | `137` / `143`                | no               | failed      |
//! | any other                    | any              | failed      |

use serde::{Deserialize, Serialize};

/// Exit code reported for a container stopped with SIGKILL.
pub const EXIT_SIGKILL: i32 = 137;
/// Exit code reported for a container stopped with SIGTERM.
pub const EXIT_SIGTERM: i32 = 143;

/// Category of a run failure, stored in `error_details.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The gateway could not run a command or move files.
    Transport,
    /// The model process exited nonzero or reported an error marker.
    Execution,
    /// The invocation exceeded its time budget and was killed.
    Timeout,
    /// The invocation finished but this run's artifact was not found.
    Reconciliation,
    /// The orchestrator that owned the run exited before finishing it.
    Orphaned,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::Reconciliation => "reconciliation",
            Self::Orphaned => "orphaned",
        }
    }
}

/// What an invocation's exit means for its runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitDisposition {
    Completed,
    Cancelled,
    Failed { reason: String },
}

/// Whether `exit_code` is what a signal-terminated container reports.
pub fn is_termination_code(exit_code: i32) -> bool {
    matches!(exit_code, EXIT_SIGKILL | EXIT_SIGTERM)
}

/// Classify an invocation exit.
pub fn classify_exit(exit_code: i32, cancel_requested: bool) -> ExitDisposition {
    match exit_code {
        0 => ExitDisposition::Completed,
        code if is_termination_code(code) && cancel_requested => ExitDisposition::Cancelled,
        code if is_termination_code(code) => ExitDisposition::Failed {
            reason: format!("process was terminated by a signal (exit code {code})"),
        },
        code => ExitDisposition::Failed {
            reason: format!("process exited with code {code}"),
        },
    }
}

/// Keep at most the last `max_chars` characters of a captured stream.
pub fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn zero_is_completed_even_with_cancel() {
        assert_eq!(classify_exit(0, false), ExitDisposition::Completed);
        assert_eq!(classify_exit(0, true), ExitDisposition::Completed);
    }

    #[test]
    fn kill_with_cancel_is_cancelled() {
        assert_eq!(classify_exit(EXIT_SIGKILL, true), ExitDisposition::Cancelled);
        assert_eq!(classify_exit(EXIT_SIGTERM, true), ExitDisposition::Cancelled);
    }

    #[test]
    fn kill_without_cancel_is_failed() {
        assert_matches!(
            classify_exit(EXIT_SIGKILL, false),
            ExitDisposition::Failed { reason } if reason.contains("signal")
        );
    }

    #[test]
    fn other_nonzero_is_failed_even_with_cancel() {
        assert_matches!(
            classify_exit(1, true),
            ExitDisposition::Failed { reason } if reason.contains("code 1")
        );
    }

    #[test]
    fn tail_keeps_end_of_text() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let value = serde_json::to_value(FailureKind::Reconciliation).unwrap();
        assert_eq!(value, "reconciliation");
        assert_eq!(FailureKind::Orphaned.as_str(), "orphaned");
    }
}

//! Run lifecycle constants and state machine.
//!
//! Status IDs match the `run_statuses` seed data (1-based SMALLSERIAL). The
//! `db` crate exposes the same values as the `RunStatus` enum; they are
//! repeated here because `core` has no internal dependencies.
//!
//! Transitions are monotonic:
//!
//! ```text
//! pending -> running -> completed | failed | cancelled
//! pending -> cancelled
//! ```

/// Run is waiting in the queue.
pub const STATUS_PENDING: i16 = 1;
/// Run has been claimed and its invocation is in flight.
pub const STATUS_RUNNING: i16 = 2;
/// Run finished and its primary output was reconciled.
pub const STATUS_COMPLETED: i16 = 3;
/// Run finished without a usable output.
pub const STATUS_FAILED: i16 = 4;
/// Run was cancelled by a caller.
pub const STATUS_CANCELLED: i16 = 5;

/// Terminal statuses: completed, failed, cancelled.
pub const TERMINAL_STATUSES: [i16; 3] = [STATUS_COMPLETED, STATUS_FAILED, STATUS_CANCELLED];

/// Human-readable name for a status ID, as used in API payloads and logs.
pub fn status_name(status_id: i16) -> &'static str {
    match status_id {
        STATUS_PENDING => "pending",
        STATUS_RUNNING => "running",
        STATUS_COMPLETED => "completed",
        STATUS_FAILED => "failed",
        STATUS_CANCELLED => "cancelled",
        _ => "unknown",
    }
}

/// Parse a status name back into its ID.
pub fn status_id_from_name(name: &str) -> Option<i16> {
    match name {
        "pending" => Some(STATUS_PENDING),
        "running" => Some(STATUS_RUNNING),
        "completed" => Some(STATUS_COMPLETED),
        "failed" => Some(STATUS_FAILED),
        "cancelled" => Some(STATUS_CANCELLED),
        _ => None,
    }
}

/// Whether the status admits no further transitions.
pub fn is_terminal(status_id: i16) -> bool {
    TERMINAL_STATUSES.contains(&status_id)
}

/// Returns the set of valid target status IDs reachable from `from_status`.
pub fn valid_transitions(from_status: i16) -> &'static [i16] {
    match from_status {
        STATUS_PENDING => &[STATUS_RUNNING, STATUS_CANCELLED],
        STATUS_RUNNING => &[STATUS_COMPLETED, STATUS_FAILED, STATUS_CANCELLED],
        _ => &[],
    }
}

/// Check whether a transition from `from` to `to` is valid.
pub fn can_transition(from: i16, to: i16) -> bool {
    valid_transitions(from).contains(&to)
}

/// Validate a state transition, returning an error message for invalid ones.
pub fn validate_transition(from: i16, to: i16) -> Result<(), String> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(format!(
            "Invalid run transition: {} -> {}",
            status_name(from),
            status_name(to)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_start_or_cancel() {
        assert!(can_transition(STATUS_PENDING, STATUS_RUNNING));
        assert!(can_transition(STATUS_PENDING, STATUS_CANCELLED));
        assert!(!can_transition(STATUS_PENDING, STATUS_COMPLETED));
        assert!(!can_transition(STATUS_PENDING, STATUS_FAILED));
    }

    #[test]
    fn running_reaches_every_terminal_state() {
        for to in TERMINAL_STATUSES {
            assert!(can_transition(STATUS_RUNNING, to));
        }
        assert!(!can_transition(STATUS_RUNNING, STATUS_PENDING));
    }

    #[test]
    fn terminal_states_are_final() {
        for from in TERMINAL_STATUSES {
            assert!(is_terminal(from));
            assert!(valid_transitions(from).is_empty());
        }
        assert!(!is_terminal(STATUS_PENDING));
        assert!(!is_terminal(STATUS_RUNNING));
    }

    #[test]
    fn validate_transition_reports_names() {
        let err = validate_transition(STATUS_COMPLETED, STATUS_RUNNING).unwrap_err();
        assert_eq!(err, "Invalid run transition: completed -> running");
    }

    #[test]
    fn names_round_trip() {
        for id in 1..=5 {
            assert_eq!(status_id_from_name(status_name(id)), Some(id));
        }
        assert_eq!(status_name(42), "unknown");
        assert_eq!(status_id_from_name("queued"), None);
    }
}

//! Run status enum mapping to the `run_statuses` lookup table.
//!
//! Each variant's discriminant matches the seed data order (1-based) and the
//! constants in `cosmos_core::run_lifecycle`.

use cosmos_core::run_lifecycle;
use serde::Serialize;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

/// Run lifecycle status.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl RunStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Look up a status by database ID.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(Self::Pending),
            2 => Some(Self::Running),
            3 => Some(Self::Completed),
            4 => Some(Self::Failed),
            5 => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Look up a status by its seed name (`"pending"`, `"running"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        run_lifecycle::status_id_from_name(name).and_then(Self::from_id)
    }

    pub fn name(self) -> &'static str {
        run_lifecycle::status_name(self.id())
    }

    pub fn is_terminal(self) -> bool {
        run_lifecycle::is_terminal(self.id())
    }
}

impl From<RunStatus> for StatusId {
    fn from(value: RunStatus) -> Self {
        value as StatusId
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_ids_match_seed_data() {
        assert_eq!(RunStatus::Pending.id(), 1);
        assert_eq!(RunStatus::Running.id(), 2);
        assert_eq!(RunStatus::Completed.id(), 3);
        assert_eq!(RunStatus::Failed.id(), 4);
        assert_eq!(RunStatus::Cancelled.id(), 5);
    }

    #[test]
    fn run_status_ids_match_core_constants() {
        assert_eq!(RunStatus::Pending.id(), run_lifecycle::STATUS_PENDING);
        assert_eq!(RunStatus::Running.id(), run_lifecycle::STATUS_RUNNING);
        assert_eq!(RunStatus::Completed.id(), run_lifecycle::STATUS_COMPLETED);
        assert_eq!(RunStatus::Failed.id(), run_lifecycle::STATUS_FAILED);
        assert_eq!(RunStatus::Cancelled.id(), run_lifecycle::STATUS_CANCELLED);
    }

    #[test]
    fn status_into_status_id() {
        let id: StatusId = RunStatus::Failed.into();
        assert_eq!(id, 4);
    }

    #[test]
    fn names_and_terminal_flags() {
        assert_eq!(RunStatus::from_name("cancelled"), Some(RunStatus::Cancelled));
        assert_eq!(RunStatus::Running.name(), "running");
        assert!(RunStatus::Completed.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert_eq!(RunStatus::from_id(9), None);
    }
}

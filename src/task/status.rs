/// Task status definitions as persisted in the task store
use serde::{Deserialize, Serialize};
use std::fmt;

/// Durable status of a task
///
/// `Active` covers every non-terminal scheduling phase (pending, delayed and
/// in-flight); the finer-grained phase only exists in the scheduler's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task is waiting for dispatch or currently dispatched
    Active,

    /// Task was fetched and processed successfully
    Success,

    /// Task exhausted its retry budget
    Failed,

    /// Task was malformed or cancelled; never retried
    Bad,
}

impl TaskStatus {
    /// Returns true if the scheduler no longer tracks a task in this status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Bad => "bad",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "bad" => Some(Self::Bad),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all() -> [Self; 4] {
        [Self::Active, Self::Success, Self::Failed, Self::Bad]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_string_roundtrip() {
        for status in TaskStatus::all() {
            assert_eq!(
                TaskStatus::from_db_string(status.to_db_string()),
                Some(status)
            );
        }
        assert_eq!(TaskStatus::from_db_string("processing"), None);
    }

    #[test]
    fn test_only_active_is_non_terminal() {
        assert!(!TaskStatus::Active.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Bad.is_terminal());
    }
}

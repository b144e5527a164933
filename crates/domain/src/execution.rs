//! Classification of one task run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a run ended. This is the only channel through which a task says
/// whether its entry may run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionResult {
    Success,
    /// Failed, but the entry stays eligible.
    SoftFailure,
    /// Failed in a way that disables the entry.
    HardFailure,
}

impl ExecutionResult {
    pub fn is_success(self) -> bool {
        matches!(self, ExecutionResult::Success)
    }

    pub fn is_failure(self) -> bool {
        !self.is_success()
    }

    /// Whether retrying makes sense. A success needs no retry.
    pub fn can_retry(self) -> bool {
        matches!(self, ExecutionResult::SoftFailure)
    }

    pub fn disables_entry(self) -> bool {
        matches!(self, ExecutionResult::HardFailure)
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionResult::Success => "SUCCESS",
            ExecutionResult::SoftFailure => "SOFT_FAILURE",
            ExecutionResult::HardFailure => "HARD_FAILURE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_flags() {
        assert!(ExecutionResult::Success.is_success());
        assert!(!ExecutionResult::Success.is_failure());
        assert!(!ExecutionResult::Success.can_retry());

        assert!(ExecutionResult::SoftFailure.is_failure());
        assert!(ExecutionResult::SoftFailure.can_retry());
        assert!(!ExecutionResult::SoftFailure.disables_entry());

        assert!(ExecutionResult::HardFailure.is_failure());
        assert!(!ExecutionResult::HardFailure.can_retry());
        assert!(ExecutionResult::HardFailure.disables_entry());
    }

    #[test]
    fn serializes_in_screaming_case() {
        let json = serde_json::to_string(&ExecutionResult::SoftFailure).unwrap();
        assert_eq!(json, "\"SOFT_FAILURE\"");
        let parsed: ExecutionResult = serde_json::from_str("\"HARD_FAILURE\"").unwrap();
        assert_eq!(parsed, ExecutionResult::HardFailure);
    }
}

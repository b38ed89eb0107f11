//! Test steps: the per-run checklist the tracker keeps current.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Passed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::NotStarted => "not_started",
            StepStatus::InProgress => "in_progress",
            StepStatus::Passed => "passed",
            StepStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Passed | StepStatus::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "not_started" => Ok(StepStatus::NotStarted),
            "in_progress" => Ok(StepStatus::InProgress),
            "passed" => Ok(StepStatus::Passed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(format!("unknown step status '{}'", other)),
        }
    }
}

/// One planned step of a test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    pub id: u32,
    pub instruction: String,
    #[serde(default)]
    pub expected_result: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TestStep {
    pub fn new(id: u32, instruction: impl Into<String>, expected_result: impl Into<String>) -> Self {
        Self {
            id,
            instruction: instruction.into(),
            expected_result: expected_result.into(),
            status: StepStatus::NotStarted,
            notes: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            StepStatus::NotStarted,
            StepStatus::InProgress,
            StepStatus::Passed,
            StepStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<StepStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_status_rejects_unknown() {
        assert!("done".parse::<StepStatus>().is_err());
        assert!("".parse::<StepStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&StepStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_step_serializes_without_empty_notes() {
        let step = TestStep::new(1, "Open the page", "The page loads");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["status"], "not_started");
        assert!(json.get("notes").is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(StepStatus::Passed.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(!StepStatus::InProgress.is_terminal());
        assert!(!StepStatus::NotStarted.is_terminal());
    }
}

//! Report synthesis: the contract handed to downstream renderers.

use crate::engine::ExecutionState;
use crate::step::{StepStatus, TestStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything a renderer needs about a finished run. Serialized as-is for
/// the JSON report file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub test_steps: Vec<TestStep>,
    pub summary: String,
    /// Passed steps over total, as a percentage. Zero for an empty plan.
    pub pass_rate: f64,
    pub execution_time_ms: u64,
    pub last_error: Option<String>,
    pub recommendations: Vec<String>,
    pub critical_issues: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl TestReport {
    /// Assemble the report from the final state. `steps` must already be in
    /// their terminal shape; the tracker's last reconcile has run.
    pub fn synthesize(steps: Vec<TestStep>, state: &ExecutionState) -> Self {
        let total = steps.len();
        let passed = steps
            .iter()
            .filter(|s| s.status == StepStatus::Passed)
            .count();
        let failed: Vec<&TestStep> = steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .collect();
        let pass_rate = if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64 * 100.0
        };
        let execution_time_ms = state.duration_ms.unwrap_or(0);

        let summary = if total == 0 {
            "No steps were planned; nothing was executed.".to_string()
        } else {
            format!(
                "{} of {} steps passed ({:.0}%) in {:.1}s",
                passed,
                total,
                pass_rate,
                execution_time_ms as f64 / 1000.0
            )
        };

        let mut critical_issues = Vec::new();
        if let Some(error) = &state.last_error {
            critical_issues.push(error.clone());
        }

        let mut recommendations = Vec::new();
        for step in &failed {
            let mut line = format!("Review step {}: {}", step.id, step.instruction);
            if let Some(notes) = &step.notes {
                line.push_str(&format!(" ({})", notes));
            }
            recommendations.push(line);
        }
        let unexercised = steps
            .iter()
            .filter(|s| s.status == StepStatus::NotStarted)
            .count();
        if state.last_error.is_some() && unexercised > 0 {
            recommendations.push(format!(
                "{} step(s) were never reached; rerun after addressing the failure",
                unexercised
            ));
        }

        Self {
            test_steps: steps,
            summary,
            pass_rate,
            execution_time_ms,
            last_error: state.last_error.clone(),
            recommendations,
            critical_issues,
            generated_at: Utc::now(),
        }
    }

    /// A run counts as passing only when nothing errored and no step failed.
    pub fn passed(&self) -> bool {
        self.last_error.is_none()
            && !self
                .test_steps
                .iter()
                .any(|s| s.status == StepStatus::Failed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CycleEvent, ExecutionState};

    fn finished_state(error: Option<&str>) -> ExecutionState {
        let mut state = ExecutionState::new(3);
        state.begin();
        match error {
            Some(e) => state.finish(CycleEvent::VerificationExhausted, Some(e.to_string())),
            None => state.finish(CycleEvent::CompletedWithoutTool, None),
        }
        state
    }

    fn step(id: u32, status: StepStatus) -> TestStep {
        let mut s = TestStep::new(id, format!("step {}", id), "");
        s.status = status;
        s
    }

    #[test]
    fn test_pass_rate_math() {
        let steps = vec![
            step(1, StepStatus::Passed),
            step(2, StepStatus::Passed),
            step(3, StepStatus::Failed),
            step(4, StepStatus::NotStarted),
        ];
        let report = TestReport::synthesize(steps, &finished_state(Some("boom")));
        assert!((report.pass_rate - 50.0).abs() < f64::EPSILON);
        assert!(!report.passed());
    }

    #[test]
    fn test_empty_plan_report() {
        let report = TestReport::synthesize(Vec::new(), &finished_state(None));
        assert_eq!(report.pass_rate, 0.0);
        assert!(report.summary.contains("No steps were planned"));
        assert!(report.passed());
        assert!(report.recommendations.is_empty());
        assert!(report.critical_issues.is_empty());
    }

    #[test]
    fn test_failed_steps_drive_recommendations() {
        let mut failing = step(2, StepStatus::Failed);
        failing.notes = Some("cart badge never updated".to_string());
        let steps = vec![step(1, StepStatus::Passed), failing, step(3, StepStatus::NotStarted)];
        let report = TestReport::synthesize(
            steps,
            &finished_state(Some("Verification failed after 3 retries: cart badge never updated")),
        );
        assert_eq!(report.critical_issues.len(), 1);
        assert!(report.recommendations[0].contains("Review step 2"));
        assert!(report.recommendations[0].contains("cart badge never updated"));
        assert!(report.recommendations[1].contains("never reached"));
    }

    #[test]
    fn test_clean_run_report() {
        let steps = vec![step(1, StepStatus::Passed), step(2, StepStatus::Passed)];
        let report = TestReport::synthesize(steps, &finished_state(None));
        assert!(report.passed());
        assert!(report.summary.starts_with("2 of 2 steps passed (100%)"));
        assert!(report.last_error.is_none());
    }

    #[test]
    fn test_report_serializes_snake_case() {
        let report = TestReport::synthesize(vec![step(1, StepStatus::Passed)], &finished_state(None));
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("test_steps").is_some());
        assert!(json.get("pass_rate").is_some());
        assert!(json.get("generated_at").is_some());
    }
}

//! Progress tracking: reconciles the step checklist after every cycle.
//!
//! The reasoner proposes the full updated checklist; deterministic merge
//! rules then defend against short, inflated, or contradictory proposals.
//! A failed reconciliation never fails the run.

use crate::engine::ExecutionState;
use crate::protocol::{first_json_array, Verdict, VerdictOutcome};
use crate::reasoner::Reasoner;
use crate::step::{StepStatus, TestStep};
use crate::transcript::Turn;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

// How many trailing turns of the transcript the tracker reads.
const TAIL_TURNS: usize = 8;

// Deliberately separate from the engine's verdict parsing. This pattern
// reads the rendered tail, where markers sit mid-line after a turn prefix,
// so it is not line-anchored.
static TAIL_VERDICT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"VERIFICATION:\s*(SUCCESS|FAILURE)\s*(?:-\s*)?([^\n]*)")
        .expect("tail verdict regex")
});

const TRACK_SYSTEM: &str = "You maintain the status checklist of a browser test run. Given the checklist and what just happened, return the full updated checklist as a JSON array. You reply with JSON only.";

#[derive(serde::Deserialize)]
struct ProposedStatus {
    id: u32,
    status: String,
    #[serde(default)]
    notes: Option<String>,
}

/// Reconciles step statuses against what the engine just did.
pub struct ProgressTracker {
    reasoner: Arc<dyn Reasoner>,
}

impl ProgressTracker {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }

    /// Bring `steps` up to date with the latest cycle. When the structured
    /// call errors or returns garbage, the list is left exactly as it was.
    pub async fn reconcile(&self, steps: &mut [TestStep], state: &ExecutionState) {
        if steps.is_empty() {
            return;
        }
        let current_id = steps
            .iter()
            .find(|s| s.status == StepStatus::InProgress)
            .map(|s| s.id);
        let verdict = extract_tail_verdict(&state.transcript.tail_text(TAIL_TURNS));

        let proposal = match self.propose(steps, state, verdict.as_ref()).await {
            Ok(p) => p,
            Err(e) => {
                warn!("step reconciliation failed, statuses unchanged: {}", e);
                return;
            }
        };

        apply_proposal(steps, proposal);
        apply_verdict_precedence(steps, verdict.as_ref(), current_id, state);
        repair_in_progress(steps, state);
        debug!(
            "checklist now: {}",
            steps
                .iter()
                .map(|s| format!("{}:{}", s.id, s.status))
                .collect::<Vec<_>>()
                .join(" ")
        );
    }

    async fn propose(
        &self,
        steps: &[TestStep],
        state: &ExecutionState,
        verdict: Option<&Verdict>,
    ) -> Result<Vec<ProposedStatus>> {
        let mut prompt = String::from("Checklist:\n");
        for s in steps {
            prompt.push_str(&format!("  {}. [{}] {}\n", s.id, s.status, s.instruction));
        }
        if let Some(action) = &state.last_action {
            prompt.push_str(&format!("\nLast action: {}\n", action));
        }
        if let Some(expected) = &state.expected_outcome {
            prompt.push_str(&format!("Expected outcome: {}\n", expected));
        }
        match verdict {
            Some(v) => prompt.push_str(&format!(
                "Latest verification: {} - {}\n",
                if v.passed() { "SUCCESS" } else { "FAILURE" },
                v.explanation
            )),
            None => prompt.push_str("Latest verification: none this cycle\n"),
        }
        if state.retry_count > 0 {
            prompt.push_str(&format!(
                "Retrying the current action: attempt {}/{}\n",
                state.retry_count, state.max_retries
            ));
        }
        if state.is_complete {
            prompt.push_str("The run has ended.\n");
            if let Some(error) = &state.last_error {
                prompt.push_str(&format!("Run error: {}\n", error));
            }
        }
        prompt.push_str("\nRecent activity:\n");
        prompt.push_str(&state.transcript.tail_text(TAIL_TURNS));
        prompt.push_str(
            "\n\nReturn a JSON array covering every step id, for example \
             [{\"id\": 1, \"status\": \"passed\", \"notes\": \"optional detail\"}]. \
             Valid statuses: not_started, in_progress, passed, failed.",
        );

        let turns = [Turn::User { text: prompt }];
        let reply = self.reasoner.respond(TRACK_SYSTEM, &turns, &[]).await?;
        let array = first_json_array(&reply.text).ok_or_else(|| {
            Error::StructuredOutput("no JSON array in checklist reply".to_string())
        })?;
        serde_json::from_value(array)
            .map_err(|e| Error::StructuredOutput(format!("checklist entries: {}", e)))
    }
}

/// Newest verdict in the transcript tail, if any.
fn extract_tail_verdict(tail: &str) -> Option<Verdict> {
    let caps = TAIL_VERDICT_RE.captures_iter(tail).last()?;
    let outcome = if &caps[1] == "SUCCESS" {
        VerdictOutcome::Success
    } else {
        VerdictOutcome::Failure
    };
    Some(Verdict {
        outcome,
        explanation: caps[2].trim().to_string(),
    })
}

/// Fold the proposal in. Steps the proposal skipped keep their previous
/// status; unknown ids and unknown statuses are dropped with a warning.
fn apply_proposal(steps: &mut [TestStep], proposal: Vec<ProposedStatus>) {
    let mut by_id: HashMap<u32, ProposedStatus> = HashMap::new();
    for entry in proposal {
        by_id.insert(entry.id, entry);
    }
    for id in by_id.keys() {
        if !steps.iter().any(|s| s.id == *id) {
            warn!("checklist reply proposed unknown step id {}", id);
        }
    }
    for step in steps.iter_mut() {
        match by_id.get(&step.id) {
            Some(entry) => match entry.status.parse::<StepStatus>() {
                Ok(status) => {
                    step.status = status;
                    if let Some(notes) = &entry.notes {
                        if !notes.trim().is_empty() {
                            step.notes = Some(notes.trim().to_string());
                        }
                    }
                }
                Err(_) => warn!(
                    "step {}: ignoring invalid status '{}', keeping {}",
                    step.id, entry.status, step.status
                ),
            },
            None => warn!(
                "step {} missing from checklist reply, keeping {}",
                step.id, step.status
            ),
        }
    }
}

/// The transcript verdict outranks the proposal for the step that was
/// running when the cycle executed.
fn apply_verdict_precedence(
    steps: &mut [TestStep],
    verdict: Option<&Verdict>,
    current_id: Option<u32>,
    state: &ExecutionState,
) {
    let (Some(v), Some(id)) = (verdict, current_id) else {
        return;
    };
    let Some(step) = steps.iter_mut().find(|s| s.id == id) else {
        return;
    };
    match v.outcome {
        VerdictOutcome::Success => {
            // A closing success verdict settles the step; a mid-run one
            // leaves the call to the proposal.
            if state.is_complete && state.succeeded() {
                step.status = StepStatus::Passed;
                if step.notes.is_none() && !v.explanation.is_empty() {
                    step.notes = Some(v.explanation.clone());
                }
            }
        }
        VerdictOutcome::Failure => {
            if state.is_complete {
                step.status = StepStatus::Failed;
                if !v.explanation.is_empty() {
                    step.notes = Some(v.explanation.clone());
                }
            } else if step.status == StepStatus::Failed {
                // Still inside the retry budget: the step is not lost yet.
                step.status = StepStatus::InProgress;
            }
        }
    }
}

/// Keep the checklist coherent: at most one step in progress while the run
/// is live, none once it has ended.
fn repair_in_progress(steps: &mut [TestStep], state: &ExecutionState) {
    if state.is_complete {
        let terminal = if state.succeeded() {
            StepStatus::Passed
        } else {
            StepStatus::Failed
        };
        for step in steps.iter_mut() {
            if step.status == StepStatus::InProgress {
                step.status = terminal;
            }
        }
        return;
    }
    let mut seen = false;
    for step in steps.iter_mut() {
        if step.status == StepStatus::InProgress {
            if seen {
                step.status = StepStatus::NotStarted;
            } else {
                seen = true;
            }
        }
    }
    if !seen {
        if let Some(step) = steps
            .iter_mut()
            .find(|s| s.status == StepStatus::NotStarted)
        {
            step.status = StepStatus::InProgress;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CycleEvent;
    use crate::testutil::ScriptedReasoner;

    fn two_steps() -> Vec<TestStep> {
        let mut steps = vec![
            TestStep::new(1, "Open the storefront", "It loads"),
            TestStep::new(2, "Add an item to the cart", "Badge shows 1"),
        ];
        steps[0].status = StepStatus::InProgress;
        steps
    }

    fn live_state() -> ExecutionState {
        let mut state = ExecutionState::new(3);
        state.begin();
        state
    }

    #[tokio::test]
    async fn test_reconcile_applies_proposal() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_text(
            r#"[{"id": 1, "status": "passed", "notes": "storefront loaded"},
                {"id": 2, "status": "in_progress"}]"#,
        );
        let tracker = ProgressTracker::new(reasoner);
        let mut steps = two_steps();
        tracker.reconcile(&mut steps, &live_state()).await;
        assert_eq!(steps[0].status, StepStatus::Passed);
        assert_eq!(steps[0].notes.as_deref(), Some("storefront loaded"));
        assert_eq!(steps[1].status, StepStatus::InProgress);
    }

    #[tokio::test]
    async fn test_reconcile_error_leaves_steps_untouched() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_failure("api down");
        let tracker = ProgressTracker::new(reasoner);
        let mut steps = two_steps();
        let before = steps.clone();
        tracker.reconcile(&mut steps, &live_state()).await;
        assert_eq!(steps, before);
    }

    #[tokio::test]
    async fn test_reconcile_garbage_reply_leaves_steps_untouched() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_text("I am not sure about the statuses.");
        let tracker = ProgressTracker::new(reasoner);
        let mut steps = two_steps();
        let before = steps.clone();
        tracker.reconcile(&mut steps, &live_state()).await;
        assert_eq!(steps, before);
    }

    #[tokio::test]
    async fn test_short_proposal_keeps_missing_steps() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_text(r#"[{"id": 1, "status": "passed"}]"#);
        let tracker = ProgressTracker::new(reasoner);
        let mut steps = two_steps();
        steps[1].status = StepStatus::NotStarted;
        tracker.reconcile(&mut steps, &live_state()).await;
        assert_eq!(steps[0].status, StepStatus::Passed);
        // Untouched by the proposal, then promoted as the next step.
        assert_eq!(steps[1].status, StepStatus::InProgress);
    }

    #[tokio::test]
    async fn test_unknown_ids_and_statuses_ignored() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_text(
            r#"[{"id": 9, "status": "passed"}, {"id": 1, "status": "victorious"}]"#,
        );
        let tracker = ProgressTracker::new(reasoner);
        let mut steps = two_steps();
        tracker.reconcile(&mut steps, &live_state()).await;
        assert_eq!(steps[0].status, StepStatus::InProgress);
        assert_eq!(steps[1].status, StepStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_closing_success_verdict_passes_current_step() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_text(r#"[{"id": 1, "status": "in_progress"}]"#);
        let tracker = ProgressTracker::new(reasoner);
        let mut steps = vec![two_steps().remove(0)];
        let mut state = live_state();
        state
            .transcript
            .push_assistant("VERIFICATION: SUCCESS - heading is visible");
        state.finish(CycleEvent::CompletedWithoutTool, None);
        tracker.reconcile(&mut steps, &state).await;
        assert_eq!(steps[0].status, StepStatus::Passed);
    }

    #[tokio::test]
    async fn test_exhausted_failure_fails_current_step_with_notes() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_text(r#"[{"id": 1, "status": "in_progress"}]"#);
        let tracker = ProgressTracker::new(reasoner);
        let mut steps = vec![two_steps().remove(0)];
        let mut state = live_state();
        state
            .transcript
            .push_assistant("VERIFICATION: FAILURE - cart badge still shows 0");
        state.finish(
            CycleEvent::VerificationExhausted,
            Some("Verification failed after 3 retries: cart badge still shows 0".to_string()),
        );
        tracker.reconcile(&mut steps, &state).await;
        assert_eq!(steps[0].status, StepStatus::Failed);
        assert_eq!(steps[0].notes.as_deref(), Some("cart badge still shows 0"));
    }

    #[tokio::test]
    async fn test_midrun_failure_keeps_step_in_progress() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_text(r#"[{"id": 1, "status": "failed"}, {"id": 2, "status": "not_started"}]"#);
        let tracker = ProgressTracker::new(reasoner);
        let mut steps = two_steps();
        let mut state = live_state();
        state
            .transcript
            .push_assistant("VERIFICATION: FAILURE - wrong page");
        state.retry_count = 1;
        tracker.reconcile(&mut steps, &state).await;
        assert_eq!(steps[0].status, StepStatus::InProgress);
    }

    #[tokio::test]
    async fn test_at_most_one_step_in_progress() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_text(
            r#"[{"id": 1, "status": "in_progress"}, {"id": 2, "status": "in_progress"}]"#,
        );
        let tracker = ProgressTracker::new(reasoner);
        let mut steps = two_steps();
        tracker.reconcile(&mut steps, &live_state()).await;
        let running = steps
            .iter()
            .filter(|s| s.status == StepStatus::InProgress)
            .count();
        assert_eq!(running, 1);
        assert_eq!(steps[0].status, StepStatus::InProgress);
    }

    #[tokio::test]
    async fn test_completion_clears_dangling_in_progress() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.push_text(r#"[{"id": 1, "status": "in_progress"}, {"id": 2, "status": "not_started"}]"#);
        let tracker = ProgressTracker::new(reasoner);
        let mut steps = two_steps();
        let mut state = live_state();
        state.finish(
            CycleEvent::CaptureFailed,
            Some("Failed to capture screenshot: tab crashed".to_string()),
        );
        tracker.reconcile(&mut steps, &state).await;
        assert_eq!(steps[0].status, StepStatus::Failed);
        assert_eq!(steps[1].status, StepStatus::NotStarted);
    }

    #[test]
    fn test_tail_verdict_newest_wins() {
        let tail = "[assistant] VERIFICATION: FAILURE - old\n[assistant] VERIFICATION: SUCCESS - new";
        let v = extract_tail_verdict(tail).unwrap();
        assert!(v.passed());
        assert_eq!(v.explanation, "new");
    }

    #[test]
    fn test_tail_verdict_absent() {
        assert!(extract_tail_verdict("[assistant] nothing here").is_none());
    }
}

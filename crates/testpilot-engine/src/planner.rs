//! Step planning: decompose a natural-language instruction into a checklist.

use crate::protocol::first_json_array;
use crate::reasoner::Reasoner;
use crate::step::{StepStatus, TestStep};
use crate::transcript::Turn;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const PLAN_ATTEMPTS: u32 = 3;

const PLAN_SYSTEM: &str = "You break a browser test instruction into a short ordered list of discrete, independently verifiable steps. You reply with JSON only.";

/// Prompts get simpler with each attempt; a model that fumbled the rich
/// format often manages the bare one.
fn plan_prompt(attempt: u32, instruction: &str) -> String {
    match attempt {
        1 => format!(
            "Decompose this browser test into 2-8 discrete steps.\n\n\
             Test instruction:\n{instruction}\n\n\
             Reply with a JSON array only. Each entry: {{\"id\": <number>, \
             \"instruction\": \"<one imperative action>\", \
             \"expectedResult\": \"<what on the page proves it worked>\"}}\n\n\
             Example:\n[{{\"id\": 1, \"instruction\": \"Open https://shop.example.com\", \
             \"expectedResult\": \"The storefront page loads\"}}]"
        ),
        2 => format!(
            "Return ONLY a JSON array of steps for this browser test, no prose:\n{instruction}\n\
             Entries look like {{\"id\": 1, \"instruction\": \"...\", \"expectedResult\": \"...\"}}."
        ),
        _ => format!("JSON array of {{\"id\", \"instruction\"}} steps for: {instruction}"),
    }
}

#[derive(Deserialize)]
struct PlannedStep {
    instruction: String,
    #[serde(default, rename = "expectedResult", alias = "expected_result")]
    expected_result: String,
}

/// Turns an instruction into [`TestStep`]s via the reasoner.
pub struct StepPlanner {
    reasoner: Arc<dyn Reasoner>,
}

impl StepPlanner {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }

    /// Plan a run. Every non-empty instruction yields at least one step; if
    /// all attempts fail, the instruction itself becomes the single step.
    /// An empty instruction yields an empty plan.
    pub async fn plan(&self, instruction: &str) -> Vec<TestStep> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            warn!("empty test instruction, nothing to plan");
            return Vec::new();
        }

        for attempt in 1..=PLAN_ATTEMPTS {
            let turns = [Turn::User {
                text: plan_prompt(attempt, instruction),
            }];
            match self.reasoner.respond(PLAN_SYSTEM, &turns, &[]).await {
                Ok(reply) => {
                    if let Some(steps) = parse_plan(&reply.text) {
                        debug!("planned {} steps on attempt {}", steps.len(), attempt);
                        return steps;
                    }
                    warn!(
                        "plan attempt {}/{} returned no usable step array",
                        attempt, PLAN_ATTEMPTS
                    );
                }
                Err(e) => warn!("plan attempt {}/{} failed: {}", attempt, PLAN_ATTEMPTS, e),
            }
        }

        warn!("planning failed, running the instruction as a single step");
        vec![TestStep {
            id: 1,
            instruction: instruction.to_string(),
            expected_result: String::new(),
            status: StepStatus::InProgress,
            notes: None,
        }]
    }
}

/// Ids are renumbered from 1 regardless of what the model sent; the first
/// step starts in progress.
fn parse_plan(text: &str) -> Option<Vec<TestStep>> {
    let array = first_json_array(text)?;
    let planned: Vec<PlannedStep> = serde_json::from_value(array).ok()?;
    let steps: Vec<TestStep> = planned
        .into_iter()
        .filter(|p| !p.instruction.trim().is_empty())
        .enumerate()
        .map(|(i, p)| TestStep {
            id: i as u32 + 1,
            instruction: p.instruction.trim().to_string(),
            expected_result: p.expected_result.trim().to_string(),
            status: if i == 0 {
                StepStatus::InProgress
            } else {
                StepStatus::NotStarted
            },
            notes: None,
        })
        .collect();
    if steps.is_empty() {
        None
    } else {
        Some(steps)
    }
}

// ============================================================================
// Tests
// ============================================================================

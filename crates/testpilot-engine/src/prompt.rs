//! Prompt assembly: the system contract and the per-cycle context block.

use crate::reasoner::ToolSpec;
use crate::step::TestStep;
use serde_json::json;
use testpilot_browser::MarkedElement;

pub(crate) const SYSTEM_PROMPT: &str = r#"You are a meticulous QA engineer driving a real browser through a test, one action at a time.

=== HOW YOU SEE AND ACT ===
- You see the page through screenshots. Interactive elements carry numbered red labels; the element list below each screenshot gives every label's click coordinates.
- You act through coordinates only: click takes the x/y of a labeled element. There are no selectors.
- Make at most ONE tool call per reply, then wait for its result.
- To type into a field, click it first so it has focus. type_text goes to whatever is focused.
- If the page looks wrong (popup, overlay, wrong page), deal with that before continuing the step.

=== REQUIRED REPLY FORMAT ===
Every reply carries these two blocks as plain lines:

1. Verdict on the PREVIOUS action, judged against its expected outcome using the newest screenshot:
VERIFICATION: SUCCESS - <one line: what on the screen confirms it>
or
VERIFICATION: FAILURE - <one line: what went wrong>
(Skip this block only on your very first action, when there is nothing to verify.)

2. The action you are about to take:
ACTION INFO: {"action": "<what you will do>", "expectedOutcome": "<what the next screenshot should show>"}

=== RETRIES ===
When verification fails you will see the retry attempt number. Do not repeat the identical action; change the approach.

=== FINISHING ===
When the current step is verified complete and nothing is left to do, reply WITHOUT any tool call and state the final VERIFICATION verdict. A reply with no tool call ends the run."#;

/// Everything the engine knows at the top of a cycle, ready for rendering.
pub(crate) struct CycleContext<'a> {
    pub step: Option<&'a TestStep>,
    pub step_number: usize,
    pub step_total: usize,
    pub last_action: Option<&'a str>,
    pub expected_outcome: Option<&'a str>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub url: &'a str,
    pub elements: &'a [MarkedElement],
}

pub(crate) fn cycle_prompt(ctx: &CycleContext<'_>) -> String {
    let mut out = String::new();

    if let Some(step) = ctx.step {
        out.push_str(&format!(
            "Current step {}/{}: {}\n",
            ctx.step_number, ctx.step_total, step.instruction
        ));
        if !step.expected_result.is_empty() {
            out.push_str(&format!("Step passes when: {}\n", step.expected_result));
        }
    }

    match ctx.last_action {
        Some(action) => {
            out.push_str(&format!("\nPrevious action: {}\n", action));
            if let Some(expected) = ctx.expected_outcome {
                out.push_str(&format!("Expected outcome to verify: {}\n", expected));
            }
            if ctx.retry_count > 0 {
                out.push_str(&format!(
                    "\nRetry attempt {} of {}. The previous attempt failed verification; take a different approach.\n",
                    ctx.retry_count, ctx.max_retries
                ));
            }
        }
        None => out.push_str("\nThis is the first action. Nothing to verify yet.\n"),
    }

    out.push_str(&format!("\nCurrent URL: {}\n", ctx.url));

    if ctx.elements.is_empty() {
        out.push_str("\nNo labeled interactive elements are visible.\n");
    } else {
        out.push_str("\nLabeled elements:\n");
        for element in ctx.elements {
            out.push_str(&format!("{}\n", element));
        }
    }

    out.push_str("\nThe labeled screenshot follows.");
    out
}

pub(crate) fn browser_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "navigate",
            "Load a URL and wait for the page to settle.",
            json!({
                "type": "object",
                "properties": { "url": { "type": "string", "description": "Absolute URL" } },
                "required": ["url"]
            }),
        ),
        ToolSpec::new(
            "click",
            "Click at viewport coordinates, normally the coordinates of a labeled element.",
            json!({
                "type": "object",
                "properties": {
                    "x": { "type": "number" },
                    "y": { "type": "number" }
                },
                "required": ["x", "y"]
            }),
        ),
        ToolSpec::new(
            "type_text",
            "Type text into the focused element. Click the field first.",
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        ),
        ToolSpec::new(
            "clear_input",
            "Clear the focused input field.",
            json!({ "type": "object", "properties": {} }),
        ),
        ToolSpec::new(
            "scroll_next",
            "Scroll down one viewport chunk.",
            json!({ "type": "object", "properties": {} }),
        ),
        ToolSpec::new(
            "scroll_prev",
            "Scroll up one viewport chunk.",
            json!({ "type": "object", "properties": {} }),
        ),
        ToolSpec::new(
            "scroll_by",
            "Scroll by pixel deltas. Positive dy scrolls down.",
            json!({
                "type": "object",
                "properties": {
                    "dx": { "type": "integer" },
                    "dy": { "type": "integer" }
                },
                "required": ["dx", "dy"]
            }),
        ),
    ]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{StepStatus, TestStep};

    fn step() -> TestStep {
        let mut s = TestStep::new(2, "Add the first product to the cart", "Cart badge shows 1");
        s.status = StepStatus::InProgress;
        s
    }

    fn element() -> MarkedElement {
        MarkedElement {
            label: 3,
            x: 412.0,
            y: 188.0,
            tag: "button".to_string(),
            text: "Add to cart".to_string(),
        }
    }

    #[test]
    fn test_first_cycle_prompt_has_no_verification_ask() {
        let s = step();
        let elements = [element()];
        let prompt = cycle_prompt(&CycleContext {
            step: Some(&s),
            step_number: 2,
            step_total: 3,
            last_action: None,
            expected_outcome: None,
            retry_count: 0,
            max_retries: 3,
            url: "https://shop.example.com/",
            elements: &elements,
        });
        assert!(prompt.contains("Current step 2/3"));
        assert!(prompt.contains("Nothing to verify yet"));
        assert!(prompt.contains("[3] <button> \"Add to cart\" at (412, 188)"));
        assert!(!prompt.contains("Retry attempt"));
    }

    #[test]
    fn test_retry_prompt_names_the_attempt() {
        let s = step();
        let prompt = cycle_prompt(&CycleContext {
            step: Some(&s),
            step_number: 2,
            step_total: 3,
            last_action: Some("click the Add to cart button"),
            expected_outcome: Some("cart badge shows 1"),
            retry_count: 2,
            max_retries: 3,
            url: "https://shop.example.com/",
            elements: &[],
        });
        assert!(prompt.contains("Previous action: click the Add to cart button"));
        assert!(prompt.contains("Expected outcome to verify: cart badge shows 1"));
        assert!(prompt.contains("Retry attempt 2 of 3"));
        assert!(prompt.contains("No labeled interactive elements"));
    }

    #[test]
    fn test_browser_tools_cover_every_primitive() {
        let names: Vec<String> = browser_tools().into_iter().map(|t| t.name).collect();
        for expected in [
            "navigate",
            "click",
            "type_text",
            "clear_input",
            "scroll_next",
            "scroll_prev",
            "scroll_by",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
    }
}

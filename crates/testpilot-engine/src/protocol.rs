//! Reply markers: the two line-oriented blocks every cycle reply carries.
//!
//! ```text
//! VERIFICATION: SUCCESS - the cart badge now shows 1
//! ACTION INFO: {"action": "click the checkout button", "expectedOutcome": "the checkout form opens"}
//! ```
//!
//! Parsing is lenient on purpose: surrounding prose, code fences, and
//! trailing commentary after the JSON object are all tolerated. A missing
//! or mangled marker yields `None`, never an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

pub(crate) const ACTION_INFO_MARKER: &str = "ACTION INFO:";

static VERDICT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*VERIFICATION:\s*(SUCCESS|FAILURE)\s*(?:-\s*)?(.*?)\s*$")
        .expect("verdict regex")
});

/// Did the previous action do what the model said it would.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictOutcome {
    Success,
    Failure,
}

/// A parsed `VERIFICATION:` line.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub outcome: VerdictOutcome,
    pub explanation: String,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.outcome == VerdictOutcome::Success
    }
}

/// A parsed `ACTION INFO:` block. `expectedOutcome` is what the next
/// screenshot gets verified against.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub action: String,
    #[serde(default)]
    pub expected_outcome: String,
}

/// Extract the first verification verdict in `text`.
pub fn parse_verdict(text: &str) -> Option<Verdict> {
    let caps = VERDICT_RE.captures(text)?;
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

/// Extract the first action descriptor in `text`. The JSON object may be
/// followed by arbitrary prose on the same or later lines.
pub fn parse_action_info(text: &str) -> Option<ActionDescriptor> {
    let at = text.find(ACTION_INFO_MARKER)?;
    let rest = text[at + ACTION_INFO_MARKER.len()..].trim_start();
    let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<ActionDescriptor>();
    match stream.next() {
        Some(Ok(descriptor)) => Some(descriptor),
        _ => None,
    }
}

/// Find the first parseable JSON array anywhere in `text`. Models wrap
/// arrays in prose and code fences; scanning candidate `[` positions copes
/// with both.
pub(crate) fn first_json_array(text: &str) -> Option<serde_json::Value> {
    let mut offset = 0;
    while let Some(i) = text[offset..].find('[') {
        let candidate = &text[offset + i..];
        let mut stream =
            serde_json::Deserializer::from_str(candidate).into_iter::<serde_json::Value>();
        if let Some(Ok(value)) = stream.next() {
            if value.is_array() {
                return Some(value);
            }
        }
        offset += i + 1;
    }
    None
}

// ============================================================================
// Tests
// ============================================================================

//! The execution engine: one capture → reason → verify → dispatch cycle at
//! a time, folding every failure into durable state instead of bubbling it.

use crate::prompt::{browser_tools, cycle_prompt, CycleContext, SYSTEM_PROMPT};
use crate::protocol::{parse_action_info, parse_verdict, ActionDescriptor, Verdict};
use crate::reasoner::{Reasoner, ToolRequest};
use crate::session::ShutdownFlag;
use crate::step::{StepStatus, TestStep};
use crate::transcript::Transcript;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use testpilot_browser::{BrowserSurface, Dispatch, ScreenshotOptions, ScrollMotion};
use tracing::{debug, error, info, warn};

pub(crate) const CANCELED_ERROR: &str = "Operation was canceled due to application shutdown";

// Tool results past this many bytes say nothing new to the model.
const MAX_TOOL_RESULT_LEN: usize = 4000;

// ============================================================================
// Run state machine
// ============================================================================

/// Where the run stands. Terminal states absorb every further event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    CompleteSuccess,
    CompleteFailure,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

/// What a cycle observed, as far as the run state is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    Canceled,
    CaptureFailed,
    InvocationFailed,
    VerificationExhausted,
    CycleLimitReached,
    ToolDispatched,
    CompletedWithoutTool,
}

/// Pure transition over run states.
pub fn transition(state: RunState, event: CycleEvent) -> RunState {
    if state.is_terminal() {
        return state;
    }
    match event {
        CycleEvent::ToolDispatched => RunState::Running,
        CycleEvent::CompletedWithoutTool => RunState::CompleteSuccess,
        CycleEvent::Canceled
        | CycleEvent::CaptureFailed
        | CycleEvent::InvocationFailed
        | CycleEvent::VerificationExhausted
        | CycleEvent::CycleLimitReached => RunState::CompleteFailure,
    }
}

// ============================================================================
// Execution state
// ============================================================================

/// Everything a run accumulates. Serializable so callers can checkpoint it
/// between cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub transcript: Transcript,
    /// Description of the most recent dispatched action.
    pub last_action: Option<String>,
    /// What the model said that action should produce.
    pub expected_outcome: Option<String>,
    /// Consecutive failed verifications for the current action.
    pub retry_count: u32,
    /// The action being retried, if any.
    pub retry_action: Option<String>,
    pub max_retries: u32,
    pub run_state: RunState,
    pub is_complete: bool,
    pub last_error: Option<String>,
    pub cycles: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl ExecutionState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            transcript: Transcript::new(),
            last_action: None,
            expected_outcome: None,
            retry_count: 0,
            retry_action: None,
            max_retries,
            run_state: RunState::Running,
            is_complete: false,
            last_error: None,
            cycles: 0,
            started_at: None,
            ended_at: None,
            duration_ms: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.run_state == RunState::CompleteSuccess
    }

    pub(crate) fn begin(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub(crate) fn finish(&mut self, event: CycleEvent, error: Option<String>) {
        if error.is_some() {
            self.last_error = error;
        }
        self.is_complete = true;
        self.run_state = transition(self.run_state, event);
        let now = Utc::now();
        self.ended_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds().max(0) as u64);
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Knobs for the cycle loop.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Failed verifications tolerated per action before the run fails.
    pub max_retries: u32,
    /// Hard bound on cycles per run.
    pub max_cycles: u32,
    /// Most labeled elements per screenshot.
    pub max_labels: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_cycles: 60,
            max_labels: 50,
        }
    }
}

/// What one cycle produced, for the tracker and for callers that log.
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub verdict: Option<Verdict>,
    pub descriptor: Option<ActionDescriptor>,
    /// Name of the dispatched tool, when one ran.
    pub dispatched: Option<String>,
}

/// Drives the execution-and-verification loop. `cycle` never returns an
/// error: failures land in [`ExecutionState`] where the report can see them.
pub struct Engine {
    reasoner: Arc<dyn Reasoner>,
    options: EngineOptions,
    shutdown: ShutdownFlag,
    state: ExecutionState,
}

impl Engine {
    pub fn new(reasoner: Arc<dyn Reasoner>, options: EngineOptions, shutdown: ShutdownFlag) -> Self {
        let state = ExecutionState::new(options.max_retries);
        Self {
            reasoner,
            options,
            shutdown,
            state,
        }
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete
    }

    /// Complete immediately without touching the browser. Used when there is
    /// nothing to execute.
    pub(crate) fn complete_empty(&mut self) {
        self.state.begin();
        self.state.finish(CycleEvent::CompletedWithoutTool, None);
    }

    /// Run one cycle against `surface` with the current `steps` as context.
    pub async fn cycle(&mut self, surface: &dyn BrowserSurface, steps: &[TestStep]) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();
        if self.state.is_complete {
            return outcome;
        }

        if self.shutdown.is_set() {
            info!("shutdown requested, ending run");
            self.state
                .finish(CycleEvent::Canceled, Some(CANCELED_ERROR.to_string()));
            return outcome;
        }

        self.state.begin();
        self.state.cycles += 1;
        if self.state.cycles > self.options.max_cycles {
            self.state.finish(
                CycleEvent::CycleLimitReached,
                Some(format!(
                    "Exceeded the maximum of {} cycles without completing",
                    self.options.max_cycles
                )),
            );
            return outcome;
        }
        debug!(cycle = self.state.cycles, "starting cycle");

        // Capture. Losing the page is fatal: nothing downstream can reason
        // without pixels or a URL.
        let screenshot_opts = ScreenshotOptions {
            max_elements: self.options.max_labels,
            remove_after: true,
        };
        let screenshot = match surface.take_marked_screenshot(&screenshot_opts).await {
            Ok(s) => s,
            Err(e) => {
                let message = format!("Failed to capture screenshot: {}", e);
                error!("{}", message);
                self.state.finish(CycleEvent::CaptureFailed, Some(message));
                return outcome;
            }
        };
        let url = match surface.current_url().await {
            Ok(u) => u,
            Err(e) => {
                let message = format!("Failed to capture page URL: {}", e);
                error!("{}", message);
                self.state.finish(CycleEvent::CaptureFailed, Some(message));
                return outcome;
            }
        };

        // Contextualize.
        let (step, step_number) = current_step(steps);
        let prompt = cycle_prompt(&CycleContext {
            step,
            step_number,
            step_total: steps.len(),
            last_action: self.state.last_action.as_deref(),
            expected_outcome: self.state.expected_outcome.as_deref(),
            retry_count: self.state.retry_count,
            max_retries: self.state.max_retries,
            url: &url,
            elements: &screenshot.elements,
        });
        self.state.transcript.push_user(prompt);
        self.state.transcript.push_image("image/png", screenshot.image);

        // One reasoner call serves both verification and the next action.
        let tools = browser_tools();
        let reply = match self
            .reasoner
            .respond(SYSTEM_PROMPT, self.state.transcript.turns(), &tools)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let message = format!("Reasoning request failed: {}", e);
                error!("{}", message);
                self.state
                    .finish(CycleEvent::InvocationFailed, Some(message));
                return outcome;
            }
        };
        self.state.transcript.push_assistant(reply.text.clone());

        outcome.verdict = parse_verdict(&reply.text);
        outcome.descriptor = parse_action_info(&reply.text);

        // Judge the previous action before dispatching the next one.
        if self.state.last_action.is_some() {
            match &outcome.verdict {
                Some(v) if v.passed() => {
                    debug!("verification passed: {}", v.explanation);
                    self.state.retry_count = 0;
                    self.state.retry_action = None;
                }
                Some(v) => {
                    if self.state.retry_count >= self.state.max_retries {
                        let message = format!(
                            "Verification failed after {} retries: {}",
                            self.state.max_retries, v.explanation
                        );
                        error!("{}", message);
                        self.state
                            .finish(CycleEvent::VerificationExhausted, Some(message));
                        return outcome;
                    }
                    self.state.retry_count += 1;
                    self.state.retry_action = self.state.last_action.clone();
                    warn!(
                        "verification failed (retry {}/{}): {}",
                        self.state.retry_count, self.state.max_retries, v.explanation
                    );
                }
                None => debug!("reply carried no verification marker"),
            }
        }

        // Continue with a tool, or complete without one.
        match reply.tool_call {
            Some(call) => {
                self.state
                    .transcript
                    .push_tool_call(call.id.clone(), call.name.clone(), call.args.clone());
                let (payload, is_error) = dispatch(surface, &call).await;
                let payload = truncate_payload(payload);
                debug!(tool = %call.name, error = is_error, "dispatched");
                self.state
                    .transcript
                    .push_tool_result(call.id.clone(), call.name.clone(), payload, is_error);
                outcome.dispatched = Some(call.name.clone());

                match &outcome.descriptor {
                    Some(d) => {
                        self.state.last_action = Some(d.action.clone());
                        self.state.expected_outcome = if d.expected_outcome.is_empty() {
                            None
                        } else {
                            Some(d.expected_outcome.clone())
                        };
                    }
                    // No descriptor: synthesize one from the call so the next
                    // cycle still has something to verify against.
                    None => {
                        self.state.last_action = Some(format!("{} {}", call.name, call.args));
                        self.state.expected_outcome = None;
                    }
                }
                self.state.run_state = transition(self.state.run_state, CycleEvent::ToolDispatched);
            }
            None => {
                match &outcome.verdict {
                    Some(v) if v.passed() => info!("run complete: {}", v.explanation),
                    _ => debug!("run completed without a closing success verdict"),
                }
                self.state.finish(CycleEvent::CompletedWithoutTool, None);
            }
        }
        outcome
    }
}

/// The step the prompt should focus on: the in-progress one, else the first
/// not yet started, else the last.
fn current_step(steps: &[TestStep]) -> (Option<&TestStep>, usize) {
    if let Some((i, s)) = steps
        .iter()
        .enumerate()
        .find(|(_, s)| s.status == StepStatus::InProgress)
    {
        return (Some(s), i + 1);
    }
    if let Some((i, s)) = steps
        .iter()
        .enumerate()
        .find(|(_, s)| s.status == StepStatus::NotStarted)
    {
        return (Some(s), i + 1);
    }
    (steps.last(), steps.len())
}

/// Map a tool request onto a surface primitive. Unknown tools and malformed
/// arguments become error results the model can read and recover from;
/// only the surface itself can make them fatal, and it does not.
async fn dispatch(surface: &dyn BrowserSurface, call: &ToolRequest) -> (String, bool) {
    let args = &call.args;
    let result: testpilot_browser::Result<Dispatch> = match call.name.as_str() {
        "navigate" => match args["url"].as_str() {
            Some(url) => surface.navigate(url).await,
            None => Ok(Dispatch::rejected("navigate needs a 'url' string")),
        },
        "click" => match (args["x"].as_f64(), args["y"].as_f64()) {
            (Some(x), Some(y)) => surface.click(x, y).await,
            _ => Ok(Dispatch::rejected("click needs numeric 'x' and 'y'")),
        },
        "type_text" => match args["text"].as_str() {
            Some(text) => surface.type_text(text).await,
            None => Ok(Dispatch::rejected("type_text needs a 'text' string")),
        },
        "clear_input" => surface.clear_input().await,
        "scroll_next" => surface.scroll(ScrollMotion::NextChunk).await,
        "scroll_prev" => surface.scroll(ScrollMotion::PrevChunk).await,
        "scroll_by" => match (args["dx"].as_i64(), args["dy"].as_i64()) {
            (Some(dx), Some(dy)) => surface.scroll(ScrollMotion::By { dx, dy }).await,
            _ => Ok(Dispatch::rejected("scroll_by needs integer 'dx' and 'dy'")),
        },
        other => Ok(Dispatch::rejected(format!("unknown tool '{}'", other))),
    };
    match result {
        Ok(d) => (d.describe(), !d.success),
        Err(e) => (format!("Error: {}", e), true),
    }
}

fn truncate_payload(payload: String) -> String {
    if payload.len() <= MAX_TOOL_RESULT_LEN {
        return payload;
    }
    let mut cut = MAX_TOOL_RESULT_LEN;
    while !payload.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...[truncated]", &payload[..cut])
}

// ============================================================================
// Tests
// ============================================================================

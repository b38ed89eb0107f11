//! # testpilot-engine
//!
//! Executes natural-language browser tests. A run plans the instruction
//! into steps, then loops LLM-mediated cycles: capture a labeled screenshot,
//! ask the model to verify the previous action and pick the next one,
//! dispatch at most one browser primitive, and reconcile per-step progress.
//! The run ends when a reply carries no tool call, when a verification runs
//! out of retries, or when the page can no longer be captured.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use testpilot_browser::{BrowserOptions, CdpSurface};
//! use testpilot_engine::{ClaudeReasoner, EngineOptions, LlmConfig, Session};
//!
//! # #[tokio::main]
//! # async fn main() -> testpilot_engine::Result<()> {
//! let surface = CdpSurface::launch(&BrowserOptions::default()).await?;
//! let reasoner = Arc::new(ClaudeReasoner::new(LlmConfig::default(), "api-key"));
//! let mut session = Session::new(Box::new(surface), reasoner, EngineOptions::default());
//!
//! let report = session
//!     .run("Open https://example.com and verify the main heading is visible")
//!     .await;
//! println!("{}", report.summary);
//! session.close().await;
//! # Ok(())
//! # }
//! ```

mod claude;
mod engine;
mod planner;
mod prompt;
mod protocol;
mod reasoner;
mod report;
mod session;
mod step;
#[cfg(test)]
mod testutil;
mod tracker;
mod transcript;

pub use claude::{ClaudeReasoner, LlmConfig};
pub use engine::{
    transition, CycleEvent, CycleOutcome, Engine, EngineOptions, ExecutionState, RunState,
};
pub use planner::StepPlanner;
pub use protocol::{parse_action_info, parse_verdict, ActionDescriptor, Verdict, VerdictOutcome};
pub use reasoner::{Reasoner, ReasonerReply, ToolRequest, ToolSpec};
pub use report::TestReport;
pub use session::{Session, SessionHandle, SessionId, SessionRegistry, ShutdownFlag};
pub use step::{StepStatus, TestStep};
pub use tracker::ProgressTracker;
pub use transcript::{ImageData, Transcript, Turn};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by planning, reasoning, and reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP transport failure talking to the reasoning API.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The reasoning API answered with an error.
    #[error("api error: {0}")]
    Api(String),

    /// A structured reply could not be used.
    #[error("structured output unusable: {0}")]
    StructuredOutput(String),

    /// The browser surface failed.
    #[error("browser error: {0}")]
    Surface(#[from] testpilot_browser::SurfaceError),
}

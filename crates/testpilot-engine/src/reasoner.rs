//! The reasoning seam: one completion per call, tools declared as JSON schema.

use crate::transcript::Turn;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A tool the reasoner may request, described the way the Messages API
/// expects: name, prose description, JSON schema for the input.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool invocation the reasoner asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// One reply: free text plus at most one tool call.
#[derive(Debug, Clone, Default)]
pub struct ReasonerReply {
    pub text: String,
    pub tool_call: Option<ToolRequest>,
}

/// Anything that can reason over a transcript. The engine, planner, and
/// tracker all go through this; tests substitute scripted fakes.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// One completion over `turns`. Transport and API failures surface as
    /// errors, never as empty replies.
    async fn respond(&self, system: &str, turns: &[Turn], tools: &[ToolSpec])
        -> Result<ReasonerReply>;
}

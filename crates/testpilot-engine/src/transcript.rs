//! Conversation transcript: typed turns, append-only.

use serde::{Deserialize, Serialize};

/// Raw image bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// One turn of the conversation with the reasoner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    User { text: String },
    Assistant { text: String },
    Image { image: ImageData },
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolResult {
        id: String,
        name: String,
        payload: String,
        is_error: bool,
    },
}

/// The full history of a run. Turns are only ever appended; trimming for
/// the wire happens at serialization time, never here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::User { text: text.into() });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::Assistant { text: text.into() });
    }

    pub fn push_image(&mut self, media_type: impl Into<String>, data: Vec<u8>) {
        self.turns.push(Turn::Image {
            image: ImageData {
                media_type: media_type.into(),
                data,
            },
        });
    }

    pub fn push_tool_call(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        args: serde_json::Value,
    ) {
        self.turns.push(Turn::ToolCall {
            id: id.into(),
            name: name.into(),
            args,
        });
    }

    pub fn push_tool_result(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        payload: impl Into<String>,
        is_error: bool,
    ) {
        self.turns.push(Turn::ToolResult {
            id: id.into(),
            name: name.into(),
            payload: payload.into(),
            is_error,
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Text of the most recent assistant turn, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|t| match t {
            Turn::Assistant { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Flat text rendering of the last `n` turns. Screenshots collapse to a
    /// placeholder; tool traffic keeps its payload so a reader sees what
    /// actually happened.
    pub fn tail_text(&self, n: usize) -> String {
        let skip = self.turns.len().saturating_sub(n);
        let mut lines = Vec::new();
        for turn in &self.turns[skip..] {
            match turn {
                Turn::User { text } => lines.push(format!("[user] {}", text)),
                Turn::Assistant { text } => lines.push(format!("[assistant] {}", text)),
                Turn::Image { .. } => lines.push("[screenshot]".to_string()),
                Turn::ToolCall { name, args, .. } => {
                    lines.push(format!("[tool call] {} {}", name, args))
                }
                Turn::ToolResult {
                    payload, is_error, ..
                } => {
                    let tag = if *is_error { "tool error" } else { "tool result" };
                    lines.push(format!("[{}] {}", tag, payload));
                }
            }
        }
        lines.join("\n")
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Scripted fakes shared by unit tests.

use crate::reasoner::{Reasoner, ReasonerReply, ToolRequest, ToolSpec};
use crate::transcript::Turn;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

enum Scripted {
    Reply(ReasonerReply),
    Failure(String),
}

/// Serves canned replies in order; errors once the script runs dry so a
/// test that over-calls fails loudly.
pub(crate) struct ScriptedReasoner {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push_text(&self, text: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Reply(ReasonerReply {
                text: text.to_string(),
                tool_call: None,
            }));
    }

    pub(crate) fn push_tool(&self, text: &str, name: &str, args: serde_json::Value) {
        let mut script = self.script.lock().unwrap();
        let id = format!("tu_{}", script.len());
        script.push_back(Scripted::Reply(ReasonerReply {
            text: text.to_string(),
            tool_call: Some(ToolRequest {
                id,
                name: name.to_string(),
                args,
            }),
        }));
    }

    pub(crate) fn push_failure(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Failure(message.to_string()));
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn respond(
        &self,
        _system: &str,
        _turns: &[Turn],
        _tools: &[ToolSpec],
    ) -> Result<ReasonerReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Failure(message)) => Err(Error::Api(message)),
            None => Err(Error::Api("scripted reasoner exhausted".to_string())),
        }
    }
}

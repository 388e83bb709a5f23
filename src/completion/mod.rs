//! Text-completion service seam
//!
//! The worker, the evaluator and the research pipeline all talk to the
//! hosted model through `CompletionService`. The model is opaque: it gets a
//! system prompt, the message history and the callable tools, and answers
//! with either text or a tool call.

use crate::error::SidekickError;
use crate::models::{Completion, Message};
use crate::tools::ToolSpec;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

pub mod gemini;
pub use gemini::GeminiClient;

/// Everything the model sees for one call
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
}

impl<'a> CompletionRequest<'a> {
    /// Single-prompt request without history or tools
    pub fn prompt(system: &'a str, messages: &'a [Message]) -> Self {
        Self {
            system,
            messages,
            tools: &[],
        }
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion>;

    /// Model identifier string
    fn model_name(&self) -> &str;
}

/// Replays queued completions in order.
/// Keeps the binaries usable without an API key and drives tests.
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Completion>>,
}

impl ScriptedCompletion {
    pub fn new(replies: impl IntoIterator<Item = Completion>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, _request: CompletionRequest<'_>) -> Result<Completion> {
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| SidekickError::LlmError("scripted completion poisoned".to_string()))?;

        replies
            .pop_front()
            .ok_or_else(|| SidekickError::LlmError("scripted completion exhausted".to_string()))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Strip a markdown code fence around a JSON payload
pub(crate) fn strip_code_fence(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Pull the text out of a completion that was expected to be text
pub(crate) fn expect_text(completion: Completion) -> Result<String> {
    match completion {
        Completion::Text { text } => Ok(text),
        Completion::ToolCall(call) => Err(SidekickError::LlmError(format!(
            "expected text, model requested tool {}",
            call.name
        ))),
    }
}

//! Conversation transcript storage
//!
//! Ordered message turns with an approximate token count and a
//! context window for prompts.

use crate::models::{Message, Role};
use serde::{Deserialize, Serialize};

/// Conversation transcript for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
    /// Total token count (approximate)
    total_tokens: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.total_tokens += message.token_estimate();
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    /// Drop everything after the first `len` messages
    pub fn truncate(&mut self, len: usize) {
        if len >= self.messages.len() {
            return;
        }
        self.messages.truncate(len);
        self.recompute_total_tokens();
    }

    /// Recompute token count (prevents drift)
    fn recompute_total_tokens(&mut self) {
        self.total_tokens = self.messages.iter().map(Message::token_estimate).sum();
    }

    /// Most recent worker answer that was not a tool request
    pub fn last_answer(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Worker && m.tool_call.is_none())
            .map(|m| m.content.as_str())
    }

    /// Newest suffix of the transcript that fits in `max_tokens`.
    ///
    /// The first user message is always kept so the worker never loses the
    /// original request, and the window never starts on a tool result whose
    /// request was cut off. The newest turn is kept even when it alone
    /// overruns the budget.
    pub fn window(&self, max_tokens: usize) -> Vec<Message> {
        if self.total_tokens <= max_tokens {
            return self.messages.clone();
        }

        let first_user = self.messages.iter().position(|m| m.role == Role::User);
        let mut budget = max_tokens.saturating_sub(
            first_user
                .map(|i| self.messages[i].token_estimate())
                .unwrap_or(0),
        );

        let mut start = self.messages.len();
        for (i, msg) in self.messages.iter().enumerate().rev() {
            if Some(i) == first_user {
                break;
            }
            let cost = msg.token_estimate();
            if cost > budget {
                break;
            }
            budget -= cost;
            start = i;
        }

        while start < self.messages.len() && self.messages[start].role == Role::Tool {
            start += 1;
        }

        // Nothing fit beside the request: keep the newest turn regardless,
        // together with the tool request a trailing result answers.
        if start == self.messages.len() {
            start = self.messages.len() - 1;
            if start > 0 && self.messages[start].role == Role::Tool {
                start -= 1;
            }
        }

        let mut window = Vec::with_capacity(self.messages.len() - start + 1);
        if let Some(i) = first_user {
            if i < start {
                window.push(self.messages[i].clone());
            }
        }
        window.extend(self.messages[start..].iter().cloned());
        window
    }
}

/// Plain-text rendering of a conversation for evaluator prompts
pub fn format_history(messages: &[Message]) -> String {
    let mut context = String::new();
    context.push_str("Conversation history:\n\n");

    for msg in messages {
        let line = match (msg.role, &msg.tool_call) {
            (Role::User, _) => format!("User: {}", msg.content),
            (Role::Worker, Some(call)) => {
                format!("Assistant called tool {} with {}", call.name, call.arguments)
            }
            (Role::Worker, None) => format!("Assistant: {}", msg.content),
            (Role::Tool, _) => format!("Tool result: {}", msg.content),
            (Role::Evaluator, _) => format!("Evaluator feedback: {}", msg.content),
        };
        context.push_str(&line);
        context.push('\n');
    }

    context
}

//! Core data models for the sidekick loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Worker,
    Tool,
    Evaluator,
}

/// A tool invocation requested by the worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// One turn of the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Set on worker turns that request a tool and on the matching tool result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>, tool_call: Option<ToolCall>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, None)
    }

    pub fn worker(content: impl Into<String>) -> Self {
        Self::new(Role::Worker, content, None)
    }

    pub fn tool_request(call: ToolCall) -> Self {
        Self::new(Role::Worker, String::new(), Some(call))
    }

    pub fn tool_result(call: ToolCall, output: impl Into<String>) -> Self {
        Self::new(Role::Tool, output, Some(call))
    }

    pub fn evaluator(feedback: impl Into<String>) -> Self {
        Self::new(Role::Evaluator, feedback, None)
    }

    /// Approximate token count used for context window management
    pub fn token_estimate(&self) -> usize {
        let call_len = self
            .tool_call
            .as_ref()
            .map(|c| c.name.len() + c.arguments.to_string().len())
            .unwrap_or(0);
        (self.content.len() + call_len + 3) / 4
    }
}

//
// ================= Completion =================
//

/// What the text-completion service returned for one call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Completion {
    Text { text: String },
    ToolCall(ToolCall),
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Completion::Text { text: text.into() }
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Completion::ToolCall(ToolCall {
            name: name.into(),
            arguments,
        })
    }
}

//
// ================= Evaluation =================
//

/// Judgment returned by the evaluator for one worker answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verdict {
    pub feedback: String,
    pub success_criteria_met: bool,
    pub user_input_needed: bool,
}

impl Verdict {
    pub fn met(feedback: impl Into<String>) -> Self {
        Self {
            feedback: feedback.into(),
            success_criteria_met: true,
            user_input_needed: false,
        }
    }

    pub fn not_met(feedback: impl Into<String>) -> Self {
        Self {
            feedback: feedback.into(),
            success_criteria_met: false,
            user_input_needed: false,
        }
    }

    pub fn needs_input(feedback: impl Into<String>) -> Self {
        Self {
            feedback: feedback.into(),
            success_criteria_met: false,
            user_input_needed: true,
        }
    }
}

//
// ================= Loop State =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    AwaitingInput,
    Working,
    UsingTool,
    Evaluating,
    NeedsClarification,
    Done,
}

impl LoopState {
    /// Legal edges of the worker/evaluator state machine
    pub fn can_transition_to(self, next: LoopState) -> bool {
        use LoopState::*;
        matches!(
            (self, next),
            (AwaitingInput, Working)
                | (Done, Working)
                | (Working, UsingTool)
                | (UsingTool, Working)
                | (Working, Evaluating)
                | (Evaluating, Working)
                | (Evaluating, Done)
                | (Evaluating, NeedsClarification)
                | (NeedsClarification, AwaitingInput)
        )
    }

    /// States in which a new request may start a run
    pub fn accepts_request(self) -> bool {
        matches!(self, LoopState::AwaitingInput | LoopState::Done)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::AwaitingInput => "AWAITING_INPUT",
            LoopState::Working => "WORKING",
            LoopState::UsingTool => "USING_TOOL",
            LoopState::Evaluating => "EVALUATING",
            LoopState::NeedsClarification => "NEEDS_CLARIFICATION",
            LoopState::Done => "DONE",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Run Outcome =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    ClarificationNeeded,
    RoundLimitExceeded,
}

/// Result of driving the loop until it stops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub session_id: Uuid,
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Last worker answer (partial progress when the run did not complete)
    pub answer: Option<String>,
    pub rounds: u32,
    /// Last evaluator feedback
    pub feedback: Option<String>,
    pub trace: Vec<String>,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Turn the non-success statuses into errors
    pub fn into_result(self) -> crate::Result<RunOutcome> {
        match self.status {
            RunStatus::Completed => Ok(self),
            RunStatus::ClarificationNeeded => Err(crate::error::SidekickError::ClarificationNeeded(
                self.feedback.unwrap_or_default(),
            )),
            RunStatus::RoundLimitExceeded => {
                Err(crate::error::SidekickError::RoundLimitExceeded(self.rounds))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_edges() {
        assert!(LoopState::AwaitingInput.can_transition_to(LoopState::Working));
        assert!(LoopState::Working.can_transition_to(LoopState::UsingTool));
        assert!(LoopState::UsingTool.can_transition_to(LoopState::Working));
        assert!(LoopState::Evaluating.can_transition_to(LoopState::NeedsClarification));
        assert!(LoopState::NeedsClarification.can_transition_to(LoopState::AwaitingInput));

        assert!(!LoopState::AwaitingInput.can_transition_to(LoopState::Evaluating));
        assert!(!LoopState::UsingTool.can_transition_to(LoopState::Evaluating));
        assert!(!LoopState::NeedsClarification.can_transition_to(LoopState::Working));
        assert!(!LoopState::Done.can_transition_to(LoopState::Evaluating));
    }

    #[test]
    fn test_completion_wire_format() {
        let call = Completion::tool_call("web_search", serde_json::json!({"query": "rust"}));
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["name"], "web_search");

        let text: Completion = serde_json::from_str(r#"{"type":"text","text":"hi"}"#).unwrap();
        assert_eq!(text, Completion::text("hi"));
    }

    #[test]
    fn test_outcome_into_result() {
        let outcome = RunOutcome {
            session_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            status: RunStatus::RoundLimitExceeded,
            answer: Some("partial".to_string()),
            rounds: 3,
            feedback: None,
            trace: vec![],
        };
        let err = outcome.into_result().unwrap_err();
        assert!(matches!(
            err,
            crate::error::SidekickError::RoundLimitExceeded(3)
        ));
    }
}

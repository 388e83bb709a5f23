//! Worker role
//!
//! The worker produces the next action for the session: either a final
//! answer or a tool call. It sees the (windowed) transcript, the success
//! criteria and, after a rejected round, the evaluator's feedback.

use crate::completion::{CompletionRequest, CompletionService};
use crate::models::{Completion, Message};
use crate::tools::ToolSpec;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Input for one worker step
#[derive(Debug, Clone, Copy)]
pub struct WorkerTurn<'a> {
    pub history: &'a [Message],
    pub success_criteria: &'a str,
    /// Evaluator feedback from the previous rejected round
    pub feedback: Option<&'a str>,
    pub tools: &'a [ToolSpec],
}

#[async_trait]
pub trait Worker: Send + Sync {
    async fn step(&self, turn: WorkerTurn<'_>) -> Result<Completion>;
}

/// Worker backed by a text-completion service
pub struct LlmWorker {
    service: Arc<dyn CompletionService>,
}

impl LlmWorker {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    fn build_system_prompt(turn: &WorkerTurn<'_>) -> String {
        let mut prompt = format!(
            r#"You are a helpful assistant that can use tools to complete tasks.
You keep working on a task until either you have a question or clarification for the user, or the success criteria is met.
You have tools to search the web, fetch pages, read and write files in a sandbox, run Python and send push notifications.
When running Python, use print() to see output.
The current date and time is {}.

This is the success criteria:
{}

Reply either with a question for the user, clearly stated, or with your final response.
If you have a question, say so plainly, for example: "Question: please clarify whether you want a summary or a detailed answer".
If you have finished, reply with the final answer and do not ask a question."#,
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            turn.success_criteria,
        );

        if let Some(feedback) = turn.feedback {
            prompt.push_str(&format!(
                r#"

Previously you thought you completed the assignment, but your reply was rejected because the success criteria was not met.
Here is the feedback on why this was rejected:
{}
With this feedback, please continue the assignment, ensuring that you meet the success criteria or have a question for the user."#,
                feedback
            ));
        }

        prompt
    }
}

#[async_trait]
impl Worker for LlmWorker {
    async fn step(&self, turn: WorkerTurn<'_>) -> Result<Completion> {
        let system = Self::build_system_prompt(&turn);
        self.service
            .complete(CompletionRequest {
                system: &system,
                messages: turn.history,
                tools: turn.tools,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompletion;

    #[test]
    fn test_prompt_includes_feedback_only_after_rejection() {
        let turn = WorkerTurn {
            history: &[],
            success_criteria: "three bullet points",
            feedback: None,
            tools: &[],
        };
        let first = LlmWorker::build_system_prompt(&turn);
        assert!(first.contains("three bullet points"));
        assert!(!first.contains("rejected"));

        let retry = LlmWorker::build_system_prompt(&WorkerTurn {
            feedback: Some("the third point is missing"),
            ..turn
        });
        assert!(retry.contains("the third point is missing"));
    }

    #[tokio::test]
    async fn test_llm_worker_forwards_completion() {
        let service = Arc::new(ScriptedCompletion::new(vec![Completion::text("done")]));
        let worker = LlmWorker::new(service);
        let history = vec![Message::user("hello")];

        let reply = worker
            .step(WorkerTurn {
                history: &history,
                success_criteria: "say done",
                feedback: None,
                tools: &[],
            })
            .await
            .unwrap();
        assert_eq!(reply, Completion::text("done"));
    }
}

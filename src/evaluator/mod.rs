//! Evaluator role
//!
//! Judges the worker's latest answer against the success criteria and
//! returns a `Verdict`. The leniency of the judgment ("benefit of the
//! doubt") lives in the evaluator prompt, not in the loop.

use crate::completion::{strip_code_fence, CompletionRequest, CompletionService};
use crate::memory::format_history;
use crate::models::{Completion, Message, Verdict};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Feedback used when the evaluator's reply is not a readable verdict
pub const UNREADABLE_VERDICT_FEEDBACK: &str =
    "The evaluation of your last answer could not be read. Re-check the answer against the success criteria and reply again.";

const EVALUATOR_SYSTEM_PROMPT: &str = r#"You are an evaluator that determines if a task has been completed successfully by an Assistant.
Assess the Assistant's last response based on the given criteria. Respond with your feedback, and with your decision on whether the success criteria has been met,
and whether more input is needed from the user.
The Assistant has access to tools to search the web, read and write files and run code. If the Assistant says it has done something, give it the benefit of the doubt,
but reject if you feel more work should go into it.
Reply ONLY with JSON of the form:
{"feedback": "...", "success_criteria_met": true|false, "user_input_needed": true|false}"#;

/// Input for one judgment
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    /// Windowed history, bounded like the worker's
    pub transcript: &'a [Message],
    pub answer: &'a str,
    pub success_criteria: &'a str,
    /// Feedback given on the previous attempt, if any
    pub previous_feedback: Option<&'a str>,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, input: EvaluationInput<'_>) -> Result<Verdict>;
}

/// Evaluator backed by a text-completion service
pub struct LlmEvaluator {
    service: Arc<dyn CompletionService>,
}

impl LlmEvaluator {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    fn build_prompt(input: &EvaluationInput<'_>) -> String {
        let mut prompt = format!(
            "You are evaluating a conversation between the User and Assistant. You decide what action to take based on the last response from the Assistant.\n\n\
             {}\n\
             The success criteria for this assignment is:\n{}\n\n\
             And the final response from the Assistant that you are evaluating is:\n{}\n\n\
             Respond with your feedback, and decide if the success criteria is met by this response.\n\
             Also, decide if more user input is required, either because the assistant has a question, needs clarification, or seems to be stuck and unable to answer without help.",
            format_history(input.transcript),
            input.success_criteria,
            input.answer,
        );

        if let Some(previous) = input.previous_feedback {
            prompt.push_str(&format!(
                "\n\nAlso, note that in a prior attempt from the Assistant, you provided this feedback: {}\n\
                 If you're seeing the Assistant repeating the same mistakes, then consider responding that user input is required.",
                previous
            ));
        }

        prompt
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(&self, input: EvaluationInput<'_>) -> Result<Verdict> {
        let messages = vec![Message::user(Self::build_prompt(&input))];
        let completion = self
            .service
            .complete(CompletionRequest::prompt(EVALUATOR_SYSTEM_PROMPT, &messages))
            .await?;

        let verdict = match completion {
            Completion::Text { text } => parse_verdict(&text),
            Completion::ToolCall(_) => None,
        };

        Ok(verdict.unwrap_or_else(|| {
            warn!("Evaluator reply was not a readable verdict - treating as not met");
            Verdict::not_met(UNREADABLE_VERDICT_FEEDBACK)
        }))
    }
}

/// Parse a verdict from the evaluator's reply.
/// Accepts bare JSON, fenced JSON, or a JSON object embedded in prose.
pub fn parse_verdict(response: &str) -> Option<Verdict> {
    let cleaned = strip_code_fence(response);
    if let Ok(verdict) = serde_json::from_str::<Verdict>(cleaned) {
        return Some(verdict);
    }

    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Verdict>(&response[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompletion;

    #[test]
    fn test_parse_verdict_variants() {
        let bare = r#"{"feedback":"ok","success_criteria_met":true,"user_input_needed":false}"#;
        assert_eq!(parse_verdict(bare), Some(Verdict::met("ok")));

        let fenced = format!("```json\n{}\n```", bare);
        assert_eq!(parse_verdict(&fenced), Some(Verdict::met("ok")));

        let prose = format!("Here is my judgment: {} Thanks.", bare);
        assert_eq!(parse_verdict(&prose), Some(Verdict::met("ok")));

        assert_eq!(parse_verdict("looks good to me"), None);
        assert_eq!(parse_verdict(r#"{"feedback": "missing flags"}"#), None);
    }

    #[tokio::test]
    async fn test_unreadable_reply_is_not_met() {
        let service = Arc::new(ScriptedCompletion::new(vec![Completion::text(
            "I think it is fine",
        )]));
        let evaluator = LlmEvaluator::new(service);
        let verdict = evaluator
            .evaluate(EvaluationInput {
                transcript: &[],
                answer: "answer",
                success_criteria: "criteria",
                previous_feedback: None,
            })
            .await
            .unwrap();

        assert!(!verdict.success_criteria_met);
        assert!(!verdict.user_input_needed);
        assert_eq!(verdict.feedback, UNREADABLE_VERDICT_FEEDBACK);
    }

    #[test]
    fn test_prompt_mentions_previous_feedback() {
        let transcript = vec![Message::user("list three points")];
        let prompt = LlmEvaluator::build_prompt(&EvaluationInput {
            transcript: &transcript,
            answer: "two points",
            success_criteria: "three points",
            previous_feedback: Some("add a third point"),
        });
        assert!(prompt.contains("three points"));
        assert!(prompt.contains("add a third point"));
        assert!(prompt.contains("User: list three points"));
    }
}

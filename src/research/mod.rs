//! Research pipeline
//!
//! QUESTIONS → PLAN → SEARCH (concurrent) → REPORT → NOTIFY
//!
//! Each step is one completion call that answers in JSON, except the
//! searches, which go through the `web_search` tool and are summarised
//! one by one.

use crate::completion::{expect_text, strip_code_fence, CompletionRequest, CompletionService};
use crate::error::SidekickError;
use crate::models::Message;
use crate::tools::{Notifier, ToolExecutor, ToolRequest};
use crate::Result;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Clarifying questions asked before planning
pub const CLARIFYING_QUESTIONS: usize = 3;

const QUESTIONS_PROMPT: &str = r#"You are a research product manager. Given a research query, ask clarifying questions that will help focus the research.
Reply ONLY with JSON of the form:
{"questions": [{"question": "...", "reason": "..."}]}"#;

const SUMMARY_PROMPT: &str = "You are a research assistant. Given a search term and the raw search results, produce a concise summary of the results. \
The summary must be 2-3 paragraphs and less than 300 words. Capture the main points. This will be consumed by someone synthesizing a report, \
so it is vital you capture the essence and ignore any fluff. Do not include any additional commentary other than the summary itself.";

const WRITER_PROMPT: &str = r#"You are a senior researcher tasked with writing a cohesive report for a research query.
You will be provided with the original query and some initial research done by a research assistant.
First come up with an outline for the report, then generate the report in markdown format. The report should be lengthy and detailed.
Reply ONLY with JSON of the form:
{"short_summary": "2-3 sentence summary", "markdown_report": "...", "follow_up_questions": ["..."]}"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifyingQuestion {
    pub question: String,
    pub reason: String,
}

/// A clarifying question with the user's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItem {
    pub reason: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportData {
    pub short_summary: String,
    pub markdown_report: String,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResearchReport {
    pub trace_id: Uuid,
    /// Progress messages in the order they happened
    pub status_log: Vec<String>,
    pub report: ReportData,
}

#[derive(Deserialize)]
struct QuestionList {
    questions: Vec<ClarifyingQuestion>,
}

#[derive(Deserialize)]
struct SearchPlan {
    searches: Vec<SearchItem>,
}

pub struct ResearchManager {
    service: Arc<dyn CompletionService>,
    tools: Arc<dyn ToolExecutor>,
    notifier: Arc<dyn Notifier>,
    searches: usize,
}

impl ResearchManager {
    pub fn new(
        service: Arc<dyn CompletionService>,
        tools: Arc<dyn ToolExecutor>,
        notifier: Arc<dyn Notifier>,
        searches: usize,
    ) -> Self {
        Self {
            service,
            tools,
            notifier,
            searches: searches.max(1),
        }
    }

    pub async fn clarifying_questions(&self, query: &str) -> Result<Vec<ClarifyingQuestion>> {
        let prompt = format!(
            "Query: {}\nAsk exactly {} clarifying questions.",
            query, CLARIFYING_QUESTIONS
        );
        let list: QuestionList = self.ask_json(QUESTIONS_PROMPT, prompt).await?;

        if list.questions.len() < CLARIFYING_QUESTIONS {
            return Err(SidekickError::LlmError(format!(
                "expected {} clarifying questions, got {}",
                CLARIFYING_QUESTIONS,
                list.questions.len()
            )));
        }

        let mut questions = list.questions;
        questions.truncate(CLARIFYING_QUESTIONS);
        Ok(questions)
    }

    pub async fn run(&self, query: &str, answers: &[QuestionAnswer]) -> Result<ResearchReport> {
        let trace_id = Uuid::new_v4();
        let mut status_log = Vec::new();

        info!(%trace_id, query, answers = answers.len(), "Research started");

        let plan = self.plan_searches(query, answers).await?;
        status_log.push(format!(
            "Searches planned ({}), starting to search...",
            plan.len()
        ));

        let results = self.perform_searches(&plan).await;
        status_log.push(format!(
            "Searches complete ({} of {} succeeded), writing report...",
            results.len(),
            plan.len()
        ));

        let report = self.write_report(query, &results).await?;
        status_log.push("Report written, sending notification...".to_string());

        match self
            .notifier
            .notify(&format!("Research complete: {}", report.short_summary))
            .await
        {
            Ok(()) => status_log.push("Notification sent, research complete".to_string()),
            Err(e) => {
                warn!(%trace_id, error = %e, "Research notification failed");
                status_log.push(format!("Notification failed ({}), research complete", e));
            }
        }

        info!(%trace_id, "Research finished");

        Ok(ResearchReport {
            trace_id,
            status_log,
            report,
        })
    }

    async fn plan_searches(&self, query: &str, answers: &[QuestionAnswer]) -> Result<Vec<SearchItem>> {
        let system = format!(
            "You are a helpful research assistant. Given a query and the user's answers to clarifying questions, \
             come up with a set of web searches to perform to best answer the query. \
             Output exactly {} search terms.\n\
             Reply ONLY with JSON of the form:\n{{\"searches\": [{{\"reason\": \"...\", \"query\": \"...\"}}]}}",
            self.searches
        );
        let prompt = format!(
            "Query: {}\nQuestions and Responses:\n{}",
            query,
            format_answers(answers)
        );

        let plan: SearchPlan = self.ask_json(&system, prompt).await?;
        let mut searches = plan.searches;
        if searches.is_empty() {
            return Err(SidekickError::LlmError("search plan was empty".to_string()));
        }
        searches.truncate(self.searches);

        debug!(count = searches.len(), "Searches planned");
        Ok(searches)
    }

    /// Run every search concurrently; failures are logged and dropped
    async fn perform_searches(&self, plan: &[SearchItem]) -> Vec<String> {
        let results = join_all(plan.iter().map(|item| self.search(item))).await;

        results
            .into_iter()
            .zip(plan)
            .filter_map(|(result, item)| match result {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(query = %item.query, error = %e, "Search failed - skipping");
                    None
                }
            })
            .collect()
    }

    async fn search(&self, item: &SearchItem) -> Result<String> {
        let raw = self
            .tools
            .invoke(ToolRequest::WebSearch {
                query: item.query.clone(),
            })
            .await?;

        let messages = vec![Message::user(format!(
            "Search term: {}\nReason for searching: {}\n\nResults:\n{}",
            item.query, item.reason, raw
        ))];
        let completion = self
            .service
            .complete(CompletionRequest::prompt(SUMMARY_PROMPT, &messages))
            .await?;
        expect_text(completion)
    }

    async fn write_report(&self, query: &str, results: &[String]) -> Result<ReportData> {
        let prompt = format!(
            "Original query: {}\nSummarized search results:\n{}",
            query,
            results
                .iter()
                .enumerate()
                .map(|(i, r)| format!("{}. {}", i + 1, r))
                .collect::<Vec<_>>()
                .join("\n\n")
        );
        self.ask_json(WRITER_PROMPT, prompt).await
    }

    async fn ask_json<T: DeserializeOwned>(&self, system: &str, prompt: String) -> Result<T> {
        let messages = vec![Message::user(prompt)];
        let completion = self
            .service
            .complete(CompletionRequest::prompt(system, &messages))
            .await?;
        let text = expect_text(completion)?;
        Ok(serde_json::from_str(strip_code_fence(&text))?)
    }
}

fn format_answers(answers: &[QuestionAnswer]) -> String {
    if answers.is_empty() {
        return "(none)".to_string();
    }
    answers
        .iter()
        .enumerate()
        .map(|(i, qa)| format!("{}. {} - Response: {}", i + 1, qa.question, qa.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompletion;
    use crate::models::Completion;
    use crate::tools::{ToolKind, ToolSpec};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Searches succeed unless the query contains "fail"
    struct FakeSearch;

    #[async_trait]
    impl ToolExecutor for FakeSearch {
        fn specs(&self) -> Vec<ToolSpec> {
            vec![ToolKind::WebSearch.spec()]
        }

        async fn invoke(&self, request: ToolRequest) -> Result<String> {
            match request {
                ToolRequest::WebSearch { query } if query.contains("fail") => {
                    Err(SidekickError::ToolFailure("search backend down".into()))
                }
                ToolRequest::WebSearch { query } => Ok(format!("raw results for {}", query)),
                other => Err(SidekickError::ToolFailure(other.kind().name().to_string())),
            }
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, message: &str) -> Result<()> {
            if self.fail {
                return Err(SidekickError::NotificationError("push rejected".into()));
            }
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    const REPORT: &str = r#"```json
{"short_summary": "Rust is fast.", "markdown_report": "Rust report body", "follow_up_questions": ["What about Go?"]}
```"#;

    #[tokio::test]
    async fn test_pipeline_skips_failed_search() {
        let service = Arc::new(ScriptedCompletion::new(vec![
            Completion::text(
                r#"{"searches": [
                    {"reason": "basics", "query": "rust language"},
                    {"reason": "broken", "query": "fail please"},
                    {"reason": "speed", "query": "rust performance"}
                ]}"#,
            ),
            Completion::text("summary one"),
            Completion::text("summary three"),
            Completion::text(REPORT),
        ]));
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = ResearchManager::new(service.clone(), Arc::new(FakeSearch), notifier.clone(), 3);

        let answers = vec![QuestionAnswer {
            question: "Which aspect?".to_string(),
            answer: "performance".to_string(),
        }];
        let result = manager.run("Is Rust fast?", &answers).await.unwrap();

        assert_eq!(result.report.short_summary, "Rust is fast.");
        assert_eq!(result.report.follow_up_questions, vec!["What about Go?"]);
        assert!(result.status_log[1].contains("2 of 3 succeeded"));
        assert_eq!(
            result.status_log.last().map(String::as_str),
            Some("Notification sent, research complete")
        );
        assert_eq!(
            notifier.sent.lock().unwrap().as_slice(),
            ["Research complete: Rust is fast.".to_string()]
        );
        assert_eq!(service.remaining(), 0);
    }

    #[tokio::test]
    async fn test_notification_failure_is_not_fatal() {
        let service = Arc::new(ScriptedCompletion::new(vec![
            Completion::text(r#"{"searches": [{"reason": "r", "query": "q"}]}"#),
            Completion::text("summary"),
            Completion::text(REPORT),
        ]));
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let manager = ResearchManager::new(service, Arc::new(FakeSearch), notifier, 3);

        let result = manager.run("topic", &[]).await.unwrap();
        assert!(result
            .status_log
            .last()
            .is_some_and(|s| s.starts_with("Notification failed")));
    }

    #[tokio::test]
    async fn test_plan_is_capped() {
        let service = Arc::new(ScriptedCompletion::new(vec![
            Completion::text(
                r#"{"searches": [{"reason": "a", "query": "1"}, {"reason": "b", "query": "2"}, {"reason": "c", "query": "3"}]}"#,
            ),
            Completion::text("s1"),
            Completion::text(REPORT),
        ]));
        let manager = ResearchManager::new(
            service.clone(),
            Arc::new(FakeSearch),
            Arc::new(RecordingNotifier::default()),
            1,
        );

        let result = manager.run("topic", &[]).await.unwrap();
        assert!(result.status_log[0].contains("(1)"));
        assert_eq!(service.remaining(), 0);
    }

    #[tokio::test]
    async fn test_clarifying_questions() {
        let service = Arc::new(ScriptedCompletion::new(vec![Completion::text(
            r#"{"questions": [
                {"question": "Scope?", "reason": "narrow it"},
                {"question": "Audience?", "reason": "tone"},
                {"question": "Depth?", "reason": "length"},
                {"question": "Extra?", "reason": "too many"}
            ]}"#,
        )]));
        let manager = ResearchManager::new(
            service,
            Arc::new(FakeSearch),
            Arc::new(RecordingNotifier::default()),
            3,
        );

        let questions = manager.clarifying_questions("Rust").await.unwrap();
        assert_eq!(questions.len(), CLARIFYING_QUESTIONS);
        assert_eq!(questions[0].question, "Scope?");
    }

    #[tokio::test]
    async fn test_unparseable_report_is_an_error() {
        let service = Arc::new(ScriptedCompletion::new(vec![
            Completion::text(r#"{"searches": [{"reason": "r", "query": "q"}]}"#),
            Completion::text("summary"),
            Completion::text("here is your report, no json"),
        ]));
        let manager = ResearchManager::new(
            service,
            Arc::new(FakeSearch),
            Arc::new(RecordingNotifier::default()),
            3,
        );

        let err = manager.run("topic", &[]).await.unwrap_err();
        assert!(matches!(err, SidekickError::SerializationError(_)));
    }

    #[test]
    fn test_format_answers() {
        let answers = vec![QuestionAnswer {
            question: "Scope?".into(),
            answer: "narrow".into(),
        }];
        assert_eq!(format_answers(&answers), "1. Scope? - Response: narrow");
        assert_eq!(format_answers(&[]), "(none)");
    }
}

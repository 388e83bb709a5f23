//! Sidekick - the worker/evaluator loop
//!
//! INPUT → WORK (⇄ TOOL) → EVALUATE → DONE | CLARIFY | WORK again
//!
//! A run is driven round by round. Each round works on the session through
//! a `RoundGuard`; a round that fails with an error (or whose future is
//! dropped) leaves the session exactly as it was before the round.

pub mod session;

pub use session::{Session, SessionView};

use crate::audit::{RunLog, RunRecord};
use crate::error::SidekickError;
use crate::evaluator::{EvaluationInput, Evaluator};
use crate::execution::execute_tool_call;
use crate::models::{Completion, LoopState, Message, RunOutcome, RunStatus};
use crate::tools::{ToolExecutor, ToolProvider};
use crate::worker::{Worker, WorkerTurn};
use crate::Result;
use session::RoundGuard;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Criteria used when a request arrives without any
pub const DEFAULT_SUCCESS_CRITERIA: &str = "The answer should be clear and accurate";

/// Worker note recorded when a turn runs out of tool calls
pub const TOOL_BUDGET_EXHAUSTED: &str =
    "Tool budget exhausted for this turn before a final answer was produced.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_rounds: u32,
    pub max_tool_calls_per_turn: u32,
    /// Token budget for the history the worker and evaluator see
    pub context_tokens: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            max_tool_calls_per_turn: 8,
            context_tokens: 24_000,
        }
    }
}

/// One assistant session: a worker, an evaluator and the tools they share
pub struct Sidekick {
    worker: Arc<dyn Worker>,
    evaluator: Arc<dyn Evaluator>,
    provider: Arc<dyn ToolProvider>,
    tools: Arc<dyn ToolExecutor>,
    session: Session,
    config: LoopConfig,
    run_log: Arc<RunLog>,
}

impl Sidekick {
    pub async fn start(
        worker: Arc<dyn Worker>,
        evaluator: Arc<dyn Evaluator>,
        provider: Arc<dyn ToolProvider>,
        config: LoopConfig,
    ) -> Result<Self> {
        if config.max_rounds == 0 {
            return Err(SidekickError::ConfigError(
                "max_rounds must be at least 1".to_string(),
            ));
        }

        let tools = provider.acquire().await?;
        let session = Session::new();
        info!(session_id = %session.id(), "Sidekick started");

        Ok(Self {
            worker,
            evaluator,
            provider,
            tools,
            session,
            config,
            run_log: Arc::new(RunLog::new()),
        })
    }

    /// Record runs into a shared log instead of a private one
    pub fn with_run_log(mut self, run_log: Arc<RunLog>) -> Self {
        self.run_log = run_log;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    pub fn run_log(&self) -> &Arc<RunLog> {
        &self.run_log
    }

    /// Start a run for a new request.
    ///
    /// Allowed when the session is awaiting input or done with a previous
    /// request; history carries over. Blank criteria fall back to
    /// `DEFAULT_SUCCESS_CRITERIA`.
    pub async fn submit(&mut self, request: &str, success_criteria: &str) -> Result<RunOutcome> {
        let state = self.session.state();
        if !state.accepts_request() {
            return Err(SidekickError::InvalidTransition {
                from: state,
                action: "submit a request".to_string(),
            });
        }

        let criteria = if success_criteria.trim().is_empty() {
            DEFAULT_SUCCESS_CRITERIA.to_string()
        } else {
            success_criteria.trim().to_string()
        };

        info!(
            session_id = %self.session.id(),
            request_len = request.len(),
            "Sidekick: request received"
        );

        self.drive(Message::user(request), criteria).await
    }

    /// Answer the question a run stopped on and resume with the same criteria
    pub async fn clarify(&mut self, answer: &str) -> Result<RunOutcome> {
        let state = self.session.state();
        if state != LoopState::NeedsClarification {
            return Err(SidekickError::InvalidTransition {
                from: state,
                action: "clarify".to_string(),
            });
        }

        let criteria = self
            .session
            .success_criteria()
            .unwrap_or(DEFAULT_SUCCESS_CRITERIA)
            .to_string();

        info!(session_id = %self.session.id(), "Sidekick: clarification received");

        self.drive(Message::user(answer), criteria).await
    }

    /// Start over with fresh tools and a new session, closing the old tools.
    ///
    /// On error the sidekick keeps its current session and tools.
    pub async fn reset(&mut self) -> Result<()> {
        let old_id = self.session.id();
        let fresh = self.provider.acquire().await?;

        if let Err(e) = self.tools.close().await {
            warn!(session_id = %old_id, error = %e, "Closing tools failed - reset abandoned");
            if let Err(e) = fresh.close().await {
                warn!(session_id = %old_id, error = %e, "Releasing unused tools failed");
            }
            return Err(e);
        }

        self.tools = fresh;
        self.session = Session::new();

        info!(old_session_id = %old_id, session_id = %self.session.id(), "Sidekick reset");
        Ok(())
    }

    /// Release the tools without giving up the sidekick
    pub async fn close(&self) -> Result<()> {
        info!(session_id = %self.session.id(), "Sidekick closing tools");
        self.tools.close().await
    }

    pub async fn shutdown(self) -> Result<()> {
        self.close().await
    }

    async fn drive(&mut self, opening: Message, success_criteria: String) -> Result<RunOutcome> {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4();
        let mut trace = Vec::new();
        let mut opening = Some(opening);

        let Sidekick {
            worker,
            evaluator,
            tools,
            session,
            config,
            run_log,
            ..
        } = self;

        loop {
            let mut round = RoundGuard::new(session);

            if let Some(message) = opening.take() {
                if round.state() == LoopState::NeedsClarification {
                    round.transition(LoopState::AwaitingInput)?;
                    trace.push("INPUT: Clarification received".to_string());
                } else {
                    trace.push("INPUT: Request received".to_string());
                }
                round.transcript.push(message);
                round.success_criteria = Some(success_criteria.clone());
                round.feedback = None;
                round.rounds = 0;
            }

            if round.state() != LoopState::Working {
                round.transition(LoopState::Working)?;
            }

            // === WORK ===
            let round_no = round.rounds + 1;
            trace.push(format!("WORK: Round {}", round_no));
            debug!(session_id = %round.id(), round = round_no, "Worker turn");

            let answer = work(
                &mut round,
                &**worker,
                &**tools,
                config,
                &success_criteria,
                &mut trace,
            )
            .await?;

            // === EVALUATE ===
            round.transition(LoopState::Evaluating)?;
            let previous_feedback = round.feedback.clone();
            let history = round.transcript.window(config.context_tokens);
            let verdict = evaluator
                .evaluate(EvaluationInput {
                    transcript: &history,
                    answer: &answer,
                    success_criteria: &success_criteria,
                    previous_feedback: previous_feedback.as_deref(),
                })
                .await?;

            round.rounds += 1;
            round.total_rounds += 1;
            round.transcript.push(Message::evaluator(verdict.feedback.clone()));
            round.feedback = Some(verdict.feedback.clone());

            let status = if verdict.success_criteria_met {
                round.transition(LoopState::Done)?;
                trace.push("COMPLETE: Success criteria met".to_string());
                Some(RunStatus::Completed)
            } else if verdict.user_input_needed {
                round.transition(LoopState::NeedsClarification)?;
                trace.push("CLARIFY: Evaluator asked for user input".to_string());
                Some(RunStatus::ClarificationNeeded)
            } else if round.rounds >= config.max_rounds {
                round.transition(LoopState::Done)?;
                trace.push(format!(
                    "LIMIT: {} round(s) used without meeting the criteria",
                    round.rounds
                ));
                warn!(
                    session_id = %round.id(),
                    rounds = round.rounds,
                    "Round limit reached - returning partial progress"
                );
                Some(RunStatus::RoundLimitExceeded)
            } else {
                round.transition(LoopState::Working)?;
                trace.push(format!("REWORK: Round {} rejected", round.rounds));
                debug!(
                    session_id = %round.id(),
                    feedback = %verdict.feedback,
                    "Criteria not met - working again"
                );
                None
            };

            let rounds = round.rounds;
            round.commit();

            let Some(status) = status else {
                continue;
            };

            let outcome = RunOutcome {
                session_id: session.id(),
                run_id,
                status,
                answer: session.transcript().last_answer().map(str::to_string),
                rounds,
                feedback: session.feedback().map(str::to_string),
                trace,
            };

            info!(
                session_id = %outcome.session_id,
                run_id = %outcome.run_id,
                status = ?outcome.status,
                rounds = outcome.rounds,
                "Sidekick: run finished"
            );

            run_log
                .record(RunRecord::new(
                    &outcome,
                    &success_criteria,
                    session.transcript().messages(),
                    start_time.elapsed().as_millis() as u64,
                ))
                .await?;

            return Ok(outcome);
        }
    }
}

/// One worker turn: step the worker, running tools until it answers or the
/// tool budget runs out. Returns the answer handed to the evaluator.
async fn work(
    session: &mut Session,
    worker: &dyn Worker,
    tools: &dyn ToolExecutor,
    config: &LoopConfig,
    success_criteria: &str,
    trace: &mut Vec<String>,
) -> Result<String> {
    let specs = tools.specs();
    let feedback = session.feedback.clone();
    let mut tool_calls = 0u32;

    loop {
        let history = session.transcript.window(config.context_tokens);
        let completion = worker
            .step(WorkerTurn {
                history: &history,
                success_criteria,
                feedback: feedback.as_deref(),
                tools: &specs,
            })
            .await?;

        let call = match completion {
            Completion::Text { text } => {
                session.transcript.push(Message::worker(text.clone()));
                return Ok(text);
            }
            Completion::ToolCall(call) => call,
        };

        if tool_calls >= config.max_tool_calls_per_turn {
            warn!(
                session_id = %session.id,
                tool_calls,
                tool = %call.name,
                "Tool budget exhausted - ending worker turn"
            );
            trace.push(format!("TOOL: Budget of {} call(s) exhausted", tool_calls));
            session.transcript.push(Message::worker(TOOL_BUDGET_EXHAUSTED));
            return Ok(TOOL_BUDGET_EXHAUSTED.to_string());
        }

        // === TOOL ===
        session.transition(LoopState::UsingTool)?;
        session.transcript.push(Message::tool_request(call.clone()));

        let observation = execute_tool_call(tools, &call).await;
        trace.push(format!(
            "TOOL: {} ({:?}) - {} ms",
            observation.tool_name, observation.status, observation.execution_time_ms
        ));

        session
            .transcript
            .push(Message::tool_result(call, observation.output));
        session.transition(LoopState::Working)?;
        tool_calls += 1;
    }
}

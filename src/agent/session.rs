//! Session state for one sidekick
//!
//! A `Session` is owned by exactly one `Sidekick` and replaced wholesale on
//! reset. Rounds mutate it through a `RoundGuard`, which puts the session
//! back the way it was if the round does not commit.

use crate::error::SidekickError;
use crate::memory::Transcript;
use crate::models::{LoopState, Message};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct Session {
    pub(crate) id: Uuid,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) transcript: Transcript,
    pub(crate) success_criteria: Option<String>,
    /// Evaluator feedback from the latest round
    pub(crate) feedback: Option<String>,
    pub(crate) state: LoopState,
    /// Rounds used by the current request
    pub(crate) rounds: u32,
    pub(crate) total_rounds: u32,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            transcript: Transcript::new(),
            success_criteria: None,
            feedback: None,
            state: LoopState::AwaitingInput,
            rounds: 0,
            total_rounds: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn success_criteria(&self) -> Option<&str> {
        self.success_criteria.as_deref()
    }

    pub fn feedback(&self) -> Option<&str> {
        self.feedback.as_deref()
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    /// Move to `next`, rejecting edges the state machine does not have
    pub(crate) fn transition(&mut self, next: LoopState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SidekickError::InvalidTransition {
                from: self.state,
                action: format!("move to {}", next),
            });
        }
        debug!(session_id = %self.id, from = %self.state, to = %next, "State transition");
        self.state = next;
        Ok(())
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id,
            state: self.state,
            success_criteria: self.success_criteria.clone(),
            feedback: self.feedback.clone(),
            rounds: self.rounds,
            total_rounds: self.total_rounds,
            messages: self.transcript.messages().to_vec(),
            created_at: self.created_at,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub state: LoopState,
    pub success_criteria: Option<String>,
    pub feedback: Option<String>,
    pub rounds: u32,
    pub total_rounds: u32,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

struct Checkpoint {
    history_len: usize,
    state: LoopState,
    rounds: u32,
    total_rounds: u32,
    feedback: Option<String>,
    success_criteria: Option<String>,
}

/// Exclusive access to a session for the length of one round.
///
/// Dropping the guard without `commit` (an error was propagated or the
/// future was cancelled) restores the session captured at `new`. A round
/// that was interrupted mid-run leaves the session awaiting input.
pub(crate) struct RoundGuard<'a> {
    session: &'a mut Session,
    checkpoint: Checkpoint,
    committed: bool,
}

impl<'a> RoundGuard<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        let checkpoint = Checkpoint {
            history_len: session.transcript.len(),
            state: session.state,
            rounds: session.rounds,
            total_rounds: session.total_rounds,
            feedback: session.feedback.clone(),
            success_criteria: session.success_criteria.clone(),
        };
        Self {
            session,
            checkpoint,
            committed: false,
        }
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Deref for RoundGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for RoundGuard<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        let cp = &self.checkpoint;
        warn!(
            session_id = %self.session.id,
            state = %self.session.state,
            restored_messages = cp.history_len,
            "Round did not complete - rolling session back"
        );

        self.session.transcript.truncate(cp.history_len);
        self.session.rounds = cp.rounds;
        self.session.total_rounds = cp.total_rounds;
        self.session.feedback = cp.feedback.clone();
        self.session.success_criteria = cp.success_criteria.clone();
        self.session.state = match cp.state {
            LoopState::AwaitingInput | LoopState::Done | LoopState::NeedsClarification => cp.state,
            _ => LoopState::AwaitingInput,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_rejects_illegal_edge() {
        let mut session = Session::new();
        let err = session.transition(LoopState::Evaluating).unwrap_err();
        assert!(matches!(
            err,
            SidekickError::InvalidTransition {
                from: LoopState::AwaitingInput,
                ..
            }
        ));
        assert_eq!(session.state(), LoopState::AwaitingInput);
    }

    #[test]
    fn test_uncommitted_round_rolls_back() {
        let mut session = Session::new();
        {
            let mut round = RoundGuard::new(&mut session);
            round.transcript.push(Message::user("do the thing"));
            round.success_criteria = Some("thing done".to_string());
            round.transition(LoopState::Working).unwrap();
            round.transition(LoopState::Evaluating).unwrap();
            round.rounds += 1;
        }

        assert_eq!(session.state(), LoopState::AwaitingInput);
        assert!(session.transcript().is_empty());
        assert_eq!(session.rounds(), 0);
        assert_eq!(session.success_criteria(), None);
    }

    #[test]
    fn test_committed_round_sticks() {
        let mut session = Session::new();
        {
            let mut round = RoundGuard::new(&mut session);
            round.transcript.push(Message::user("do the thing"));
            round.transition(LoopState::Working).unwrap();
            round.transition(LoopState::Evaluating).unwrap();
            round.transition(LoopState::Done).unwrap();
            round.commit();
        }

        assert_eq!(session.state(), LoopState::Done);
        assert_eq!(session.transcript().len(), 1);
    }

    #[test]
    fn test_mid_run_rollback_returns_to_awaiting_input() {
        let mut session = Session::new();
        session.transcript.push(Message::user("first"));
        session.state = LoopState::Working;
        session.rounds = 1;

        {
            let mut round = RoundGuard::new(&mut session);
            round.transcript.push(Message::worker("half done"));
            round.transition(LoopState::Evaluating).unwrap();
        }

        assert_eq!(session.state(), LoopState::AwaitingInput);
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(session.rounds(), 1);
    }
}

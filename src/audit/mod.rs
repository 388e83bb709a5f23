//! Run log
//!
//! Every finished run is recorded with a digest of the transcript it
//! committed. Records keep only the digest and the message count; the
//! session's own transcript is checked against them later.

use crate::models::{Message, RunOutcome, RunStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub session_id: Uuid,
    pub status: RunStatus,
    pub rounds: u32,
    pub success_criteria: String,
    /// Messages covered by the digest, counted from the start of the session
    pub message_count: usize,
    pub transcript_digest: String,
    pub trace: Arc<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}

impl RunRecord {
    pub fn new(
        outcome: &RunOutcome,
        success_criteria: &str,
        transcript: &[Message],
        execution_time_ms: u64,
    ) -> Self {
        Self {
            run_id: outcome.run_id,
            session_id: outcome.session_id,
            status: outcome.status,
            rounds: outcome.rounds,
            success_criteria: success_criteria.to_string(),
            message_count: transcript.len(),
            transcript_digest: compute_transcript_digest(transcript),
            trace: Arc::new(outcome.trace.clone()),
            created_at: Utc::now(),
            execution_time_ms,
        }
    }
}

/// Store of finished runs
pub struct RunLog {
    records: Arc<RwLock<HashMap<Uuid, RunRecord>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, record: RunRecord) -> Result<Uuid> {
        let run_id = record.run_id;
        let mut records = self.records.write().await;
        records.insert(run_id, record);
        Ok(run_id)
    }

    pub async fn get(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&run_id).cloned())
    }

    /// Run IDs for a session, oldest first
    pub async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|record| record.session_id == session_id)
            .map(|record| (record.run_id, record.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    /// Check a session transcript against a stored run.
    ///
    /// The run's messages must be an unchanged prefix of `transcript`;
    /// later turns appended to the session do not matter.
    pub async fn verify_integrity(&self, run_id: Uuid, transcript: &[Message]) -> Result<bool> {
        let records = self.records.read().await;

        match records.get(&run_id) {
            Some(record) if transcript.len() >= record.message_count => Ok(
                compute_transcript_digest(&transcript[..record.message_count])
                    == record.transcript_digest,
            ),
            _ => Ok(false),
        }
    }

    /// Drop every record of a session, returning how many went
    pub async fn remove_session(&self, session_id: Uuid) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.session_id != session_id);
        before - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of the transcript's JSON form, hex encoded
pub fn compute_transcript_digest(messages: &[Message]) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), messages).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(session_id: Uuid) -> RunOutcome {
        RunOutcome {
            session_id,
            run_id: Uuid::new_v4(),
            status: RunStatus::Completed,
            answer: Some("done".to_string()),
            rounds: 1,
            feedback: Some("fine".to_string()),
            trace: vec!["INPUT: request received".to_string()],
        }
    }

    #[tokio::test]
    async fn test_record_and_verify() {
        let log = RunLog::new();
        let mut transcript = vec![Message::user("hi"), Message::worker("hello")];
        let record = RunRecord::new(&outcome(Uuid::new_v4()), "say hello", &transcript, 5);
        assert_eq!(record.message_count, 2);
        let run_id = log.record(record).await.unwrap();

        assert!(log.verify_integrity(run_id, &transcript).await.unwrap());
        assert!(!log.verify_integrity(Uuid::new_v4(), &transcript).await.unwrap());

        // Later turns leave an earlier run verifiable
        transcript.push(Message::user("and again"));
        assert!(log.verify_integrity(run_id, &transcript).await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_transcript_fails_verification() {
        let log = RunLog::new();
        let transcript = vec![Message::user("hi"), Message::worker("hello")];
        let record = RunRecord::new(&outcome(Uuid::new_v4()), "say hello", &transcript, 5);
        let run_id = log.record(record).await.unwrap();

        let edited = vec![Message::user("hi"), Message::worker("goodbye")];
        assert!(!log.verify_integrity(run_id, &edited).await.unwrap());
        assert!(!log.verify_integrity(run_id, &transcript[..1]).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_session_drops_its_records() {
        let log = RunLog::new();
        let session = Uuid::new_v4();
        let other = Uuid::new_v4();
        for id in [session, session, other] {
            log.record(RunRecord::new(&outcome(id), "c", &[], 1))
                .await
                .unwrap();
        }

        assert_eq!(log.remove_session(session).await, 2);
        assert_eq!(log.len().await, 1);
        assert!(log.list_for_session(session).await.unwrap().is_empty());
        assert_eq!(log.remove_session(session).await, 0);
    }

    #[tokio::test]
    async fn test_list_for_session_filters() {
        let log = RunLog::new();
        let session = Uuid::new_v4();
        let first = log
            .record(RunRecord::new(&outcome(session), "c", &[], 1))
            .await
            .unwrap();
        let second = log
            .record(RunRecord::new(&outcome(session), "c", &[], 1))
            .await
            .unwrap();
        log.record(RunRecord::new(&outcome(Uuid::new_v4()), "c", &[], 1))
            .await
            .unwrap();

        let ids = log.list_for_session(session).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first));
        assert!(ids.contains(&second));
    }

    #[test]
    fn test_digest_is_stable() {
        let transcript = vec![Message::user("hi")];
        assert_eq!(
            compute_transcript_digest(&transcript),
            compute_transcript_digest(&transcript)
        );
        assert_eq!(compute_transcript_digest(&transcript).len(), 64);
    }
}

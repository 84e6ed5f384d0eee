//! Session store: the single logical owner of the session aggregate.
//!
//! Every mutation is read → modify → conditional write against the
//! stored version. A rejected write means a concurrent request touched
//! the same session; the store re-reads and retries a bounded number of
//! times before reporting a transient failure. Blind overwrites never
//! happen, so a racing escalation or finalization cannot be dropped.

use proctor_core::{EngineError, ExamDefinition, ExamSession, IntegrityEvent};

use crate::db::{Database, VersionedSession};

/// Retries for optimistic-write rejections before giving up.
const MAX_WRITE_ATTEMPTS: usize = 3;

pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn register_exam(&self, exam: &ExamDefinition) -> Result<(), EngineError> {
        self.db.save_exam(exam)
    }

    pub fn exam(&self, exam_id: &str) -> Result<ExamDefinition, EngineError> {
        self.db
            .get_exam(exam_id)?
            .ok_or_else(|| EngineError::NotFound(format!("exam {exam_id}")))
    }

    /// Idempotent start: a retried request while an attempt is in
    /// progress returns the existing session unchanged; a finished
    /// attempt for the pair blocks any new one.
    pub fn start_session(
        &self,
        exam_id: &str,
        candidate_id: &str,
        now_ms: i64,
    ) -> Result<ExamSession, EngineError> {
        let exam = self.exam(exam_id)?;

        if let Some(finished) =
            self.db
                .find_session_by_attempt(exam_id, candidate_id, &["SUBMITTED", "TERMINATED"])?
        {
            let reason = match finished.session.lifecycle {
                proctor_core::LifecycleStatus::Submitted => {
                    "you have already completed this exam"
                }
                _ => "your previous attempt was terminated by a proctor",
            };
            return Err(EngineError::state_conflict(reason));
        }

        let session = ExamSession::start(&exam, candidate_id, now_ms);
        match self.db.insert_session(&session) {
            Ok(()) => Ok(session),
            // Lost the insert race against another start for the same
            // pair: hand back the attempt that won.
            Err(EngineError::Conflict) => self
                .db
                .find_session_by_attempt(exam_id, candidate_id, &["IN_PROGRESS"])?
                .map(|v| v.session)
                .ok_or(EngineError::Conflict),
            Err(e) => Err(e),
        }
    }

    pub fn load(&self, session_id: &str) -> Result<VersionedSession, EngineError> {
        self.db
            .get_session(session_id)?
            .ok_or_else(|| EngineError::NotFound(format!("exam session {session_id}")))
    }

    /// Read-modify-write with optimistic retry. The closure mutates the
    /// aggregate and may queue ledger events; aggregate and events are
    /// committed in one transaction. Closure errors abort with no write.
    pub fn with_session<T>(
        &self,
        session_id: &str,
        mut mutate: impl FnMut(&mut ExamSession, &mut Vec<IntegrityEvent>) -> Result<T, EngineError>,
    ) -> Result<(T, ExamSession), EngineError> {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let VersionedSession {
                mut session,
                version,
            } = self.load(session_id)?;
            let mut events = Vec::new();
            let out = mutate(&mut session, &mut events)?;

            match self.db.update_session(&session, version, &events) {
                Ok(()) => return Ok((out, session)),
                Err(EngineError::Conflict) => {
                    tracing::debug!(
                        session_id,
                        attempt,
                        "optimistic write rejected, re-reading session"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::Conflict)
    }

    pub fn session_for_response(&self, response_id: &str) -> Result<VersionedSession, EngineError> {
        self.db
            .find_session_by_response(response_id)?
            .ok_or_else(|| EngineError::NotFound(format!("response {response_id}")))
    }

    pub fn events(&self, session_id: &str) -> Result<Vec<IntegrityEvent>, EngineError> {
        self.db.list_events(session_id)
    }

    pub fn sessions_for_candidate(
        &self,
        candidate_id: &str,
    ) -> Result<Vec<ExamSession>, EngineError> {
        self.db.list_sessions_by_candidate(candidate_id)
    }

    pub fn sessions_for_review(&self) -> Result<Vec<ExamSession>, EngineError> {
        self.db.list_sessions_for_review()
    }

    pub fn finished_sessions(&self) -> Result<Vec<ExamSession>, EngineError> {
        self.db.list_finished_sessions()
    }

    /// Direct conditional write, for callers that manage their own
    /// read/version pairs (concurrency tests exercise this path).
    pub fn commit(
        &self,
        session: &ExamSession,
        expected_version: i64,
        events: &[IntegrityEvent],
    ) -> Result<(), EngineError> {
        self.db.update_session(session, expected_version, events)
    }
}

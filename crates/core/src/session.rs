//! The exam session aggregate and its lifecycle transitions.
//!
//! One session per (candidate, exam) attempt. Two evaluation tracks
//! (academic scoring, integrity verdict) progress independently after
//! submission; `outcome::try_finalize` is the single point where they
//! meet. All guards live here so every caller gets the same rules.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detector::SignalDetectorState;
use crate::error::EngineError;
use crate::exam::{ExamDefinition, Response};
use crate::outcome::FinalOutcome;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    InProgress,
    Submitted,
    Terminated,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::InProgress => "IN_PROGRESS",
            LifecycleStatus::Submitted => "SUBMITTED",
            LifecycleStatus::Terminated => "TERMINATED",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcademicStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    NotRequired,
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcademicEvaluation {
    pub score: u32,
    pub total_marks: u32,
    pub status: AcademicStatus,
    pub review_status: ReviewStatus,
}

impl Default for AcademicEvaluation {
    fn default() -> Self {
        Self {
            score: 0,
            total_marks: 0,
            status: AcademicStatus::Pending,
            review_status: ReviewStatus::NotRequired,
        }
    }
}

impl AcademicEvaluation {
    /// Terminal when scoring is done and no manual review is still open.
    pub fn is_terminal(&self) -> bool {
        self.status == AcademicStatus::Completed && self.review_status != ReviewStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    UnderReview,
    Cleared,
    Invalidated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityVerdict {
    pub status: VerdictStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

impl Default for IntegrityVerdict {
    fn default() -> Self {
        Self {
            status: VerdictStatus::UnderReview,
            decided_by: None,
            decided_at_ms: None,
            remarks: None,
        }
    }
}

impl IntegrityVerdict {
    pub fn is_terminal(&self) -> bool {
        self.status != VerdictStatus::UnderReview
    }
}

/// One candidate's single attempt at one exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSession {
    pub session_id: String,
    pub exam_id: String,
    pub candidate_id: String,

    pub started_ms: i64,
    pub ends_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_ms: Option<i64>,

    pub lifecycle: LifecycleStatus,

    #[serde(default)]
    pub responses: Vec<Response>,

    #[serde(default)]
    pub academic: AcademicEvaluation,
    #[serde(default)]
    pub verdict: IntegrityVerdict,
    #[serde(default)]
    pub detector: SignalDetectorState,

    /// Write-once. Set by `outcome::try_finalize`, after which the
    /// session is closed to all further evaluation mutation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_outcome: Option<FinalOutcome>,

    /// Append-only, insertion order = chronological display order.
    #[serde(default)]
    pub event_ids: Vec<String>,
}

impl ExamSession {
    pub fn start(exam: &ExamDefinition, candidate_id: &str, now_ms: i64) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            exam_id: exam.exam_id.clone(),
            candidate_id: candidate_id.to_string(),
            started_ms: now_ms,
            ends_ms: now_ms + exam.duration_ms(),
            submitted_ms: None,
            lifecycle: LifecycleStatus::InProgress,
            responses: Vec::new(),
            academic: AcademicEvaluation::default(),
            verdict: IntegrityVerdict::default(),
            detector: SignalDetectorState::default(),
            final_outcome: None,
            event_ids: Vec::new(),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.lifecycle == LifecycleStatus::InProgress
    }

    /// Events and responses may only accumulate while in progress.
    pub fn can_append_events(&self) -> bool {
        self.is_in_progress()
    }

    fn require_in_progress(&self) -> Result<(), EngineError> {
        match self.lifecycle {
            LifecycleStatus::InProgress => Ok(()),
            other => Err(EngineError::state_conflict(format!(
                "session is already {}",
                other.as_str()
            ))),
        }
    }

    /// Candidate submission: exactly once, attaches the full response set.
    pub fn submit(&mut self, responses: Vec<Response>, now_ms: i64) -> Result<(), EngineError> {
        self.require_in_progress()?;
        self.responses = responses;
        self.lifecycle = LifecycleStatus::Submitted;
        self.submitted_ms = Some(now_ms);
        Ok(())
    }

    /// Proctor termination: irreversible, stamps the actual end time.
    pub fn terminate(&mut self, now_ms: i64) -> Result<(), EngineError> {
        self.require_in_progress()?;
        self.lifecycle = LifecycleStatus::Terminated;
        self.ends_ms = now_ms;
        Ok(())
    }

    pub fn append_event_id(&mut self, event_id: &str) {
        self.event_ids.push(event_id.to_string());
    }

    /// Records the proctor's integrity verdict. At most one decision per
    /// session; a decided or finalized session rejects further verdicts.
    pub fn decide_verdict(
        &mut self,
        verdict: VerdictStatus,
        decided_by: &str,
        remarks: Option<String>,
        now_ms: i64,
    ) -> Result<(), EngineError> {
        if verdict == VerdictStatus::UnderReview {
            return Err(EngineError::validation(
                "verdict must be CLEARED or INVALIDATED",
            ));
        }
        if self.final_outcome.is_some() {
            return Err(EngineError::state_conflict("session already finalized"));
        }
        if self.verdict.is_terminal() {
            return Err(EngineError::state_conflict(
                "verdict already decided and cannot be changed",
            ));
        }
        self.verdict = IntegrityVerdict {
            status: verdict,
            decided_by: Some(decided_by.to_string()),
            decided_at_ms: Some(now_ms),
            remarks,
        };
        Ok(())
    }

    /// Installs the auto-scoring result. Submitted sessions only, once.
    pub fn complete_academic(&mut self, evaluation: AcademicEvaluation) -> Result<(), EngineError> {
        if self.lifecycle != LifecycleStatus::Submitted {
            return Err(EngineError::state_conflict("session has not been submitted"));
        }
        if self.academic.status == AcademicStatus::Completed {
            return Err(EngineError::state_conflict("session already evaluated"));
        }
        self.academic = evaluation;
        Ok(())
    }

    /// Records a reviewer's score for one marked response, recomputes the
    /// session score, and closes the review track once every marked
    /// response has been scored.
    pub fn record_review_score(
        &mut self,
        response_id: &str,
        score: u32,
    ) -> Result<(), EngineError> {
        if self.final_outcome.is_some() {
            return Err(EngineError::state_conflict("session already finalized"));
        }
        if self.academic.status != AcademicStatus::Completed {
            return Err(EngineError::state_conflict("session has not been evaluated"));
        }

        let response = self
            .responses
            .iter_mut()
            .find(|r| r.response_id == response_id)
            .ok_or_else(|| EngineError::NotFound(format!("response {response_id}")))?;
        if !response.marked_for_review {
            return Err(EngineError::state_conflict(
                "response is not marked for review",
            ));
        }
        response.score = score;
        response.reviewed = true;

        self.academic.score = self.responses.iter().map(|r| r.score).sum();
        let all_reviewed = self
            .responses
            .iter()
            .filter(|r| r.marked_for_review)
            .all(|r| r.reviewed);
        if all_reviewed {
            self.academic.review_status = ReviewStatus::Completed;
        }
        Ok(())
    }
}

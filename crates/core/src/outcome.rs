//! Final-outcome reconciliation.
//!
//! The academic and integrity tracks finish in either order; whichever
//! write observes both terminal freezes the outcome. Callers invoke
//! `try_finalize` after every evaluation-track mutation rather than
//! predicting finality themselves.

use serde::{Deserialize, Serialize};

use crate::session::{ExamSession, VerdictStatus};

/// The frozen overall result of a session. Write-once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalOutcome {
    Evaluated,
    Invalidated,
}

/// Coarse status shown to the candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateStatus {
    UnderReview,
    Evaluated,
    Invalidated,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::UnderReview => "UNDER_REVIEW",
            CandidateStatus::Evaluated => "EVALUATED",
            CandidateStatus::Invalidated => "INVALIDATED",
        }
    }
}

/// Sets the final outcome the first time both tracks are terminal.
/// Idempotent; returns whether this call changed the session.
pub fn try_finalize(session: &mut ExamSession) -> bool {
    if session.final_outcome.is_some() {
        return false;
    }

    let outcome = match session.verdict.status {
        VerdictStatus::Cleared => FinalOutcome::Evaluated,
        VerdictStatus::Invalidated => FinalOutcome::Invalidated,
        VerdictStatus::UnderReview => return false,
    };

    if !session.academic.is_terminal() {
        return false;
    }

    session.final_outcome = Some(outcome);
    true
}

pub fn candidate_status(session: &ExamSession) -> CandidateStatus {
    match session.final_outcome {
        Some(FinalOutcome::Invalidated) => CandidateStatus::Invalidated,
        Some(FinalOutcome::Evaluated) => CandidateStatus::Evaluated,
        None => CandidateStatus::UnderReview,
    }
}

//! Minimal exam surface the academic evaluation track scores against.
//!
//! Exam authoring and publishing live in an upstream service; the engine
//! only needs enough of the definition to auto-score objective answers
//! and route the rest to manual review.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{AcademicEvaluation, AcademicStatus, ReviewStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionKind {
    Mcq,
    Subjective,
    Coding,
}

impl QuestionKind {
    /// Anything that cannot be auto-scored goes to a human reviewer.
    /// Coding answers are routed the same way; the external judge
    /// service is a display-side collaborator, not part of scoring.
    pub fn needs_manual_review(&self) -> bool {
        !matches!(self, QuestionKind::Mcq)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question_id: String,
    pub kind: QuestionKind,
    pub prompt: String,
    pub marks: u32,
    /// Index of the correct option, MCQ only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<u32>,
}

impl Question {
    pub fn is_correct(&self, answer: &str) -> bool {
        match (self.kind, self.correct_option) {
            (QuestionKind::Mcq, Some(correct)) => answer.trim().parse::<u32>() == Ok(correct),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamDefinition {
    pub exam_id: String,
    pub title: String,
    pub duration_minutes: u32,
    pub questions: Vec<Question>,
}

impl ExamDefinition {
    pub fn duration_ms(&self) -> i64 {
        i64::from(self.duration_minutes) * 60_000
    }

    pub fn total_marks(&self) -> u32 {
        self.questions.iter().map(|q| q.marks).sum()
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.question_id == question_id)
    }
}

/// One answer submitted with the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub response_id: String,
    pub question_id: String,
    pub answer: String,
    pub score: u32,
    /// Set during evaluation when the answer needs a human score.
    pub marked_for_review: bool,
    /// Set once a reviewer has recorded a score for a marked response.
    pub reviewed: bool,
}

impl Response {
    pub fn new(question_id: &str, answer: impl Into<String>) -> Self {
        Self {
            response_id: Uuid::new_v4().to_string(),
            question_id: question_id.to_string(),
            answer: answer.into(),
            score: 0,
            marked_for_review: false,
            reviewed: false,
        }
    }
}

/// Auto-scores objective answers and marks the rest for manual review.
/// Pure: the caller persists the mutated responses and the returned
/// evaluation together.
pub fn evaluate_academic(exam: &ExamDefinition, responses: &mut [Response]) -> AcademicEvaluation {
    let mut score = 0;
    let mut has_manual = false;

    for response in responses.iter_mut() {
        let Some(question) = exam.question(&response.question_id) else {
            continue;
        };
        if question.kind.needs_manual_review() {
            has_manual = true;
            response.marked_for_review = true;
        } else if question.is_correct(&response.answer) {
            response.score = question.marks;
            score += question.marks;
        }
    }

    AcademicEvaluation {
        score,
        total_marks: exam.total_marks(),
        status: AcademicStatus::Completed,
        review_status: if has_manual {
            ReviewStatus::Pending
        } else {
            ReviewStatus::Completed
        },
    }
}

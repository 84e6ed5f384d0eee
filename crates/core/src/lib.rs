//! Core domain model for the exam proctoring engine.
//!
//! Pure data types and pure transitions: the session aggregate, integrity
//! events, the signal detector state, and final-outcome reconciliation.
//! No I/O lives here; the signald and server crates own the side effects.

pub mod detector;
pub mod error;
pub mod event;
pub mod exam;
pub mod observation;
pub mod outcome;
pub mod session;

pub use detector::{DetectorReviewStatus, KindTrack, SignalDetectorState};
pub use error::EngineError;
pub use event::{EventKind, EventSource, IntegrityEvent, SignalKind};
pub use exam::{evaluate_academic, ExamDefinition, Question, QuestionKind, Response};
pub use observation::{FrameObservation, HeadPose};
pub use outcome::{candidate_status, try_finalize, CandidateStatus, FinalOutcome};
pub use session::{
    AcademicEvaluation, AcademicStatus, ExamSession, IntegrityVerdict, LifecycleStatus,
    ReviewStatus, VerdictStatus,
};

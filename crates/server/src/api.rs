//! HTTP API for the proctoring engine.
//!
//! Handlers are thin: they validate input, run the aggregate transition
//! through the store's conditional-write loop, call the reconciler after
//! every evaluation-track write, and map the error taxonomy onto HTTP
//! statuses. Identity is validated upstream; handlers trust the
//! `x-actor-id` header for scoping and attribution.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use proctor_core::{
    candidate_status, evaluate_academic, try_finalize, CandidateStatus, EngineError, EventKind,
    EventSource, ExamDefinition, ExamSession, IntegrityEvent, Response, VerdictStatus,
};
use proctor_signald::{frame_digest, InferenceClient, RuleEngine, SampleGate};

use crate::store::SessionStore;

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    pub store: SessionStore,
    pub engine: RuleEngine,
    pub gate: SampleGate,
    pub inference: InferenceClient,
}

pub type SharedState = Arc<AppState>;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    fn err(msg: &str) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        })
    }
}

fn error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::StateConflict(_) => StatusCode::CONFLICT,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Collaborator(_) => StatusCode::BAD_GATEWAY,
        EngineError::Conflict => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure<T: Serialize>(err: EngineError) -> (StatusCode, Json<ApiResponse<T>>) {
    (error_status(&err), ApiResponse::err(&err.to_string()))
}

/// Actor identity, validated by the upstream gateway.
fn actor_id(headers: &HeaderMap) -> Result<String, EngineError> {
    headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EngineError::validation("missing x-actor-id header"))
}

/// Ownership check; a foreign session is indistinguishable from a
/// missing one.
fn require_owner(session: &ExamSession, candidate_id: &str) -> Result<(), EngineError> {
    if session.candidate_id != candidate_id {
        return Err(EngineError::NotFound(format!(
            "exam session {}",
            session.session_id
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StartExamRequest {
    exam_id: String,
}

#[derive(Debug, Deserialize)]
struct SubmittedAnswer {
    question_id: String,
    answer: String,
}

#[derive(Debug, Deserialize)]
struct SubmitExamRequest {
    session_id: String,
    responses: Vec<SubmittedAnswer>,
}

#[derive(Debug, Deserialize)]
struct ClientEventRequest {
    session_id: String,
    event_type: EventKind,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FrameSampleRequest {
    session_id: String,
    image_base64: String,
}

#[derive(Debug, Deserialize)]
struct VerdictRequest {
    session_id: String,
    verdict: VerdictStatus,
    #[serde(default)]
    remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewScoreRequest {
    score: u32,
}

#[derive(Debug, Serialize)]
struct FrameSampleResponse {
    accepted: bool,
    /// True when the sample arrived inside the minimum interval and was
    /// silently discarded.
    deduplicated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    faces_detected: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pose_available: Option<bool>,
    triggered: Vec<EventKind>,
    review_status: proctor_core::DetectorReviewStatus,
}

#[derive(Debug, Serialize)]
struct SessionSummary {
    session_id: String,
    exam_id: String,
    candidate_id: String,
    lifecycle: proctor_core::LifecycleStatus,
    started_ms: i64,
    ends_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    submitted_ms: Option<i64>,
    detector_review_status: proctor_core::DetectorReviewStatus,
    verdict_status: VerdictStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_outcome: Option<proctor_core::FinalOutcome>,
    event_count: usize,
}

impl From<&ExamSession> for SessionSummary {
    fn from(session: &ExamSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            exam_id: session.exam_id.clone(),
            candidate_id: session.candidate_id.clone(),
            lifecycle: session.lifecycle,
            started_ms: session.started_ms,
            ends_ms: session.ends_ms,
            submitted_ms: session.submitted_ms,
            detector_review_status: session.detector.review_status,
            verdict_status: session.verdict.status,
            final_outcome: session.final_outcome,
            event_count: session.event_ids.len(),
        }
    }
}

/// Full snapshot for review surfaces: the aggregate plus its ledger in
/// display order.
#[derive(Debug, Serialize)]
struct SessionSnapshot {
    session: ExamSession,
    candidate_status: CandidateStatus,
    events: Vec<IntegrityEvent>,
}

#[derive(Debug, Serialize)]
struct CandidateSessionView {
    #[serde(flatten)]
    summary: SessionSummary,
    candidate_status: CandidateStatus,
}

// ============================================================================
// Exam Registry (collaborator stub)
// ============================================================================

async fn register_exam(
    State(state): State<SharedState>,
    Json(exam): Json<ExamDefinition>,
) -> impl IntoResponse {
    if exam.exam_id.is_empty() {
        return failure(EngineError::validation("exam_id is required"));
    }
    match state.store.register_exam(&exam) {
        Ok(()) => (
            StatusCode::OK,
            ApiResponse::ok(serde_json::json!({ "exam_id": exam.exam_id })),
        ),
        Err(e) => failure(e),
    }
}

// ============================================================================
// Candidate: Session Lifecycle
// ============================================================================

async fn start_exam(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<StartExamRequest>,
) -> impl IntoResponse {
    let result = actor_id(&headers)
        .and_then(|candidate| state.store.start_session(&req.exam_id, &candidate, now_ms()));
    match result {
        Ok(session) => {
            tracing::info!(
                session_id = %session.session_id,
                exam_id = %session.exam_id,
                "exam session active"
            );
            (StatusCode::OK, ApiResponse::ok(session))
        }
        Err(e) => failure(e),
    }
}

async fn submit_exam(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<SubmitExamRequest>,
) -> impl IntoResponse {
    let now = now_ms();
    let result = actor_id(&headers).and_then(|candidate| {
        state.store.with_session(&req.session_id, |session, _events| {
            require_owner(session, &candidate)?;
            let responses: Vec<Response> = req
                .responses
                .iter()
                .map(|r| Response::new(&r.question_id, r.answer.clone()))
                .collect();
            session.submit(responses, now)
        })
    });
    match result {
        Ok(_) => (
            StatusCode::OK,
            ApiResponse::ok(serde_json::json!({ "submitted": true })),
        ),
        Err(e) => failure(e),
    }
}

async fn session_status(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let result = actor_id(&headers).and_then(|candidate| {
        let stored = state.store.load(&session_id)?;
        require_owner(&stored.session, &candidate)?;
        Ok(stored.session)
    });
    match result {
        Ok(session) => (
            StatusCode::OK,
            ApiResponse::ok(serde_json::json!({
                "status": session.lifecycle,
                "started_ms": session.started_ms,
                "ends_ms": session.ends_ms,
                "submitted_ms": session.submitted_ms,
            })),
        ),
        Err(e) => failure(e),
    }
}

// ============================================================================
// Integrity: Client Events & Frame Samples
// ============================================================================

async fn log_client_event(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<ClientEventRequest>,
) -> impl IntoResponse {
    if !req.event_type.is_client_reportable() {
        return failure(EngineError::validation(
            "event_type must be TAB_SWITCH or FOCUS_LOSS",
        ));
    }
    let now = now_ms();
    let result = actor_id(&headers).and_then(|candidate| {
        state.store.with_session(&req.session_id, |session, events| {
            require_owner(session, &candidate)?;
            if !session.can_append_events() {
                return Err(EngineError::state_conflict("exam session is not in progress"));
            }
            let mut event =
                IntegrityEvent::new(&session.session_id, req.event_type, EventSource::Client, now);
            if let Some(details) = &req.details {
                event = event.with_metadata("details", details.clone());
            }
            session.append_event_id(&event.event_id);
            events.push(event);
            Ok(())
        })
    });
    match result {
        Ok(_) => (
            StatusCode::CREATED,
            ApiResponse::ok(serde_json::json!({ "logged": true })),
        ),
        Err(e) => failure(e),
    }
}

async fn ingest_frame_sample(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<FrameSampleRequest>,
) -> impl IntoResponse {
    if req.image_base64.is_empty() {
        return failure(EngineError::validation("image_base64 is required"));
    }
    let candidate = match actor_id(&headers) {
        Ok(candidate) => candidate,
        Err(e) => return failure(e),
    };

    // Cheap gates first: ownership, lifecycle, and the sample-rate check
    // all run against the read-time snapshot before the inference round
    // trip is paid for.
    let now = now_ms();
    let stored = match state.store.load(&req.session_id) {
        Ok(stored) => stored,
        Err(e) => return failure(e),
    };
    if let Err(e) = require_owner(&stored.session, &candidate) {
        return failure(e);
    }
    if !stored.session.can_append_events() {
        return failure(EngineError::state_conflict("exam session is not in progress"));
    }
    if !state.gate.accepts(stored.session.detector.last_sample_ms, now) {
        // Too frequent: discarded as a dedup, not an error.
        return (
            StatusCode::OK,
            ApiResponse::ok(FrameSampleResponse {
                accepted: false,
                deduplicated: true,
                faces_detected: None,
                pose_available: None,
                triggered: Vec::new(),
                review_status: stored.session.detector.review_status,
            }),
        );
    }

    // Blocking inference round trip, with no lock held. Failure leaves
    // the detector untouched; the next sampled frame retries naturally.
    let observation = match state.inference.observe_frame(&req.image_base64).await {
        Ok(observation) => observation,
        Err(e) => {
            tracing::warn!(session_id = %req.session_id, error = %e, "frame inference failed");
            return failure(EngineError::from(e));
        }
    };

    let digest = frame_digest(&req.image_base64);
    let result = state.store.with_session(&req.session_id, |session, events| {
        // Re-check against the authoritative state inside the write
        // loop: a concurrent frame may have landed since the read.
        if !state.gate.accepts(session.detector.last_sample_ms, now) {
            return Ok(None);
        }
        let eval = state.engine.evaluate(&session.detector, &observation, now);
        session.detector = eval.state.clone();
        for signal in &eval.triggered {
            let event = signal
                .into_event(&session.session_id, now)
                .with_metadata("frame_sha256", serde_json::json!(digest));
            session.append_event_id(&event.event_id);
            events.push(event);
        }
        Ok(Some(eval))
    });

    match result {
        Ok((Some(eval), session)) => {
            if eval.escalated {
                tracing::info!(
                    session_id = %session.session_id,
                    triggers = session.detector.escalation_trigger_count(),
                    "session escalated to human review"
                );
            }
            (
                StatusCode::OK,
                ApiResponse::ok(FrameSampleResponse {
                    accepted: true,
                    deduplicated: false,
                    faces_detected: Some(observation.faces_detected),
                    pose_available: Some(observation.pose_available()),
                    triggered: eval.triggered.iter().map(|t| t.kind.into()).collect(),
                    review_status: session.detector.review_status,
                }),
            )
        }
        Ok((None, session)) => (
            StatusCode::OK,
            ApiResponse::ok(FrameSampleResponse {
                accepted: false,
                deduplicated: true,
                faces_detected: None,
                pose_available: None,
                triggered: Vec::new(),
                review_status: session.detector.review_status,
            }),
        ),
        Err(e) => failure(e),
    }
}

// ============================================================================
// Proctor: Review & Verdicts
// ============================================================================

async fn list_sessions_for_review(State(state): State<SharedState>) -> impl IntoResponse {
    match state.store.sessions_for_review() {
        Ok(sessions) => (
            StatusCode::OK,
            ApiResponse::ok(
                sessions
                    .iter()
                    .map(SessionSummary::from)
                    .collect::<Vec<_>>(),
            ),
        ),
        Err(e) => failure(e),
    }
}

async fn session_details(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let result = state.store.load(&session_id).and_then(|stored| {
        let events = state.store.events(&session_id)?;
        Ok(SessionSnapshot {
            candidate_status: candidate_status(&stored.session),
            session: stored.session,
            events,
        })
    });
    match result {
        Ok(snapshot) => (StatusCode::OK, ApiResponse::ok(snapshot)),
        Err(e) => failure(e),
    }
}

async fn submit_verdict(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<VerdictRequest>,
) -> impl IntoResponse {
    let now = now_ms();
    let result = actor_id(&headers).and_then(|proctor| {
        state.store.with_session(&req.session_id, |session, _events| {
            session.decide_verdict(req.verdict, &proctor, req.remarks.clone(), now)?;
            Ok(try_finalize(session))
        })
    });
    match result {
        Ok((finalized, session)) => {
            if finalized {
                tracing::info!(
                    session_id = %session.session_id,
                    outcome = ?session.final_outcome,
                    "session finalized"
                );
            }
            (
                StatusCode::OK,
                ApiResponse::ok(serde_json::json!({
                    "verdict": session.verdict,
                    "final_outcome": session.final_outcome,
                })),
            )
        }
        Err(e) => failure(e),
    }
}

async fn terminate_session(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let now = now_ms();
    let result = state
        .store
        .with_session(&session_id, |session, _events| session.terminate(now));
    match result {
        Ok((_, session)) => {
            tracing::info!(session_id = %session.session_id, "session terminated");
            (
                StatusCode::OK,
                ApiResponse::ok(SessionSummary::from(&session)),
            )
        }
        Err(e) => failure(e),
    }
}

// ============================================================================
// Admin: Academic Evaluation
// ============================================================================

async fn list_finished_sessions(State(state): State<SharedState>) -> impl IntoResponse {
    match state.store.finished_sessions() {
        Ok(sessions) => (
            StatusCode::OK,
            ApiResponse::ok(
                sessions
                    .iter()
                    .map(SessionSummary::from)
                    .collect::<Vec<_>>(),
            ),
        ),
        Err(e) => failure(e),
    }
}

async fn evaluate_session(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    // The definition is immutable after registration, so it can be
    // fetched outside the write loop.
    let exam = match state
        .store
        .load(&session_id)
        .and_then(|stored| state.store.exam(&stored.session.exam_id))
    {
        Ok(exam) => exam,
        Err(e) => return failure(e),
    };

    let result = state.store.with_session(&session_id, |session, _events| {
        let evaluation = evaluate_academic(&exam, &mut session.responses);
        session.complete_academic(evaluation)?;
        Ok(try_finalize(session))
    });
    match result {
        Ok((finalized, session)) => {
            if finalized {
                tracing::info!(
                    session_id = %session.session_id,
                    outcome = ?session.final_outcome,
                    "session finalized"
                );
            }
            (
                StatusCode::OK,
                ApiResponse::ok(serde_json::json!({
                    "evaluation": session.academic,
                    "final_outcome": session.final_outcome,
                })),
            )
        }
        Err(e) => failure(e),
    }
}

async fn submit_review_score(
    State(state): State<SharedState>,
    Path(response_id): Path<String>,
    Json(req): Json<ReviewScoreRequest>,
) -> impl IntoResponse {
    let stored = match state.store.session_for_response(&response_id) {
        Ok(stored) => stored,
        Err(e) => return failure(e),
    };
    let session_id = stored.session.session_id;

    let result = state.store.with_session(&session_id, |session, _events| {
        session.record_review_score(&response_id, req.score)?;
        Ok(try_finalize(session))
    });
    match result {
        Ok((finalized, session)) => {
            if finalized {
                tracing::info!(
                    session_id = %session.session_id,
                    outcome = ?session.final_outcome,
                    "session finalized"
                );
            }
            (
                StatusCode::OK,
                ApiResponse::ok(serde_json::json!({
                    "evaluation": session.academic,
                    "final_outcome": session.final_outcome,
                })),
            )
        }
        Err(e) => failure(e),
    }
}

// ============================================================================
// Candidate: Results
// ============================================================================

async fn list_my_sessions(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let result = actor_id(&headers)
        .and_then(|candidate| state.store.sessions_for_candidate(&candidate));
    match result {
        Ok(sessions) => (
            StatusCode::OK,
            ApiResponse::ok(
                sessions
                    .iter()
                    .map(|session| CandidateSessionView {
                        summary: SessionSummary::from(session),
                        candidate_status: candidate_status(session),
                    })
                    .collect::<Vec<_>>(),
            ),
        ),
        Err(e) => failure(e),
    }
}

async fn my_session_result(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let result = actor_id(&headers).and_then(|candidate| {
        let stored = state.store.load(&session_id)?;
        require_owner(&stored.session, &candidate)?;
        Ok(stored.session)
    });
    let session = match result {
        Ok(session) => session,
        Err(e) => return failure(e),
    };

    match candidate_status(&session) {
        CandidateStatus::Evaluated => (
            StatusCode::OK,
            ApiResponse::ok(serde_json::json!({
                "score": session.academic.score,
                "total_marks": session.academic.total_marks,
            })),
        ),
        status => (
            StatusCode::FORBIDDEN,
            ApiResponse::err(&format!(
                "result is not available; status: {}",
                status.as_str()
            )),
        ),
    }
}

// ============================================================================
// Health & Router
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        // Exam registry (definitions arrive from the authoring service)
        .route("/api/exams", post(register_exam))
        // Candidate lifecycle
        .route("/api/exam/start", post(start_exam))
        .route("/api/exam/submit", post(submit_exam))
        .route("/api/exam/:session_id/status", get(session_status))
        // Integrity ingestion
        .route("/api/integrity/event", post(log_client_event))
        .route("/api/integrity/signal", post(ingest_frame_sample))
        // Proctor review
        .route("/api/proctor/sessions", get(list_sessions_for_review))
        .route("/api/proctor/sessions/:session_id", get(session_details))
        .route("/api/proctor/verdict", post(submit_verdict))
        .route(
            "/api/proctor/sessions/:session_id/terminate",
            post(terminate_session),
        )
        // Admin evaluation
        .route("/api/admin/sessions", get(list_finished_sessions))
        .route("/api/admin/evaluate/:session_id", post(evaluate_session))
        .route(
            "/api/admin/responses/:response_id/score",
            post(submit_review_score),
        )
        // Candidate results
        .route("/api/candidate/sessions", get(list_my_sessions))
        .route(
            "/api/candidate/sessions/:session_id/result",
            get(my_session_result),
        )
        .layer(cors)
        .with_state(state)
}

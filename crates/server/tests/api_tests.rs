//! End-to-end API tests: the axum router driven in process, with the
//! inference collaborator mocked by a local HTTP listener.

use axum::{routing::post, Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use proctor_server::{build_router, build_state, Database, ServerConfig};
use proctor_signald::RuleConfig;

/// Spawns a stub inference service returning fixed face/pose payloads.
/// Returns its base URL.
async fn spawn_inference_stub(faces: Value, pose: Value) -> String {
    let app = Router::new()
        .route(
            "/infer/face-presence",
            post(move |_body: Json<Value>| {
                let faces = faces.clone();
                async move { Json(faces) }
            }),
        )
        .route(
            "/infer/head-pose",
            post(move |_body: Json<Value>| {
                let pose = pose.clone();
                async move { Json(pose) }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Stub inference service whose endpoints always fail.
async fn spawn_failing_inference_stub() -> String {
    async fn fail() -> (axum::http::StatusCode, &'static str) {
        (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "server error")
    }
    let app = Router::new()
        .route("/infer/face-presence", post(fail))
        .route("/infer/head-pose", post(fail));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn test_router(inference_url: &str, rule: RuleConfig) -> Router {
    let config = ServerConfig {
        inference_url: inference_url.to_string(),
        rule,
        ..ServerConfig::default()
    };
    let state = build_state(&config, Database::open_in_memory().unwrap());
    build_router(state)
}

/// Rule config that accepts every sample so tests need no sleeps.
fn open_gate_rules() -> RuleConfig {
    RuleConfig {
        sample_interval_ms: 0,
        ..RuleConfig::default()
    }
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    actor: Option<&str>,
    body: Option<Value>,
) -> (u16, Value) {
    let mut builder = axum::http::Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        builder = builder.header("x-actor-id", actor);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status().as_u16();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn exam_payload(exam_id: &str) -> Value {
    json!({
        "exam_id": exam_id,
        "title": "Systems 101",
        "duration_minutes": 60,
        "questions": [
            {
                "question_id": "q1",
                "kind": "MCQ",
                "prompt": "2 + 2 = ?",
                "marks": 2,
                "correct_option": 1
            },
            {
                "question_id": "q2",
                "kind": "SUBJECTIVE",
                "prompt": "Explain your approach.",
                "marks": 5
            }
        ]
    })
}

async fn register_and_start(app: &Router, exam_id: &str, candidate: &str) -> String {
    let (status, _) = request(app, "POST", "/api/exams", None, Some(exam_payload(exam_id))).await;
    assert_eq!(status, 200);

    let (status, body) = request(
        app,
        "POST",
        "/api/exam/start",
        Some(candidate),
        Some(json!({ "exam_id": exam_id })),
    )
    .await;
    assert_eq!(status, 200);
    body["data"]["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_router("http://127.0.0.1:9", open_gate_rules());
    let (status, body) = request(&app, "GET", "/api/health", None, None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn candidate_lifecycle_round_trip() {
    let app = test_router("http://127.0.0.1:9", open_gate_rules());
    let session_id = register_and_start(&app, "exam-1", "cand-1").await;

    // Retried start returns the same session.
    let (status, body) = request(
        &app,
        "POST",
        "/api/exam/start",
        Some("cand-1"),
        Some(json!({ "exam_id": "exam-1" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["session_id"], session_id.as_str());

    let (status, body) = request(
        &app,
        "GET",
        &format!("/api/exam/{session_id}/status"),
        Some("cand-1"),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "IN_PROGRESS");

    let (status, _) = request(
        &app,
        "POST",
        "/api/exam/submit",
        Some("cand-1"),
        Some(json!({
            "session_id": session_id,
            "responses": [
                { "question_id": "q1", "answer": "1" },
                { "question_id": "q2", "answer": "an essay" }
            ]
        })),
    )
    .await;
    assert_eq!(status, 200);

    // Exactly-once submit.
    let (status, body) = request(
        &app,
        "POST",
        "/api/exam/submit",
        Some("cand-1"),
        Some(json!({ "session_id": session_id, "responses": [] })),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "session is already SUBMITTED");

    // A retake is permanently blocked.
    let (status, _) = request(
        &app,
        "POST",
        "/api/exam/start",
        Some("cand-1"),
        Some(json!({ "exam_id": "exam-1" })),
    )
    .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn foreign_sessions_look_missing() {
    let app = test_router("http://127.0.0.1:9", open_gate_rules());
    let session_id = register_and_start(&app, "exam-1", "cand-1").await;

    let (status, _) = request(
        &app,
        "GET",
        &format!("/api/exam/{session_id}/status"),
        Some("cand-2"),
        None,
    )
    .await;
    assert_eq!(status, 404);

    let (status, _) = request(
        &app,
        "POST",
        "/api/exam/submit",
        None,
        Some(json!({ "session_id": session_id, "responses": [] })),
    )
    .await;
    assert_eq!(status, 400, "missing actor header is a validation error");
}

#[tokio::test]
async fn client_events_append_while_in_progress_only() {
    let app = test_router("http://127.0.0.1:9", open_gate_rules());
    let session_id = register_and_start(&app, "exam-1", "cand-1").await;

    let (status, _) = request(
        &app,
        "POST",
        "/api/integrity/event",
        Some("cand-1"),
        Some(json!({
            "session_id": session_id,
            "event_type": "TAB_SWITCH",
            "details": { "hidden_ms": 1200 }
        })),
    )
    .await;
    assert_eq!(status, 201);

    // Signal-only kinds are not client-reportable.
    let (status, _) = request(
        &app,
        "POST",
        "/api/integrity/event",
        Some("cand-1"),
        Some(json!({ "session_id": session_id, "event_type": "NO_FACE" })),
    )
    .await;
    assert_eq!(status, 400);

    let (status, _) = request(
        &app,
        "POST",
        "/api/exam/submit",
        Some("cand-1"),
        Some(json!({ "session_id": session_id, "responses": [] })),
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = request(
        &app,
        "POST",
        "/api/integrity/event",
        Some("cand-1"),
        Some(json!({ "session_id": session_id, "event_type": "FOCUS_LOSS" })),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "exam session is not in progress");

    // The one accepted event shows up in the proctor snapshot.
    let (status, body) = request(
        &app,
        "GET",
        &format!("/api/proctor/sessions/{session_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, 200);
    let events = body["data"]["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["kind"], "TAB_SWITCH");
    assert_eq!(events[0]["source"], "CLIENT");
}

#[tokio::test]
async fn empty_frames_trigger_a_no_face_event() {
    let inference =
        spawn_inference_stub(json!({ "faces_detected": 0 }), json!({ "yaw": 0.0, "pitch": 0.0, "roll": 0.0 }))
            .await;
    let app = test_router(&inference, open_gate_rules());
    let session_id = register_and_start(&app, "exam-1", "cand-1").await;

    for expected_triggers in [0, 0, 1] {
        let (status, body) = request(
            &app,
            "POST",
            "/api/integrity/signal",
            Some("cand-1"),
            Some(json!({ "session_id": session_id, "image_base64": "aGVsbG8=" })),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["accepted"], true);
        assert_eq!(body["data"]["faces_detected"], 0);
        assert_eq!(
            body["data"]["triggered"].as_array().unwrap().len(),
            expected_triggers
        );
    }

    let (_, body) = request(
        &app,
        "GET",
        &format!("/api/proctor/sessions/{session_id}"),
        None,
        None,
    )
    .await;
    let events = body["data"]["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["kind"], "NO_FACE");
    assert_eq!(events[0]["source"], "SIGNAL");
    assert_eq!(events[0]["metadata"]["streak_frames"], 3);
    assert!(events[0]["metadata"]["frame_sha256"]
        .as_str()
        .unwrap()
        .starts_with("frm_"));
}

#[tokio::test]
async fn too_frequent_frames_are_silently_deduplicated() {
    let inference =
        spawn_inference_stub(json!({ "faces_detected": 1 }), json!({ "yaw": 0.0, "pitch": 0.0, "roll": 0.0 }))
            .await;
    // A wide-open interval: only the first sample may pass.
    let rules = RuleConfig {
        sample_interval_ms: 600_000,
        ..RuleConfig::default()
    };
    let app = test_router(&inference, rules);
    let session_id = register_and_start(&app, "exam-1", "cand-1").await;

    let (status, body) = request(
        &app,
        "POST",
        "/api/integrity/signal",
        Some("cand-1"),
        Some(json!({ "session_id": session_id, "image_base64": "aGVsbG8=" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["accepted"], true);

    let (status, body) = request(
        &app,
        "POST",
        "/api/integrity/signal",
        Some("cand-1"),
        Some(json!({ "session_id": session_id, "image_base64": "aGVsbG8=" })),
    )
    .await;
    assert_eq!(status, 200, "a dropped sample is not an error");
    assert_eq!(body["data"]["accepted"], false);
    assert_eq!(body["data"]["deduplicated"], true);
}

#[tokio::test]
async fn inference_failure_is_transient_and_mutates_nothing() {
    let inference = spawn_failing_inference_stub().await;
    let app = test_router(&inference, open_gate_rules());
    let session_id = register_and_start(&app, "exam-1", "cand-1").await;

    let (status, body) = request(
        &app,
        "POST",
        "/api/integrity/signal",
        Some("cand-1"),
        Some(json!({ "session_id": session_id, "image_base64": "aGVsbG8=" })),
    )
    .await;
    assert_eq!(status, 502);
    assert_eq!(body["success"], false);

    let (_, body) = request(
        &app,
        "GET",
        &format!("/api/proctor/sessions/{session_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(body["data"]["events"].as_array().unwrap().len(), 0);
    let detector = &body["data"]["session"]["detector"];
    assert_eq!(detector["no_face"]["streak"], 0);
    assert!(detector["last_sample_ms"].is_null());
}

#[tokio::test]
async fn missing_pose_axes_grow_the_pose_unavailable_streak() {
    let inference =
        spawn_inference_stub(json!({ "faces_detected": 1 }), json!({ "yaw": 12.0, "pitch": null }))
            .await;
    let app = test_router(&inference, open_gate_rules());
    let session_id = register_and_start(&app, "exam-1", "cand-1").await;

    let (status, body) = request(
        &app,
        "POST",
        "/api/integrity/signal",
        Some("cand-1"),
        Some(json!({ "session_id": session_id, "image_base64": "aGVsbG8=" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["pose_available"], false);

    let (_, body) = request(
        &app,
        "GET",
        &format!("/api/proctor/sessions/{session_id}"),
        None,
        None,
    )
    .await;
    let detector = &body["data"]["session"]["detector"];
    assert_eq!(detector["pose_unavailable"]["streak"], 1);
    assert_eq!(detector["looking_away"]["streak"], 0);
}

#[tokio::test]
async fn verdict_and_scoring_finalize_the_session() {
    let app = test_router("http://127.0.0.1:9", open_gate_rules());
    let session_id = register_and_start(&app, "exam-1", "cand-1").await;

    let (status, _) = request(
        &app,
        "POST",
        "/api/exam/submit",
        Some("cand-1"),
        Some(json!({
            "session_id": session_id,
            "responses": [
                { "question_id": "q1", "answer": "1" },
                { "question_id": "q2", "answer": "an essay" }
            ]
        })),
    )
    .await;
    assert_eq!(status, 200);

    // The submitted session is waiting on a verdict.
    let (_, body) = request(&app, "GET", "/api/proctor/sessions", None, None).await;
    let pending = body["data"].as_array().unwrap();
    assert!(pending.iter().any(|s| s["session_id"] == session_id.as_str()));

    // Result is unavailable until finalization.
    let (status, _) = request(
        &app,
        "GET",
        &format!("/api/candidate/sessions/{session_id}/result"),
        Some("cand-1"),
        None,
    )
    .await;
    assert_eq!(status, 403);

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/admin/evaluate/{session_id}"),
        Some("admin-1"),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["evaluation"]["score"], 2);
    assert_eq!(body["data"]["evaluation"]["review_status"], "PENDING");
    assert!(body["data"]["final_outcome"].is_null());

    let (status, body) = request(
        &app,
        "POST",
        "/api/proctor/verdict",
        Some("proctor-1"),
        Some(json!({
            "session_id": session_id,
            "verdict": "CLEARED",
            "remarks": "nothing suspicious"
        })),
    )
    .await;
    assert_eq!(status, 200);
    assert!(body["data"]["final_outcome"].is_null(), "review still open");

    // Score the essay: both tracks terminal, outcome freezes.
    let (_, body) = request(
        &app,
        "GET",
        &format!("/api/proctor/sessions/{session_id}"),
        None,
        None,
    )
    .await;
    let response_id = body["data"]["session"]["responses"][1]["response_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/admin/responses/{response_id}/score"),
        Some("admin-1"),
        Some(json!({ "score": 4 })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["final_outcome"], "EVALUATED");
    assert_eq!(body["data"]["evaluation"]["score"], 6);

    // A second verdict is rejected and the outcome stays frozen.
    let (status, body) = request(
        &app,
        "POST",
        "/api/proctor/verdict",
        Some("proctor-2"),
        Some(json!({ "session_id": session_id, "verdict": "INVALIDATED" })),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "session already finalized");

    let (status, body) = request(
        &app,
        "GET",
        &format!("/api/candidate/sessions/{session_id}/result"),
        Some("cand-1"),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["score"], 6);
    assert_eq!(body["data"]["total_marks"], 7);

    let (_, body) = request(&app, "GET", "/api/candidate/sessions", Some("cand-1"), None).await;
    let sessions = body["data"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["candidate_status"], "EVALUATED");
}

#[tokio::test]
async fn terminated_sessions_reject_candidate_writes() {
    let app = test_router("http://127.0.0.1:9", open_gate_rules());
    let session_id = register_and_start(&app, "exam-1", "cand-1").await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/proctor/sessions/{session_id}/terminate"),
        Some("proctor-1"),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["lifecycle"], "TERMINATED");

    let (status, _) = request(
        &app,
        "POST",
        "/api/exam/submit",
        Some("cand-1"),
        Some(json!({ "session_id": session_id, "responses": [] })),
    )
    .await;
    assert_eq!(status, 409);

    // Termination is once-only.
    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/proctor/sessions/{session_id}/terminate"),
        Some("proctor-1"),
        None,
    )
    .await;
    assert_eq!(status, 409);
}

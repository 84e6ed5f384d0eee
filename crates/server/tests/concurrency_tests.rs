//! Optimistic-concurrency tests: version check-and-set, retry on
//! conflict, and racing finalize-triggering writes.

use proctor_core::{
    evaluate_academic, try_finalize, EngineError, ExamDefinition, FinalOutcome, Question,
    QuestionKind, Response, VerdictStatus,
};
use proctor_server::{Database, SessionStore};

fn mixed_exam() -> ExamDefinition {
    ExamDefinition {
        exam_id: "exam-1".to_string(),
        title: "Mixed".to_string(),
        duration_minutes: 60,
        questions: vec![
            Question {
                question_id: "q1".to_string(),
                kind: QuestionKind::Mcq,
                prompt: "pick".to_string(),
                marks: 2,
                correct_option: Some(1),
            },
            Question {
                question_id: "q2".to_string(),
                kind: QuestionKind::Subjective,
                prompt: "explain".to_string(),
                marks: 5,
                correct_option: None,
            },
        ],
    }
}

fn submitted_store() -> (SessionStore, String, String) {
    let store = SessionStore::new(Database::open_in_memory().unwrap());
    let exam = mixed_exam();
    store.register_exam(&exam).unwrap();
    let session = store.start_session("exam-1", "cand-1", 1_000).unwrap();
    store
        .with_session(&session.session_id, |s, _| {
            s.submit(
                vec![Response::new("q1", "1"), Response::new("q2", "essay")],
                5_000,
            )
        })
        .unwrap();
    store
        .with_session(&session.session_id, |s, _| {
            let evaluation = evaluate_academic(&exam, &mut s.responses);
            s.complete_academic(evaluation)?;
            Ok(try_finalize(s))
        })
        .unwrap();
    let response_id = store.load(&session.session_id).unwrap().session.responses[1]
        .response_id
        .clone();
    (store, session.session_id, response_id)
}

#[test]
fn stale_write_is_rejected() {
    let (store, session_id, _) = submitted_store();

    let first = store.load(&session_id).unwrap();
    let second = store.load(&session_id).unwrap();
    assert_eq!(first.version, second.version);

    let mut a = first.session.clone();
    a.decide_verdict(VerdictStatus::Cleared, "proctor-1", None, 9_000)
        .unwrap();
    store.commit(&a, first.version, &[]).unwrap();

    // The second writer still holds the old version: its blind commit
    // must bounce instead of clobbering the verdict.
    let mut b = second.session.clone();
    b.detector.escalate();
    let err = store.commit(&b, second.version, &[]).unwrap_err();
    assert_eq!(err, EngineError::Conflict);

    let fresh = store.load(&session_id).unwrap();
    assert_eq!(fresh.session.verdict.status, VerdictStatus::Cleared);
}

#[test]
fn with_session_rereads_after_a_conflict() {
    let (store, session_id, _) = submitted_store();

    // An interleaved writer bumps the version between our read and
    // write; the retry loop must fold both mutations in.
    let stale = store.load(&session_id).unwrap();
    let mut interloper = stale.session.clone();
    assert!(interloper.detector.escalate());
    store.commit(&interloper, stale.version, &[]).unwrap();

    store
        .with_session(&session_id, |s, _| {
            s.decide_verdict(VerdictStatus::Cleared, "proctor-1", None, 9_000)
        })
        .unwrap();

    let fresh = store.load(&session_id).unwrap();
    assert!(fresh.session.detector.is_under_review());
    assert_eq!(fresh.session.verdict.status, VerdictStatus::Cleared);
}

#[test]
fn racing_finalize_triggers_produce_exactly_one_outcome() {
    for _ in 0..10 {
        let (store, session_id, response_id) = submitted_store();

        let outcomes = std::thread::scope(|scope| {
            let verdict_writer = scope.spawn(|| {
                store
                    .with_session(&session_id, |s, _| {
                        s.decide_verdict(VerdictStatus::Cleared, "proctor-1", None, 9_000)?;
                        Ok(try_finalize(s))
                    })
                    .map(|(finalized, _)| finalized)
            });
            let review_writer = scope.spawn(|| {
                store
                    .with_session(&session_id, |s, _| {
                        s.record_review_score(&response_id, 4)?;
                        Ok(try_finalize(s))
                    })
                    .map(|(finalized, _)| finalized)
            });
            (
                verdict_writer.join().unwrap(),
                review_writer.join().unwrap(),
            )
        });

        // Both writes land; whichever observed both terminal tracks
        // finalized. Never two, never zero.
        let finalized_count =
            [outcomes.0.unwrap(), outcomes.1.unwrap()].iter().filter(|f| **f).count();
        assert_eq!(finalized_count, 1);

        let fresh = store.load(&session_id).unwrap();
        assert_eq!(fresh.session.final_outcome, Some(FinalOutcome::Evaluated));
        assert_eq!(fresh.session.academic.score, 6);
        assert_eq!(fresh.session.verdict.status, VerdictStatus::Cleared);
    }
}

#[test]
fn racing_escalation_and_verdict_both_survive() {
    let (store, session_id, _) = submitted_store();

    std::thread::scope(|scope| {
        let escalator = scope.spawn(|| {
            store.with_session(&session_id, |s, _| {
                s.detector.escalate();
                Ok(())
            })
        });
        let decider = scope.spawn(|| {
            store.with_session(&session_id, |s, _| {
                s.decide_verdict(VerdictStatus::Invalidated, "proctor-1", None, 9_000)
            })
        });
        escalator.join().unwrap().unwrap();
        decider.join().unwrap().unwrap();
    });

    let fresh = store.load(&session_id).unwrap();
    assert!(fresh.session.detector.is_under_review());
    assert_eq!(fresh.session.verdict.status, VerdictStatus::Invalidated);
}

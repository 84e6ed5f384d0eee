// Database persistence layer using SQLite

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use proctor_core::{EngineError, ExamDefinition, ExamSession, IntegrityEvent};

/// A session aggregate together with its persistence version, the token
/// every conditional write checks against.
#[derive(Debug, Clone)]
pub struct VersionedSession {
    pub session: ExamSession,
    pub version: i64,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS exams (
                exam_id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                exam_id TEXT NOT NULL,
                candidate_id TEXT NOT NULL,
                lifecycle TEXT NOT NULL,
                verdict_status TEXT NOT NULL,
                final_outcome TEXT,
                data TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- One live attempt per (exam, candidate). Session creation is
            -- a conditional insert against this index, not read-then-write.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active_attempt
                ON sessions(exam_id, candidate_id)
                WHERE lifecycle = 'IN_PROGRESS';

            CREATE INDEX IF NOT EXISTS idx_sessions_candidate
                ON sessions(candidate_id);

            CREATE INDEX IF NOT EXISTS idx_sessions_lifecycle
                ON sessions(lifecycle);

            -- Append-only ledger; rowid order is the display order.
            CREATE TABLE IF NOT EXISTS integrity_events (
                event_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                source TEXT NOT NULL,
                ts_ms INTEGER NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_session
                ON integrity_events(session_id);
        "#,
        )?;
        Ok(())
    }

    // Exam registry (collaborator stub: definitions arrive pre-published)

    pub fn save_exam(&self, exam: &ExamDefinition) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(exam).map_err(storage)?;
        conn.execute(
            "INSERT OR REPLACE INTO exams (exam_id, data, created_at) VALUES (?1, ?2, ?3)",
            params![exam.exam_id, data, now_rfc3339()],
        )
        .map_err(storage)?;
        Ok(())
    }

    pub fn get_exam(&self, exam_id: &str) -> Result<Option<ExamDefinition>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM exams WHERE exam_id = ?1",
                params![exam_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data).map_err(storage)?)),
            None => Ok(None),
        }
    }

    // Session aggregate

    /// Inserts a brand-new session. Fails with `Conflict` when another
    /// in-progress attempt for the same (exam, candidate) already holds
    /// the uniqueness slot.
    pub fn insert_session(&self, session: &ExamSession) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(session).map_err(storage)?;
        let now = now_rfc3339();
        let result = conn.execute(
            "INSERT INTO sessions (session_id, exam_id, candidate_id, lifecycle, \
             verdict_status, final_outcome, data, version, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
            params![
                session.session_id,
                session.exam_id,
                session.candidate_id,
                session.lifecycle.as_str(),
                verdict_column(session),
                outcome_column(session),
                data,
                now,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(EngineError::Conflict)
            }
            Err(e) => Err(storage(e)),
        }
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<VersionedSession>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT data, version FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage)?;
        match row {
            Some((data, version)) => Ok(Some(VersionedSession {
                session: serde_json::from_str(&data).map_err(storage)?,
                version,
            })),
            None => Ok(None),
        }
    }

    /// Finds a session for the pair in one of the given lifecycle states.
    pub fn find_session_by_attempt(
        &self,
        exam_id: &str,
        candidate_id: &str,
        lifecycles: &[&str],
    ) -> Result<Option<VersionedSession>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let placeholders = lifecycles
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT data, version FROM sessions \
             WHERE exam_id = ?1 AND candidate_id = ?2 AND lifecycle IN ({placeholders}) \
             ORDER BY created_at DESC LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql).map_err(storage)?;
        let mut values: Vec<&dyn rusqlite::ToSql> = vec![&exam_id, &candidate_id];
        for lifecycle in lifecycles {
            values.push(lifecycle);
        }
        let row: Option<(String, i64)> = stmt
            .query_row(values.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()
            .map_err(storage)?;
        match row {
            Some((data, version)) => Ok(Some(VersionedSession {
                session: serde_json::from_str(&data).map_err(storage)?,
                version,
            })),
            None => Ok(None),
        }
    }

    /// Locates the session owning a response id. Score submissions are
    /// addressed by response, so this walks the embedded response list
    /// with SQLite's json_each.
    pub fn find_session_by_response(
        &self,
        response_id: &str,
    ) -> Result<Option<VersionedSession>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT data, version FROM sessions WHERE EXISTS ( \
                     SELECT 1 FROM json_each(json_extract(sessions.data, '$.responses')) \
                     WHERE json_extract(json_each.value, '$.response_id') = ?1 \
                 ) LIMIT 1",
                params![response_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage)?;
        match row {
            Some((data, version)) => Ok(Some(VersionedSession {
                session: serde_json::from_str(&data).map_err(storage)?,
                version,
            })),
            None => Ok(None),
        }
    }

    /// Conditional write: replaces the aggregate only if the stored
    /// version still matches, appending any new ledger events in the
    /// same transaction. Zero affected rows means the aggregate moved
    /// under us and the caller must re-read and retry.
    pub fn update_session(
        &self,
        session: &ExamSession,
        expected_version: i64,
        events: &[IntegrityEvent],
    ) -> Result<(), EngineError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(storage)?;

        let data = serde_json::to_string(session).map_err(storage)?;
        let rows = tx
            .execute(
                "UPDATE sessions SET data = ?1, lifecycle = ?2, verdict_status = ?3, \
                 final_outcome = ?4, version = version + 1, updated_at = ?5 \
                 WHERE session_id = ?6 AND version = ?7",
                params![
                    data,
                    session.lifecycle.as_str(),
                    verdict_column(session),
                    outcome_column(session),
                    now_rfc3339(),
                    session.session_id,
                    expected_version,
                ],
            )
            .map_err(storage)?;
        if rows == 0 {
            return Err(EngineError::Conflict);
        }

        for event in events {
            let event_data = serde_json::to_string(event).map_err(storage)?;
            tx.execute(
                "INSERT INTO integrity_events (event_id, session_id, kind, source, ts_ms, data, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.event_id,
                    event.session_id,
                    event.kind.as_str(),
                    event.source.as_str(),
                    event.ts_ms,
                    event_data,
                    now_rfc3339(),
                ],
            )
            .map_err(storage)?;
        }

        tx.commit().map_err(storage)?;
        Ok(())
    }

    /// Ledger entries for a session in insertion order.
    pub fn list_events(&self, session_id: &str) -> Result<Vec<IntegrityEvent>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT data FROM integrity_events WHERE session_id = ?1 ORDER BY rowid ASC",
            )
            .map_err(storage)?;
        let mut rows = stmt.query(params![session_id]).map_err(storage)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            let data: String = row.get(0).map_err(storage)?;
            events.push(serde_json::from_str(&data).map_err(storage)?);
        }
        Ok(events)
    }

    pub fn list_sessions_by_candidate(
        &self,
        candidate_id: &str,
    ) -> Result<Vec<ExamSession>, EngineError> {
        self.query_sessions(
            "SELECT data FROM sessions WHERE candidate_id = ?1 ORDER BY created_at ASC",
            params![candidate_id],
        )
    }

    /// Submitted sessions still waiting on a proctor verdict.
    pub fn list_sessions_for_review(&self) -> Result<Vec<ExamSession>, EngineError> {
        self.query_sessions(
            "SELECT data FROM sessions \
             WHERE lifecycle = 'SUBMITTED' AND verdict_status = 'UNDER_REVIEW' \
             ORDER BY updated_at ASC",
            params![],
        )
    }

    /// Closed-out attempts an admin can score.
    pub fn list_finished_sessions(&self) -> Result<Vec<ExamSession>, EngineError> {
        self.query_sessions(
            "SELECT data FROM sessions \
             WHERE lifecycle IN ('SUBMITTED', 'TERMINATED') \
             ORDER BY updated_at ASC",
            params![],
        )
    }

    fn query_sessions(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<ExamSession>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql).map_err(storage)?;
        let mut rows = stmt.query(args).map_err(storage)?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            let data: String = row.get(0).map_err(storage)?;
            sessions.push(serde_json::from_str(&data).map_err(storage)?);
        }
        Ok(sessions)
    }
}

fn verdict_column(session: &ExamSession) -> &'static str {
    match session.verdict.status {
        proctor_core::VerdictStatus::UnderReview => "UNDER_REVIEW",
        proctor_core::VerdictStatus::Cleared => "CLEARED",
        proctor_core::VerdictStatus::Invalidated => "INVALIDATED",
    }
}

fn outcome_column(session: &ExamSession) -> Option<&'static str> {
    session.final_outcome.map(|o| match o {
        proctor_core::FinalOutcome::Evaluated => "EVALUATED",
        proctor_core::FinalOutcome::Invalidated => "INVALIDATED",
    })
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn storage(e: impl std::fmt::Display) -> EngineError {
    EngineError::Storage(e.to_string())
}

//! Proctoring Engine Server
//!
//! HTTP service that owns the exam-session aggregate: lifecycle
//! transitions, the integrity event ledger, frame-signal ingestion, and
//! final-outcome reconciliation. Exposed as a library so integration
//! tests can drive the router and store in process.

pub mod api;
pub mod config;
pub mod db;
pub mod store;

pub use api::{build_router, AppState, SharedState};
pub use config::ServerConfig;
pub use db::{Database, VersionedSession};
pub use store::SessionStore;

use std::sync::Arc;
use std::time::Duration;

use proctor_signald::{InferenceClient, RuleEngine, SampleGate};

/// Wires an application state from a config and an open database.
pub fn build_state(config: &ServerConfig, db: Database) -> SharedState {
    let gate = SampleGate::new(config.rule.sample_interval_ms);
    let engine = RuleEngine::new(config.rule.clone());
    let inference = InferenceClient::with_timeout(
        &config.inference_url,
        Duration::from_millis(config.inference_timeout_ms),
    );
    Arc::new(AppState {
        store: SessionStore::new(db),
        engine,
        gate,
        inference,
    })
}

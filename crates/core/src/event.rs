use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Signal kinds the rule engine tracks per-session streaks for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    NoFace,
    MultipleFace,
    PoseUnavailable,
    LookingAway,
}

impl SignalKind {
    pub const ALL: [SignalKind; 4] = [
        SignalKind::NoFace,
        SignalKind::MultipleFace,
        SignalKind::PoseUnavailable,
        SignalKind::LookingAway,
    ];

    /// Kinds that count toward escalating a session to human review.
    /// Unreliable capture (pose unavailable) is not itself misconduct.
    pub fn counts_toward_escalation(self) -> bool {
        !matches!(self, SignalKind::PoseUnavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::NoFace => "NO_FACE",
            SignalKind::MultipleFace => "MULTIPLE_FACE",
            SignalKind::PoseUnavailable => "POSE_UNAVAILABLE",
            SignalKind::LookingAway => "LOOKING_AWAY",
        }
    }
}

/// Everything that can land in a session's integrity ledger: discrete
/// browser events reported by the client plus the rule engine's kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    TabSwitch,
    FocusLoss,
    NoFace,
    MultipleFace,
    LookingAway,
    PoseUnavailable,
}

impl From<SignalKind> for EventKind {
    fn from(kind: SignalKind) -> Self {
        match kind {
            SignalKind::NoFace => EventKind::NoFace,
            SignalKind::MultipleFace => EventKind::MultipleFace,
            SignalKind::PoseUnavailable => EventKind::PoseUnavailable,
            SignalKind::LookingAway => EventKind::LookingAway,
        }
    }
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TabSwitch => "TAB_SWITCH",
            EventKind::FocusLoss => "FOCUS_LOSS",
            EventKind::NoFace => "NO_FACE",
            EventKind::MultipleFace => "MULTIPLE_FACE",
            EventKind::LookingAway => "LOOKING_AWAY",
            EventKind::PoseUnavailable => "POSE_UNAVAILABLE",
        }
    }

    /// Kinds the candidate client may report directly.
    pub fn is_client_reportable(&self) -> bool {
        matches!(self, EventKind::TabSwitch | EventKind::FocusLoss)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    Client,
    Signal,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Client => "CLIENT",
            EventSource::Signal => "SIGNAL",
        }
    }
}

/// One entry in a session's append-only integrity ledger. Immutable once
/// created; insertion order is the display order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityEvent {
    pub event_id: String,
    pub session_id: String,
    pub kind: EventKind,
    pub source: EventSource,
    pub ts_ms: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_url: Option<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl IntegrityEvent {
    pub fn new(session_id: &str, kind: EventKind, source: EventSource, ts_ms: i64) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            kind,
            source,
            ts_ms,
            evidence_url: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_evidence_url(mut self, url: impl Into<String>) -> Self {
        self.evidence_url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

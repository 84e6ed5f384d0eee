//! Streak/cooldown rule engine over per-frame observations.
//!
//! Stateless transform: prior detector state plus one observation in,
//! next detector state plus zero-or-more triggered signals out. The
//! caller persists the state and appends the events.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use std::path::Path;

use proctor_core::{
    DetectorReviewStatus, EventKind, EventSource, FrameObservation, IntegrityEvent,
    SignalDetectorState, SignalKind,
};

fn default_sample_interval_ms() -> i64 {
    1_500
}
fn default_no_face_streak() -> u32 {
    3
}
fn default_multiple_face_streak() -> u32 {
    2
}
fn default_pose_unavailable_streak() -> u32 {
    4
}
fn default_looking_away_streak() -> u32 {
    3
}
fn default_yaw_threshold() -> f64 {
    25.0
}
fn default_pitch_threshold() -> f64 {
    20.0
}
fn default_cooldown_ms() -> i64 {
    10_000
}
fn default_escalation_threshold() -> u32 {
    3
}

/// Thresholds for the rule engine. Built once at startup and injected;
/// nothing reads the environment per call.
///
/// Defaults: 1500 ms sample interval; streaks of 3 (no face), 2
/// (multiple faces), 4 (pose unavailable), 3 (looking away); 25°/20°
/// yaw/pitch; 10 s cooldown; escalation after 3 cumulative triggers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConfig {
    /// Minimum spacing between accepted frame samples.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: i64,

    #[serde(default = "default_no_face_streak")]
    pub no_face_streak_frames: u32,
    #[serde(default = "default_multiple_face_streak")]
    pub multiple_face_streak_frames: u32,
    #[serde(default = "default_pose_unavailable_streak")]
    pub pose_unavailable_streak_frames: u32,
    #[serde(default = "default_looking_away_streak")]
    pub looking_away_streak_frames: u32,

    /// Absolute head-pose angles, in degrees, that count as looking away.
    #[serde(default = "default_yaw_threshold")]
    pub yaw_abs_threshold_deg: f64,
    #[serde(default = "default_pitch_threshold")]
    pub pitch_abs_threshold_deg: f64,

    /// Minimum spacing between two emissions of the same kind.
    #[serde(default = "default_cooldown_ms")]
    pub event_cooldown_ms: i64,

    /// Cumulative trigger count at which a session escalates to human
    /// review.
    #[serde(default = "default_escalation_threshold")]
    pub under_review_trigger_threshold: u32,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            no_face_streak_frames: default_no_face_streak(),
            multiple_face_streak_frames: default_multiple_face_streak(),
            pose_unavailable_streak_frames: default_pose_unavailable_streak(),
            looking_away_streak_frames: default_looking_away_streak(),
            yaw_abs_threshold_deg: default_yaw_threshold(),
            pitch_abs_threshold_deg: default_pitch_threshold(),
            event_cooldown_ms: default_cooldown_ms(),
            under_review_trigger_threshold: default_escalation_threshold(),
        }
    }
}

impl RuleConfig {
    /// Reads `PROCTOR_*` overrides, falling back to defaults for unset or
    /// unparsable values.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str, fallback: T) -> T {
            env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback)
        }

        let defaults = Self::default();
        Self {
            sample_interval_ms: var("PROCTOR_SAMPLE_INTERVAL_MS", defaults.sample_interval_ms),
            no_face_streak_frames: var(
                "PROCTOR_NO_FACE_STREAK_FRAMES",
                defaults.no_face_streak_frames,
            ),
            multiple_face_streak_frames: var(
                "PROCTOR_MULTIPLE_FACE_STREAK_FRAMES",
                defaults.multiple_face_streak_frames,
            ),
            pose_unavailable_streak_frames: var(
                "PROCTOR_POSE_UNAVAILABLE_STREAK_FRAMES",
                defaults.pose_unavailable_streak_frames,
            ),
            looking_away_streak_frames: var(
                "PROCTOR_LOOKING_AWAY_STREAK_FRAMES",
                defaults.looking_away_streak_frames,
            ),
            yaw_abs_threshold_deg: var(
                "PROCTOR_YAW_ABS_THRESHOLD_DEG",
                defaults.yaw_abs_threshold_deg,
            ),
            pitch_abs_threshold_deg: var(
                "PROCTOR_PITCH_ABS_THRESHOLD_DEG",
                defaults.pitch_abs_threshold_deg,
            ),
            event_cooldown_ms: var("PROCTOR_EVENT_COOLDOWN_MS", defaults.event_cooldown_ms),
            under_review_trigger_threshold: var(
                "PROCTOR_UNDER_REVIEW_TRIGGER_THRESHOLD",
                defaults.under_review_trigger_threshold,
            ),
        }
    }

    /// Loads overrides from a YAML or JSON file; missing fields keep
    /// their defaults.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read rule config: {e}"))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| format!("failed to parse rule config: {e}"))
        } else {
            serde_yaml::from_str(&content).map_err(|e| format!("failed to parse rule config: {e}"))
        }
    }

    pub fn streak_frames(&self, kind: SignalKind) -> u32 {
        match kind {
            SignalKind::NoFace => self.no_face_streak_frames,
            SignalKind::MultipleFace => self.multiple_face_streak_frames,
            SignalKind::PoseUnavailable => self.pose_unavailable_streak_frames,
            SignalKind::LookingAway => self.looking_away_streak_frames,
        }
    }
}

/// One signal the engine fired for this observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggeredSignal {
    pub kind: SignalKind,
    /// Streak length at the moment of firing.
    pub streak_frames: u32,
}

impl TriggeredSignal {
    /// Materializes the ledger entry for this trigger.
    pub fn into_event(self, session_id: &str, ts_ms: i64) -> IntegrityEvent {
        IntegrityEvent::new(
            session_id,
            EventKind::from(self.kind),
            EventSource::Signal,
            ts_ms,
        )
        .with_metadata("streak_frames", serde_json::json!(self.streak_frames))
    }
}

/// Result of evaluating one observation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub state: SignalDetectorState,
    pub triggered: Vec<TriggeredSignal>,
    /// True when this observation flipped the session to under-review.
    pub escalated: bool,
}

pub struct RuleEngine {
    config: RuleConfig,
}

impl RuleEngine {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Folds one accepted observation into the detector state.
    /// Deterministic: the clock is an argument, not an ambient read.
    pub fn evaluate(
        &self,
        prior: &SignalDetectorState,
        observation: &FrameObservation,
        now_ms: i64,
    ) -> Evaluation {
        let cfg = &self.config;
        let mut state = prior.clone();
        state.last_sample_ms = Some(now_ms);
        state.updated_ms = Some(now_ms);

        state.no_face.observe(observation.faces_detected == 0);
        // Exactly two faces; three or more does not grow this streak.
        state
            .multiple_face
            .observe(observation.faces_detected == 2);

        match observation.pose {
            None => {
                // Pose-unavailable and looking-away are mutually
                // exclusive per sample.
                state.pose_unavailable.observe(true);
                state.looking_away.streak = 0;
            }
            Some(pose) => {
                state.pose_unavailable.observe(false);
                let looking_away = pose.yaw.abs() >= cfg.yaw_abs_threshold_deg
                    || pose.pitch.abs() >= cfg.pitch_abs_threshold_deg;
                state.looking_away.observe(looking_away);
            }
        }

        let mut triggered = Vec::new();
        for kind in SignalKind::ALL {
            let track = state.track(kind);
            if track.streak >= cfg.streak_frames(kind)
                && !track.in_cooldown(now_ms, cfg.event_cooldown_ms)
            {
                triggered.push(TriggeredSignal {
                    kind,
                    streak_frames: track.streak,
                });
            }
        }

        for signal in &triggered {
            state.track_mut(signal.kind).record_trigger(now_ms);
            state.total_triggers += 1;
        }

        let mut escalated = false;
        if state.review_status == DetectorReviewStatus::AutoCleared
            && state.escalation_trigger_count() >= cfg.under_review_trigger_threshold
        {
            escalated = state.escalate();
        }

        Evaluation {
            state,
            triggered,
            escalated,
        }
    }
}

/// Deterministic digest of a frame payload, recorded in signal-event
/// metadata so duplicate uploads are traceable.
pub fn frame_digest(image_base64: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_base64.as_bytes());
    format!("frm_{}", hex::encode(&hasher.finalize()[..16]))
}

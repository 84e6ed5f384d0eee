//! Per-session working state for the signal rule engine.
//!
//! The shape is load-bearing: escalation counts and cooldown timestamps
//! live here, so this is a first-class schema rather than a loose bag of
//! values. The engine owns all mutation; everything else only reads it.

use serde::{Deserialize, Serialize};

use crate::event::SignalKind;

/// Automated review status for a session. Monotonic: once a session is
/// under review it never reverts to auto-cleared.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectorReviewStatus {
    AutoCleared,
    UnderReview,
}

/// Streak bookkeeping for one signal kind.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KindTrack {
    /// Consecutive qualifying observations. Resets to 0 on any
    /// non-qualifying sample.
    pub streak: u32,
    /// When this kind last fired, for cooldown suppression.
    pub last_triggered_ms: Option<i64>,
    /// Lifetime trigger count for the session.
    pub trigger_count: u32,
}

impl KindTrack {
    pub fn observe(&mut self, qualifying: bool) {
        if qualifying {
            self.streak += 1;
        } else {
            self.streak = 0;
        }
    }

    pub fn in_cooldown(&self, now_ms: i64, cooldown_ms: i64) -> bool {
        match self.last_triggered_ms {
            Some(last) => now_ms - last < cooldown_ms,
            None => false,
        }
    }

    pub fn record_trigger(&mut self, now_ms: i64) {
        self.last_triggered_ms = Some(now_ms);
        self.trigger_count += 1;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalDetectorState {
    pub review_status: DetectorReviewStatus,
    pub no_face: KindTrack,
    pub multiple_face: KindTrack,
    pub pose_unavailable: KindTrack,
    pub looking_away: KindTrack,
    /// Lifetime count across all kinds.
    pub total_triggers: u32,
    /// Most recently accepted observation, used by the sample gate.
    pub last_sample_ms: Option<i64>,
    pub updated_ms: Option<i64>,
}

impl Default for SignalDetectorState {
    fn default() -> Self {
        Self {
            review_status: DetectorReviewStatus::AutoCleared,
            no_face: KindTrack::default(),
            multiple_face: KindTrack::default(),
            pose_unavailable: KindTrack::default(),
            looking_away: KindTrack::default(),
            total_triggers: 0,
            last_sample_ms: None,
            updated_ms: None,
        }
    }
}

impl SignalDetectorState {
    pub fn track(&self, kind: SignalKind) -> &KindTrack {
        match kind {
            SignalKind::NoFace => &self.no_face,
            SignalKind::MultipleFace => &self.multiple_face,
            SignalKind::PoseUnavailable => &self.pose_unavailable,
            SignalKind::LookingAway => &self.looking_away,
        }
    }

    pub fn track_mut(&mut self, kind: SignalKind) -> &mut KindTrack {
        match kind {
            SignalKind::NoFace => &mut self.no_face,
            SignalKind::MultipleFace => &mut self.multiple_face,
            SignalKind::PoseUnavailable => &mut self.pose_unavailable,
            SignalKind::LookingAway => &mut self.looking_away,
        }
    }

    /// Sum of lifetime triggers over the kinds that indicate misconduct.
    pub fn escalation_trigger_count(&self) -> u32 {
        SignalKind::ALL
            .iter()
            .filter(|k| k.counts_toward_escalation())
            .map(|k| self.track(*k).trigger_count)
            .sum()
    }

    /// One-way flip to under-review. Returns true if this call flipped it.
    pub fn escalate(&mut self) -> bool {
        if self.review_status == DetectorReviewStatus::UnderReview {
            return false;
        }
        self.review_status = DetectorReviewStatus::UnderReview;
        true
    }

    pub fn is_under_review(&self) -> bool {
        self.review_status == DetectorReviewStatus::UnderReview
    }
}

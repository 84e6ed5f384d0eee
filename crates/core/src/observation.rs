use serde::{Deserialize, Serialize};

/// Head pose angles in degrees, as reported by the inference service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HeadPose {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl HeadPose {
    /// Builds a pose only when every axis is present. Evaluating on
    /// incomplete axes risks false negatives, so a partial pose is
    /// treated as no pose at all.
    pub fn from_axes(yaw: Option<f64>, pitch: Option<f64>, roll: Option<f64>) -> Option<Self> {
        match (yaw, pitch, roll) {
            (Some(yaw), Some(pitch), Some(roll)) => Some(Self { yaw, pitch, roll }),
            _ => None,
        }
    }
}

/// A single per-frame observation handed to the rule engine: the face
/// count plus the head pose when the estimator produced one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FrameObservation {
    pub faces_detected: u32,
    pub pose: Option<HeadPose>,
}

impl FrameObservation {
    pub fn new(faces_detected: u32, pose: Option<HeadPose>) -> Self {
        Self {
            faces_detected,
            pose,
        }
    }

    pub fn pose_available(&self) -> bool {
        self.pose.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_pose_collapses_to_unavailable() {
        assert!(HeadPose::from_axes(Some(10.0), None, Some(0.0)).is_none());
        assert!(HeadPose::from_axes(None, Some(5.0), Some(0.0)).is_none());
        assert!(HeadPose::from_axes(Some(10.0), Some(5.0), None).is_none());
    }

    #[test]
    fn complete_pose_is_kept() {
        let pose = HeadPose::from_axes(Some(10.0), Some(5.0), Some(-2.0)).unwrap();
        assert_eq!(pose.yaw, 10.0);
        assert_eq!(pose.pitch, 5.0);
        assert_eq!(pose.roll, -2.0);
    }
}

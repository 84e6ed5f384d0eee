//! Client for the external face-presence / head-pose inference service.
//!
//! One frame observation needs both sub-calls; they are issued
//! concurrently and either failing fails the whole observation. The
//! ingestion request surfaces that as a transient error with zero
//! detector-state mutation, safe to retry on the next sampled frame.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use proctor_core::{EngineError, FrameObservation, HeadPose};

const DEFAULT_TIMEOUT_MS: u64 = 2_500;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference service timeout")]
    Timeout,

    #[error("inference service unreachable: {0}")]
    Transport(String),

    #[error("inference service returned status {0}")]
    Status(u16),

    #[error("inference service returned an unreadable body: {0}")]
    Decode(String),
}

impl From<InferenceError> for EngineError {
    fn from(err: InferenceError) -> Self {
        EngineError::Collaborator(err.to_string())
    }
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    image_base64: &'a str,
}

#[derive(Deserialize)]
struct FacePresenceResponse {
    faces_detected: u32,
}

/// Axes are individually optional on the wire; any missing axis makes
/// the whole pose unavailable.
#[derive(Deserialize)]
struct HeadPoseResponse {
    #[serde(default)]
    yaw: Option<f64>,
    #[serde(default)]
    pitch: Option<f64>,
    #[serde(default)]
    roll: Option<f64>,
}

pub struct InferenceClient {
    base_url: String,
    client: reqwest::Client,
}

impl InferenceClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        image_base64: &str,
    ) -> Result<T, InferenceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&ImageRequest { image_base64 })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout
                } else {
                    InferenceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Status(status.as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))
    }

    /// Runs both inference sub-calls concurrently and combines them into
    /// one observation. Either failing fails the frame.
    pub async fn observe_frame(&self, image_base64: &str) -> Result<FrameObservation, InferenceError> {
        let (faces, pose) = tokio::join!(
            self.post_json::<FacePresenceResponse>("/infer/face-presence", image_base64),
            self.post_json::<HeadPoseResponse>("/infer/head-pose", image_base64),
        );
        let faces = faces?;
        let pose = pose?;

        Ok(FrameObservation::new(
            faces.faces_detected,
            HeadPose::from_axes(pose.yaw, pose.pitch, pose.roll),
        ))
    }
}

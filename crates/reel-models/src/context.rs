//! Render context fetched from the origin API for each job.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::composition::CompositionSpec;
use crate::error::ModelError;

/// Everything needed to render one reel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderContext {
    pub spec: CompositionSpec,
    pub clips: Vec<ClipRef>,
    pub track: AudioRef,
    /// Values for `{{key}}` placeholders in text overlays
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Target reel duration in milliseconds
    pub duration_ms: u64,
}

impl RenderContext {
    /// Validate fields serde cannot check on its own.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.duration_ms == 0 {
            return Err(ModelError::InvalidContext(
                "durationMs must be positive".to_string(),
            ));
        }

        if self.track.url.trim().is_empty() {
            return Err(ModelError::InvalidContext("track url is empty".to_string()));
        }

        for (i, clip) in self.clips.iter().enumerate() {
            if clip.url.trim().is_empty() {
                return Err(ModelError::InvalidContext(format!("clip {} url is empty", i)));
            }
            if let (Some(start), Some(end)) = (clip.start_ms, clip.end_ms) {
                if end <= start {
                    return Err(ModelError::InvalidContext(format!(
                        "clip {} trim end {}ms is not after start {}ms",
                        i, end, start
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Reference to a video clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClipRef {
    /// Object-storage URI (`s3://bucket/key`) or HTTP(S) URL
    pub url: String,
    /// Source in-point (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    /// Source out-point (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
}

impl ClipRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            start_ms: None,
            end_ms: None,
        }
    }

    /// Set the source in/out points.
    pub fn with_trim(mut self, start_ms: u64, end_ms: u64) -> Self {
        self.start_ms = Some(start_ms);
        self.end_ms = Some(end_ms);
        self
    }
}

/// Reference to the reel's audio track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AudioRef {
    pub url: String,
}

impl AudioRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

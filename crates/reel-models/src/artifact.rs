//! Published artifact and completion callback payload.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Result of a successful render, handed to the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    /// Object key of the rendered video (`reels/<reelId>/out.mp4`)
    pub object_key: String,
    /// Public URL of the rendered video
    pub mp4_url: String,
    /// Public URL of the poster frame, if one was produced
    pub poster_url: Option<String>,
    pub duration_ms: u64,
}

/// Body of `POST render-callback/{reelId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub mp4_url: String,
    pub poster_url: Option<String>,
    pub duration_ms: u64,
}

impl From<&ArtifactRecord> for CallbackPayload {
    fn from(record: &ArtifactRecord) -> Self {
        Self {
            mp4_url: record.mp4_url.clone(),
            poster_url: record.poster_url.clone(),
            duration_ms: record.duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_payload_shape() {
        let record = ArtifactRecord {
            object_key: "reels/r1/out.mp4".to_string(),
            mp4_url: "https://cdn.example.com/reels/r1/out.mp4".to_string(),
            poster_url: None,
            duration_ms: 8000,
        };

        let json = serde_json::to_value(CallbackPayload::from(&record)).unwrap();
        assert_eq!(json["mp4Url"], "https://cdn.example.com/reels/r1/out.mp4");
        assert!(json["posterUrl"].is_null());
        assert_eq!(json["durationMs"], 8000);
    }
}

//! Job definitions for queue processing.

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ModelError;

/// Maximum length of a reel identifier.
pub const MAX_REEL_ID_LEN: usize = 128;

/// Identifier of a reel.
///
/// Reel ids end up inside object keys and URL paths, so they are restricted
/// to ASCII alphanumerics, `-` and `_`. Validation runs on deserialization,
/// which means a malformed queue payload is rejected before any stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReelId(String);

impl ReelId {
    /// Create a validated reel id.
    pub fn parse(s: impl Into<String>) -> Result<Self, ModelError> {
        let s = s.into();
        if s.is_empty() {
            return Err(ModelError::InvalidReelId("empty".to_string()));
        }
        if s.len() > MAX_REEL_ID_LEN {
            return Err(ModelError::InvalidReelId(format!(
                "longer than {} characters",
                MAX_REEL_ID_LEN
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ModelError::InvalidReelId(s));
        }
        Ok(Self(s))
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ReelId {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<ReelId> for String {
    fn from(id: ReelId) -> Self {
        id.0
    }
}

impl JsonSchema for ReelId {
    fn schema_name() -> String {
        "ReelId".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

impl fmt::Display for ReelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue payload asking for a reel to be rendered.
///
/// Deliberately minimal: everything else is fetched fresh from the origin
/// API when the job runs, so edits made after enqueue are picked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub reel_id: ReelId,
}

impl RenderJob {
    pub fn new(reel_id: ReelId) -> Self {
        Self { reel_id }
    }

    /// Parse a queue payload.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Serialize to the queue payload format.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Operation the pipeline was executing.
///
/// Used to label failures so operators can see where a job died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Job read from the queue (payload decoding).
    Queued,
    /// Fetching the render context.
    FetchContext,
    /// Downloading assets into the scratch workspace.
    StageAssets,
    /// Building the filter graph.
    BuildGraph,
    /// Running the transcoder.
    Transcode,
    /// Uploading the artifact and calling back.
    Publish,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Queued => "queued",
            PipelineStage::FetchContext => "fetch_context",
            PipelineStage::StageAssets => "stage_assets",
            PipelineStage::BuildGraph => "build_graph",
            PipelineStage::Transcode => "transcode",
            PipelineStage::Publish => "publish",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobState {
    Queued,
    ContextFetched,
    Staged,
    GraphBuilt,
    Transcoded,
    Published,
    Done,
    /// Failed while executing `stage`; `retriable` tells the worker whether
    /// another attempt could succeed.
    Failed {
        stage: PipelineStage,
        kind: String,
        retriable: bool,
    },
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::ContextFetched => "context_fetched",
            JobState::Staged => "staged",
            JobState::GraphBuilt => "graph_built",
            JobState::Transcoded => "transcoded",
            JobState::Published => "published",
            JobState::Done => "done",
            JobState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed { .. })
    }

    /// Stage executed to leave this state, if any.
    pub fn next_stage(&self) -> Option<PipelineStage> {
        match self {
            JobState::Queued => Some(PipelineStage::FetchContext),
            JobState::ContextFetched => Some(PipelineStage::StageAssets),
            JobState::Staged => Some(PipelineStage::BuildGraph),
            JobState::GraphBuilt => Some(PipelineStage::Transcode),
            JobState::Transcoded => Some(PipelineStage::Publish),
            JobState::Published | JobState::Done | JobState::Failed { .. } => None,
        }
    }
}

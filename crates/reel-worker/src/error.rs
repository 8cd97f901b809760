//! Worker error types.

use thiserror::Error;

use reel_media::MediaError;
use reel_models::{JobState, PipelineStage};
use reel_origin::OriginError;
use reel_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that stop the worker itself, as opposed to a single job.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue operation failed: {0}")]
    QueueFailed(String),

    #[error("Queue error: {0}")]
    Queue(#[from] reel_queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Origin API error: {0}")]
    Origin(#[from] OriginError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn queue_failed(msg: impl Into<String>) -> Self {
        Self::QueueFailed(msg.into())
    }
}

/// Why a render job failed.
///
/// Stages report one of these; the executor alone turns it into an ack,
/// a delayed retry or a dead letter.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Render context fetch failed: {0}")]
    ContextFetch(String),

    #[error("Render context rejected: {0}")]
    ContextInvalid(String),

    #[error("Asset {asset} unavailable: {message}")]
    AssetUnavailable { asset: String, message: String },

    #[error("Asset {asset} failed after {attempts} attempts: {message}")]
    AssetTransient {
        asset: String,
        attempts: u32,
        message: String,
    },

    #[error("Composition expects {expected} clips but {actual} were supplied")]
    SpecMismatch { expected: usize, actual: usize },

    #[error("Invalid composition: {0}")]
    SpecInvalid(String),

    #[error("Transcoder timed out after {0} seconds")]
    TranscodeTimeout(u64),

    #[error("Transcoder ran out of resources: {0}")]
    TranscodeResource(String),

    #[error("Transcode failed: {0}")]
    Transcode(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Callback failed: {0}")]
    Callback(String),

    #[error("Scratch workspace error: {0}")]
    Workspace(String),
}

impl StageError {
    /// Classify an error from `GET render-context`.
    pub fn from_context_error(err: OriginError) -> Self {
        if err.is_retryable() {
            Self::ContextFetch(err.to_string())
        } else {
            Self::ContextInvalid(err.to_string())
        }
    }

    pub fn upload(err: StorageError) -> Self {
        Self::Upload(err.to_string())
    }

    pub fn callback(err: OriginError) -> Self {
        Self::Callback(err.to_string())
    }

    pub fn workspace(msg: impl Into<String>) -> Self {
        Self::Workspace(msg.into())
    }

    /// Stable label used in logs, metrics and dead letters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContextFetch(_) => "context_fetch",
            Self::ContextInvalid(_) => "context_invalid",
            Self::AssetUnavailable { .. } => "asset_unavailable",
            Self::AssetTransient { .. } => "asset_transient",
            Self::SpecMismatch { .. } => "spec_mismatch",
            Self::SpecInvalid(_) => "spec_invalid",
            Self::TranscodeTimeout(_) => "transcode_timeout",
            Self::TranscodeResource(_) => "transcode_resource",
            Self::Transcode(_) => "transcode",
            Self::Upload(_) => "upload",
            Self::Callback(_) => "callback",
            Self::Workspace(_) => "workspace",
        }
    }

    /// Whether another attempt of the whole job could succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ContextFetch(_)
                | Self::AssetTransient { .. }
                | Self::TranscodeTimeout(_)
                | Self::TranscodeResource(_)
                | Self::Upload(_)
                | Self::Callback(_)
                | Self::Workspace(_)
        )
    }

    /// Stage the error is attributed to.
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::ContextFetch(_) | Self::ContextInvalid(_) => PipelineStage::FetchContext,
            Self::AssetUnavailable { .. } | Self::AssetTransient { .. } | Self::Workspace(_) => {
                PipelineStage::StageAssets
            }
            Self::SpecMismatch { .. } | Self::SpecInvalid(_) => PipelineStage::BuildGraph,
            Self::TranscodeTimeout(_) | Self::TranscodeResource(_) | Self::Transcode(_) => {
                PipelineStage::Transcode
            }
            Self::Upload(_) | Self::Callback(_) => PipelineStage::Publish,
        }
    }

    /// The `Failed` job state this error leads to.
    pub fn to_state(&self) -> JobState {
        JobState::Failed {
            stage: self.stage(),
            kind: self.kind().to_string(),
            retriable: self.is_retriable(),
        }
    }
}

impl From<MediaError> for StageError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Timeout(secs) => Self::TranscodeTimeout(secs),
            ref e if e.is_resource_exhaustion() => Self::TranscodeResource(e.to_string()),
            MediaError::SpecMismatch { expected, actual } => Self::SpecMismatch { expected, actual },
            MediaError::InvalidSpec(msg) | MediaError::InvalidGraph(msg) => Self::SpecInvalid(msg),
            MediaError::Io(e) => Self::Workspace(e.to_string()),
            other => Self::Transcode(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::Workspace(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_retriability() {
        let cases: Vec<(StageError, &str, bool)> = vec![
            (StageError::ContextFetch("503".into()), "context_fetch", true),
            (StageError::ContextInvalid("400".into()), "context_invalid", false),
            (
                StageError::AssetUnavailable {
                    asset: "clip0".into(),
                    message: "404".into(),
                },
                "asset_unavailable",
                false,
            ),
            (
                StageError::AssetTransient {
                    asset: "track".into(),
                    attempts: 3,
                    message: "reset".into(),
                },
                "asset_transient",
                true,
            ),
            (StageError::SpecMismatch { expected: 2, actual: 1 }, "spec_mismatch", false),
            (StageError::SpecInvalid("w=0".into()), "spec_invalid", false),
            (StageError::TranscodeTimeout(60), "transcode_timeout", true),
            (StageError::TranscodeResource("oom".into()), "transcode_resource", true),
            (StageError::Transcode("bad codec".into()), "transcode", false),
            (StageError::Upload("503".into()), "upload", true),
            (StageError::Callback("502".into()), "callback", true),
            (StageError::Workspace("disk".into()), "workspace", true),
        ];

        for (err, kind, retriable) in cases {
            assert_eq!(err.kind(), kind);
            assert_eq!(err.is_retriable(), retriable, "{}", kind);
        }
    }

    #[test]
    fn test_context_error_classification() {
        let err = StageError::from_context_error(OriginError::from_http_status(503, "down"));
        assert_eq!(err.kind(), "context_fetch");
        assert_eq!(err.stage(), PipelineStage::FetchContext);

        let err = StageError::from_context_error(OriginError::from_http_status(404, "gone"));
        assert_eq!(err.kind(), "context_invalid");

        let err = StageError::from_context_error(OriginError::invalid_response("bad json"));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_media_error_mapping() {
        assert_eq!(StageError::from(MediaError::Timeout(90)).kind(), "transcode_timeout");
        assert_eq!(
            StageError::from(MediaError::ffmpeg_failed(
                "exit",
                Some("Cannot allocate memory".to_string()),
                Some(1)
            ))
            .kind(),
            "transcode_resource"
        );
        assert_eq!(
            StageError::from(MediaError::ffmpeg_failed("exit", None, None)).kind(),
            "transcode_resource"
        );
        assert_eq!(
            StageError::from(MediaError::ffmpeg_failed(
                "exit",
                Some("Unknown encoder".to_string()),
                Some(1)
            ))
            .kind(),
            "transcode"
        );
        assert_eq!(StageError::from(MediaError::FfmpegNotFound).kind(), "transcode");
        assert_eq!(
            StageError::from(MediaError::SpecMismatch { expected: 2, actual: 3 }).kind(),
            "spec_mismatch"
        );
        assert_eq!(StageError::from(MediaError::invalid_spec("odd width")).kind(), "spec_invalid");
    }

    #[test]
    fn test_failed_state() {
        let state = StageError::Upload("503".into()).to_state();
        assert_eq!(
            state,
            JobState::Failed {
                stage: PipelineStage::Publish,
                kind: "upload".to_string(),
                retriable: true,
            }
        );
    }
}

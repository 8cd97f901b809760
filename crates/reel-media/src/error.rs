//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Diagnostic fragments that mark an FFmpeg failure as resource exhaustion
/// rather than a problem with the inputs. Matched case-insensitively.
const TRANSIENT_STDERR_PATTERNS: &[&str] = &[
    "cannot allocate memory",
    "out of memory",
    "resource temporarily unavailable",
    "no space left on device",
];

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        /// `None` when the process was terminated by a signal
        exit_code: Option<i32>,
    },

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Composition expects {expected} clips but {actual} were supplied")]
    SpecMismatch { expected: usize, actual: usize },

    #[error("Invalid composition spec: {0}")]
    InvalidSpec(String),

    #[error("Invalid filter graph: {0}")]
    InvalidGraph(String),

    #[error("Transcoder produced no output at {0}")]
    EmptyOutput(PathBuf),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an invalid spec error.
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec(message.into())
    }

    /// Create an invalid graph error.
    pub fn invalid_graph(message: impl Into<String>) -> Self {
        Self::InvalidGraph(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True if the process was killed for exceeding its wall-clock budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::Timeout(_))
    }

    /// True if a failed FFmpeg run looks like resource exhaustion
    /// (signal kill, OOM, EAGAIN) and may succeed on another attempt.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            MediaError::FfmpegFailed {
                stderr, exit_code, ..
            } => {
                if exit_code.is_none() {
                    return true;
                }
                let stderr = stderr.as_deref().unwrap_or_default().to_lowercase();
                TRANSIENT_STDERR_PATTERNS
                    .iter()
                    .any(|pattern| stderr.contains(pattern))
            }
            _ => false,
        }
    }

    /// True for errors raised by the filter graph builder.
    pub fn is_spec_error(&self) -> bool {
        matches!(
            self,
            MediaError::SpecMismatch { .. } | MediaError::InvalidSpec(_) | MediaError::InvalidGraph(_)
        )
    }
}

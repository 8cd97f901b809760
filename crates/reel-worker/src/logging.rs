//! Structured job logging utilities.
//!
//! Every line a job emits carries its reel id and attempt so a single
//! render can be followed through the log.

use reel_models::{JobState, PipelineStage, ReelId};
use tracing::{debug, error, info, warn, Span};

use crate::error::StageError;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    reel_id: String,
    attempt: u32,
}

impl JobLogger {
    pub fn new(reel_id: &ReelId, attempt: u32) -> Self {
        Self {
            reel_id: reel_id.to_string(),
            attempt,
        }
    }

    /// Log the start of a job attempt.
    pub fn log_start(&self) {
        info!(
            reel_id = %self.reel_id,
            attempt = self.attempt,
            "Render started"
        );
    }

    /// Log a state transition.
    pub fn log_state(&self, state: &JobState) {
        debug!(
            reel_id = %self.reel_id,
            attempt = self.attempt,
            state = state.as_str(),
            "Job state changed"
        );
    }

    /// Log the end of a stage.
    pub fn log_stage(&self, stage: PipelineStage, elapsed_ms: u128) {
        info!(
            reel_id = %self.reel_id,
            attempt = self.attempt,
            stage = stage.as_str(),
            elapsed_ms = elapsed_ms as u64,
            "Stage finished"
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            reel_id = %self.reel_id,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    /// Log a failed attempt.
    pub fn log_failure(&self, err: &StageError) {
        error!(
            reel_id = %self.reel_id,
            attempt = self.attempt,
            stage = err.stage().as_str(),
            kind = err.kind(),
            retriable = err.is_retriable(),
            "Render failed: {}", err
        );
    }

    /// Log the completion of a job attempt.
    pub fn log_completion(&self, mp4_url: &str) {
        info!(
            reel_id = %self.reel_id,
            attempt = self.attempt,
            mp4_url = %mp4_url,
            "Render completed"
        );
    }

    pub fn reel_id(&self) -> &str {
        &self.reel_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Span entered for the whole job attempt.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            reel_id = %self.reel_id,
            attempt = self.attempt
        )
    }
}

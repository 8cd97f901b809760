//! Reel render worker.
//!
//! This crate provides:
//! - The job executor (worker slots, delayed retries, crash recovery)
//! - The per-job render pipeline and its stages
//! - Asset staging into per-job scratch workspaces
//! - Artifact publishing and the completion callback
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod publisher;
pub mod retry;
pub mod stager;
pub mod workspace;

pub use config::WorkerConfig;
pub use error::{StageError, WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use pipeline::{PipelineServices, RenderPipeline};
pub use publisher::ArtifactPublisher;
pub use retry::{Disposition, RetryConfig, RetryPolicy};
pub use stager::{AssetStager, StagedAssets};
pub use workspace::{sweep_stale, ScratchWorkspace};

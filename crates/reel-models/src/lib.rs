//! Shared data models for the reel render pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Queue payloads (`RenderJob`) and reel identifiers
//! - Render context fetched from the origin API
//! - Composition specs (clip slots and text overlays)
//! - Encoding configuration
//! - Published artifacts and the completion callback body

pub mod artifact;
pub mod composition;
pub mod context;
pub mod encoding;
pub mod error;
pub mod job;

// Re-export common types
pub use artifact::{ArtifactRecord, CallbackPayload};
pub use composition::{ClipSlot, CompositionSpec, TextOverlay};
pub use context::{AudioRef, ClipRef, RenderContext};
pub use encoding::EncodingConfig;
pub use error::ModelError;
pub use job::{JobState, PipelineStage, ReelId, RenderJob};

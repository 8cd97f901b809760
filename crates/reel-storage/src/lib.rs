//! Object storage for the reel render pipeline.
//!
//! This crate provides:
//! - The `ObjectStore` seam (get/put by bucket and key)
//! - An S3-compatible implementation on the AWS SDK
//! - Asset URI parsing (`s3://`, `r2://`, `gs://`, `http(s)://`)
//! - The deterministic artifact key scheme

pub mod client;
pub mod error;
pub mod keys;
pub mod store;
pub mod uri;

pub use client::{S3Store, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use keys::{output_key, poster_key, public_url, MP4_CONTENT_TYPE, POSTER_CONTENT_TYPE};
pub use store::ObjectStore;
pub use uri::{AssetLocation, ObjectUri};

//! Origin API client.
//!
//! The origin API owns reels. The worker reads a render context from it
//! before a job and reports the published artifact back to it afterwards.

pub mod api;
pub mod client;
pub mod error;


pub use api::OriginApi;
pub use client::{OriginClient, OriginConfig};
pub use error::{OriginError, OriginResult};

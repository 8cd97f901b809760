//! Render job queue.
//!
//! This crate provides:
//! - The `RenderQueue` seam used by the worker
//! - A Redis Streams implementation with a delayed-retry sorted set and a
//!   dead-letter stream
//! - An in-memory implementation for tests and local runs

pub mod delivery;
pub mod error;
pub mod memory;
pub mod queue;

pub use delivery::{parse_entry, DeadLetter, DeadLetterRecord, Delivery, MalformedEntry, RenderQueue};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use queue::{QueueConfig, RedisRenderQueue};

//! Queue seam: deliveries, dead letters and the `RenderQueue` trait.

use std::time::Duration;

use async_trait::async_trait;
use reel_models::{PipelineStage, RenderJob};

use crate::error::QueueResult;

/// Dead-letter kind for payloads that could not be decoded.
pub const MALFORMED_PAYLOAD_KIND: &str = "malformed_payload";

/// A job handed to one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker message id, used to ack
    pub message_id: String,
    pub job: RenderJob,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Why a delivery is being dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub stage: PipelineStage,
    /// Stable error kind (`transcode_timeout`, `asset_unavailable`, ...)
    pub kind: String,
    pub error: String,
}

/// One entry of the dead-letter stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    /// Raw job payload
    pub job: String,
    /// Empty when the payload could not be decoded
    pub reel_id: String,
    pub stage: String,
    pub kind: String,
    pub error: String,
    pub attempt: u32,
    pub original_id: String,
}

impl DeadLetterRecord {
    pub fn from_delivery(delivery: &Delivery, letter: &DeadLetter) -> Self {
        Self {
            job: delivery
                .job
                .to_json()
                .unwrap_or_else(|_| format!("{{\"reelId\":\"{}\"}}", delivery.job.reel_id)),
            reel_id: delivery.job.reel_id.to_string(),
            stage: letter.stage.as_str().to_string(),
            kind: letter.kind.clone(),
            error: letter.error.clone(),
            attempt: delivery.attempt,
            original_id: delivery.message_id.clone(),
        }
    }

    pub fn from_malformed(entry: &MalformedEntry) -> Self {
        Self {
            job: entry.payload.clone().unwrap_or_default(),
            reel_id: String::new(),
            stage: PipelineStage::Queued.as_str().to_string(),
            kind: MALFORMED_PAYLOAD_KIND.to_string(),
            error: entry.error.clone(),
            attempt: entry.attempt,
            original_id: entry.message_id.clone(),
        }
    }

    /// Stream fields in write order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("job", self.job.clone()),
            ("reel_id", self.reel_id.clone()),
            ("stage", self.stage.clone()),
            ("kind", self.kind.clone()),
            ("error", self.error.clone()),
            ("attempt", self.attempt.to_string()),
            ("original_id", self.original_id.clone()),
        ]
    }
}

/// A stream entry whose payload could not be turned into a `Delivery`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEntry {
    pub message_id: String,
    pub payload: Option<String>,
    pub attempt: u32,
    pub error: String,
}

/// Decode the `job` and `attempt` fields of a stream entry.
///
/// A missing or unparseable `attempt` counts as the first attempt.
pub fn parse_entry(
    message_id: &str,
    job: Option<&str>,
    attempt: Option<&str>,
) -> Result<Delivery, MalformedEntry> {
    let attempt = attempt
        .and_then(|a| a.trim().parse::<u32>().ok())
        .filter(|a| *a > 0)
        .unwrap_or(1);

    let Some(payload) = job else {
        return Err(MalformedEntry {
            message_id: message_id.to_string(),
            payload: None,
            attempt,
            error: "missing job field".to_string(),
        });
    };

    match RenderJob::from_json(payload) {
        Ok(job) => Ok(Delivery {
            message_id: message_id.to_string(),
            job,
            attempt,
        }),
        Err(e) => Err(MalformedEntry {
            message_id: message_id.to_string(),
            payload: Some(payload.to_string()),
            attempt,
            error: format!("invalid job payload: {}", e),
        }),
    }
}

/// At-least-once queue of render jobs.
///
/// Implementations dead-letter undecodable entries themselves inside
/// `consume`/`claim_stale`; callers only ever see well-formed deliveries.
#[async_trait]
pub trait RenderQueue: Send + Sync {
    /// Read up to `count` new deliveries, waiting at most `block_ms`.
    async fn consume(&self, consumer: &str, block_ms: u64, count: usize) -> QueueResult<Vec<Delivery>>;

    /// Take over deliveries left unacknowledged for `min_idle_ms` (crashed consumers).
    async fn claim_stale(&self, consumer: &str, min_idle_ms: u64, count: usize) -> QueueResult<Vec<Delivery>>;

    /// Reset the idle time of deliveries `consumer` is still working on so
    /// `claim_stale` leaves them alone. Ids no longer pending are ignored.
    async fn heartbeat(&self, consumer: &str, message_ids: &[String]) -> QueueResult<()>;

    /// Mark a delivery as done.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Schedule `attempt + 1` after `delay` and ack this delivery.
    async fn retry_later(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()>;

    /// Record the delivery in the dead-letter stream and ack it.
    async fn dead_letter(&self, delivery: &Delivery, letter: &DeadLetter) -> QueueResult<()>;

    /// Move due retries back into the live queue. Returns how many moved.
    async fn promote_due(&self) -> QueueResult<usize>;
}

//! Render queue on Redis Streams.
//!
//! Layout:
//! - live stream (`reel:render`), consumer group `reel:workers`, entries
//!   `job=<RenderJob json> attempt=<n>`
//! - delayed retries in a sorted set (`reel:render:delayed`) scored by due
//!   time in epoch milliseconds
//! - dead letters in a stream (`reel:render:dlq`)

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reel_models::RenderJob;

use crate::delivery::{parse_entry, DeadLetter, DeadLetterRecord, Delivery, RenderQueue};
use crate::error::{QueueError, QueueResult};

/// Moves due members of the delayed set into the live stream atomically.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, member in ipairs(due) do
  local entry = cjson.decode(member)
  redis.call('XADD', KEYS[2], '*', 'job', entry.job, 'attempt', tostring(entry.attempt))
  redis.call('ZREM', KEYS[1], member)
end
return #due
"#;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Sorted set holding delayed retries
    pub delayed_set: String,
    /// Max delayed retries promoted per call
    pub promote_batch: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reel:render".to_string(),
            consumer_group: "reel:workers".to_string(),
            dlq_stream_name: "reel:render:dlq".to_string(),
            delayed_set: "reel:render:delayed".to_string(),
            promote_batch: 100,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            delayed_set: std::env::var("QUEUE_DELAYED_SET").unwrap_or(defaults.delayed_set),
            promote_batch: std::env::var("QUEUE_PROMOTE_BATCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.promote_batch),
        }
    }
}

/// Member of the delayed set. `id` keeps members unique.
#[derive(Debug, Serialize, Deserialize)]
struct DelayedEntry {
    id: String,
    job: String,
    attempt: u32,
}

/// Render queue client.
pub struct RedisRenderQueue {
    client: redis::Client,
    config: QueueConfig,
    promote_script: redis::Script,
}

impl RedisRenderQueue {
    /// Create a new queue client.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            promote_script: redis::Script::new(PROMOTE_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a render job as its first attempt.
    pub async fn enqueue(&self, job: &RenderJob) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let payload = job.to_json()?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("attempt")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(reel_id = %job.reel_id, "Enqueued render job with message ID {}", message_id);
        Ok(message_id)
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Number of retries waiting in the delayed set.
    pub async fn delayed_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.zcard(&self.config.delayed_set).await?;
        Ok(len)
    }

    /// Ping Redis.
    pub async fn check_connectivity(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn ack_id(&self, conn: &mut MultiplexedConnection, message_id: &str) -> QueueResult<()> {
        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .ignore()
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }

    /// Append to the DLQ stream and ack the original entry in one transaction.
    async fn write_dead_letter(
        &self,
        conn: &mut MultiplexedConnection,
        record: &DeadLetterRecord,
    ) -> QueueResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        let xadd = pipe.cmd("XADD").arg(&self.config.dlq_stream_name).arg("*");
        for (field, value) in record.fields() {
            xadd.arg(field).arg(value);
        }
        xadd.ignore();

        pipe.cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&record.original_id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(&record.original_id)
            .ignore();

        pipe.query_async::<()>(conn).await?;
        Ok(())
    }

    /// Turn raw entries into deliveries, dead-lettering the malformed ones.
    async fn decode_entries(
        &self,
        conn: &mut MultiplexedConnection,
        entries: Vec<StreamId>,
    ) -> QueueResult<Vec<Delivery>> {
        let mut deliveries = Vec::with_capacity(entries.len());

        for entry in entries {
            let job: Option<String> = entry.get("job");
            let attempt: Option<String> = entry.get("attempt");

            match parse_entry(&entry.id, job.as_deref(), attempt.as_deref()) {
                Ok(delivery) => deliveries.push(delivery),
                Err(malformed) => {
                    warn!(
                        message_id = %malformed.message_id,
                        error = %malformed.error,
                        "Dead-lettering malformed queue entry"
                    );
                    self.write_dead_letter(conn, &DeadLetterRecord::from_malformed(&malformed))
                        .await?;
                }
            }
        }

        Ok(deliveries)
    }
}

#[async_trait]
impl RenderQueue for RedisRenderQueue {
    async fn consume(&self, consumer: &str, block_ms: u64, count: usize) -> QueueResult<Vec<Delivery>> {
        // Dedicated connection: a blocking read would stall a shared pipeline.
        let mut conn = self.connection().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        let deliveries = self.decode_entries(&mut conn, entries).await?;
        for delivery in &deliveries {
            debug!(reel_id = %delivery.job.reel_id, attempt = delivery.attempt, "Consumed render job");
        }
        Ok(deliveries)
    }

    async fn claim_stale(&self, consumer: &str, min_idle_ms: u64, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms);
        for id in &pending.ids {
            claim.arg(&id.id);
        }
        let claimed: StreamClaimReply = claim.query_async(&mut conn).await?;

        let deliveries = self.decode_entries(&mut conn, claimed.ids).await?;
        for delivery in &deliveries {
            info!(
                reel_id = %delivery.job.reel_id,
                attempt = delivery.attempt,
                "Claimed stale render job {}",
                delivery.message_id
            );
        }
        Ok(deliveries)
    }

    async fn heartbeat(&self, consumer: &str, message_ids: &[String]) -> QueueResult<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;

        // Min-idle 0 re-claims for ourselves, which resets the idle clock.
        // JUSTID leaves the delivery counter untouched.
        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(0);
        for id in message_ids {
            claim.arg(id);
        }
        claim.arg("JUSTID");
        let _: Vec<String> = claim.query_async(&mut conn).await?;

        debug!("Heartbeat for {} in-flight jobs", message_ids.len());
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        self.ack_id(&mut conn, &delivery.message_id).await?;
        debug!("Acknowledged job: {}", delivery.message_id);
        Ok(())
    }

    async fn retry_later(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let member = serde_json::to_string(&DelayedEntry {
            id: uuid::Uuid::new_v4().to_string(),
            job: delivery.job.to_json()?,
            attempt: delivery.attempt + 1,
        })?;
        let due_ms = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;

        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&self.config.delayed_set)
            .arg(due_ms)
            .arg(&member)
            .ignore()
            .cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&delivery.message_id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(&delivery.message_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        info!(
            reel_id = %delivery.job.reel_id,
            next_attempt = delivery.attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Scheduled retry"
        );
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, letter: &DeadLetter) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let record = DeadLetterRecord::from_delivery(delivery, letter);
        self.write_dead_letter(&mut conn, &record).await?;

        warn!(
            reel_id = %delivery.job.reel_id,
            stage = %letter.stage,
            kind = %letter.kind,
            attempt = delivery.attempt,
            "Moved job to DLQ: {}",
            letter.error
        );
        Ok(())
    }

    async fn promote_due(&self) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        let now_ms = chrono::Utc::now().timestamp_millis();

        let moved: usize = self
            .promote_script
            .key(&self.config.delayed_set)
            .key(&self.config.stream_name)
            .arg(now_ms)
            .arg(self.config.promote_batch)
            .invoke_async(&mut conn)
            .await?;

        if moved > 0 {
            debug!("Promoted {} delayed retries", moved);
        }
        Ok(moved)
    }
}

/// Read all fields of the DLQ stream (operator tooling and tests).
pub async fn read_dead_letters(queue: &RedisRenderQueue) -> QueueResult<Vec<HashMap<String, String>>> {
    let mut conn = queue.connection().await?;
    let reply: redis::streams::StreamRangeReply = conn
        .xrange_all(&queue.config.dlq_stream_name)
        .await?;

    Ok(reply
        .ids
        .into_iter()
        .map(|entry| {
            entry
                .map
                .iter()
                .filter_map(|(k, v)| {
                    redis::from_redis_value::<String>(v)
                        .ok()
                        .map(|v| (k.clone(), v))
                })
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{PipelineStage, ReelId};

    fn test_config() -> QueueConfig {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        QueueConfig {
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: format!("test:render:{}", suffix),
            consumer_group: "test:workers".to_string(),
            dlq_stream_name: format!("test:render:dlq:{}", suffix),
            delayed_set: format!("test:render:delayed:{}", suffix),
            promote_batch: 10,
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "reel:render");
        assert_eq!(config.consumer_group, "reel:workers");
        assert_eq!(config.dlq_stream_name, "reel:render:dlq");
        assert_eq!(config.delayed_set, "reel:render:delayed");
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_retry_then_dead_letter() {
        let queue = RedisRenderQueue::new(test_config()).unwrap();
        queue.init().await.unwrap();

        let job = RenderJob::new(ReelId::parse("r1").unwrap());
        queue.enqueue(&job).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);

        let first = queue.consume("c1", 100, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attempt, 1);

        queue.retry_later(&first[0], Duration::ZERO).await.unwrap();
        assert_eq!(queue.delayed_len().await.unwrap(), 1);
        assert_eq!(queue.promote_due().await.unwrap(), 1);

        let second = queue.consume("c1", 100, 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].attempt, 2);
        assert_eq!(second[0].job, job);

        queue
            .dead_letter(
                &second[0],
                &DeadLetter {
                    stage: PipelineStage::Transcode,
                    kind: "transcode_timeout".to_string(),
                    error: "timed out".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(queue.dlq_len().await.unwrap(), 1);
        let letters = read_dead_letters(&queue).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0]["reel_id"], "r1");
        assert_eq!(letters[0]["kind"], "transcode_timeout");
        assert_eq!(letters[0]["attempt"], "2");
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_malformed_payload_is_dead_lettered() {
        let queue = RedisRenderQueue::new(test_config()).unwrap();
        queue.init().await.unwrap();

        let mut conn = queue.connection().await.unwrap();
        redis::cmd("XADD")
            .arg(&queue.config.stream_name)
            .arg("*")
            .arg("job")
            .arg("not json")
            .query_async::<String>(&mut conn)
            .await
            .unwrap();

        let deliveries = queue.consume("c1", 100, 10).await.unwrap();
        assert!(deliveries.is_empty());

        let letters = read_dead_letters(&queue).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0]["stage"], "queued");
        assert_eq!(letters[0]["kind"], "malformed_payload");
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_claim_stale_keeps_attempt() {
        let queue = RedisRenderQueue::new(test_config()).unwrap();
        queue.init().await.unwrap();
        queue
            .enqueue(&RenderJob::new(ReelId::parse("r2").unwrap()))
            .await
            .unwrap();

        let consumed = queue.consume("crashed", 100, 10).await.unwrap();
        assert_eq!(consumed.len(), 1);

        let claimed = queue.claim_stale("rescuer", 0, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].message_id, consumed[0].message_id);
        assert_eq!(claimed[0].attempt, 1);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_heartbeat_keeps_job_from_being_claimed() {
        let queue = RedisRenderQueue::new(test_config()).unwrap();
        queue.init().await.unwrap();
        queue
            .enqueue(&RenderJob::new(ReelId::parse("r3").unwrap()))
            .await
            .unwrap();

        let consumed = queue.consume("busy", 100, 10).await.unwrap();
        assert_eq!(consumed.len(), 1);
        tokio::time::sleep(Duration::from_millis(300)).await;

        queue
            .heartbeat("busy", &[consumed[0].message_id.clone()])
            .await
            .unwrap();
        assert!(queue.claim_stale("rescuer", 200, 10).await.unwrap().is_empty());
    }
}

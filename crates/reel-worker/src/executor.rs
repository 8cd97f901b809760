//! Job executor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reel_queue::{DeadLetter, Delivery, RenderQueue};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::RenderPipeline;
use crate::retry::{Disposition, FailureTracker, RetryPolicy};

/// Most entries read from the queue in one call.
const CONSUME_BATCH: usize = 8;
/// How long a consume call blocks waiting for entries.
const CONSUME_BLOCK_MS: u64 = 1000;

/// Everything a spawned job needs; cheap to clone.
#[derive(Clone)]
struct Dispatcher {
    queue: Arc<dyn RenderQueue>,
    pipeline: Arc<RenderPipeline>,
    policy: RetryPolicy,
    slots: Arc<Semaphore>,
    max_slots: usize,
    /// Message ids of deliveries running on this worker
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Dispatcher {
    /// Wait for a free slot, then run `delivery` on it in the background.
    ///
    /// A delivery already running here (handed back by a claim) is skipped.
    async fn dispatch(&self, delivery: Delivery) -> WorkerResult<()> {
        if !self.in_flight.lock().await.insert(delivery.message_id.clone()) {
            debug!(
                reel_id = %delivery.job.reel_id,
                message_id = %delivery.message_id,
                "Delivery already running on this worker, skipping"
            );
            return Ok(());
        }

        let permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.in_flight.lock().await.remove(&delivery.message_id);
                return Err(WorkerError::queue_failed("worker slots closed"));
            }
        };
        self.report_in_flight();

        let this = self.clone();
        tokio::spawn(async move {
            this.execute(delivery, permit).await;
        });
        Ok(())
    }

    /// Run one attempt and settle the delivery: ack, delayed retry or dead letter.
    async fn execute(self, delivery: Delivery, permit: OwnedSemaphorePermit) {
        let reel_id = delivery.job.reel_id.clone();
        let attempt = delivery.attempt;

        let result = self.pipeline.run(&delivery.job, attempt).await;
        let disposition = self.policy.decide(&result, attempt);

        let settled = match (&result, disposition) {
            (Ok(_), _) | (_, Disposition::Ack) => {
                metrics::record_job_outcome("success");
                self.queue.ack(&delivery).await
            }
            (Err(err), Disposition::Retry { delay }) => {
                info!(
                    reel_id = %reel_id,
                    attempt,
                    stage = err.stage().as_str(),
                    kind = err.kind(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling retry"
                );
                metrics::record_job_outcome("retried");
                self.queue.retry_later(&delivery, delay).await
            }
            (Err(err), Disposition::DeadLetter) => {
                warn!(
                    reel_id = %reel_id,
                    attempt,
                    stage = err.stage().as_str(),
                    kind = err.kind(),
                    retriable = err.is_retriable(),
                    "Dead-lettering job"
                );
                metrics::record_job_outcome("dead_lettered");
                let letter = DeadLetter {
                    stage: err.stage(),
                    kind: err.kind().to_string(),
                    error: err.to_string(),
                };
                self.queue.dead_letter(&delivery, &letter).await
            }
        };

        // Left pending on failure; another consumer claims it once idle.
        if let Err(e) = settled {
            error!(
                reel_id = %reel_id,
                attempt,
                message_id = %delivery.message_id,
                "Failed to settle delivery: {}", e
            );
        }

        self.in_flight.lock().await.remove(&delivery.message_id);
        drop(permit);
        self.report_in_flight();
    }

    async fn in_flight_ids(&self) -> Vec<String> {
        self.in_flight.lock().await.iter().cloned().collect()
    }

    fn report_in_flight(&self) {
        metrics::set_jobs_in_flight(self.max_slots.saturating_sub(self.slots.available_permits()));
    }
}

/// Job executor that processes jobs from the queue.
///
/// A fixed number of worker slots (a semaphore) bound how many jobs render
/// at once. Background loops run beside the consumer: one moves due retries
/// back onto the stream, one claims jobs stranded on crashed consumers, and
/// one heartbeats the jobs running here so they are never claimed mid-render.
pub struct JobExecutor {
    config: WorkerConfig,
    dispatcher: Dispatcher,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, queue: Arc<dyn RenderQueue>, pipeline: RenderPipeline) -> Self {
        let max_slots = config.max_concurrent_jobs.max(1);
        let dispatcher = Dispatcher {
            queue,
            pipeline: Arc::new(pipeline),
            policy: config.retry_policy(),
            slots: Arc::new(Semaphore::new(max_slots)),
            max_slots,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        };
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            dispatcher,
            shutdown,
            consumer_name,
        }
    }

    /// Use a fixed consumer name instead of a random one.
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Consume jobs until `shutdown` is called, then wait for in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} worker slots",
            self.consumer_name, self.dispatcher.max_slots
        );

        let promote_task = self.spawn_promoter();
        let claim_task = self.spawn_claimer();
        let heartbeat_task = self.spawn_heartbeat();

        let mut shutdown_rx = self.shutdown.subscribe();

        // Main job consumption loop
        while !*shutdown_rx.borrow() {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        promote_task.abort();
        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout of {:?} elapsed with jobs still running; they will be reclaimed",
                self.config.shutdown_timeout
            );
        }
        // Jobs still running past the timeout stop heartbeating and get reclaimed.
        heartbeat_task.abort();

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Read up to the number of free slots and dispatch what arrives.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.dispatcher.slots.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .dispatcher
            .queue
            .consume(
                &self.consumer_name,
                CONSUME_BLOCK_MS,
                available.min(CONSUME_BATCH),
            )
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", deliveries.len());

        for delivery in deliveries {
            self.dispatcher.dispatch(delivery).await?;
        }

        Ok(())
    }

    fn spawn_promoter(&self) -> JoinHandle<()> {
        let queue = Arc::clone(&self.dispatcher.queue);
        let period = self.config.retry_promote_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut failures = FailureTracker::new(3);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue.promote_due().await {
                            Ok(promoted) => {
                                failures.record_success();
                                if promoted > 0 {
                                    debug!("Promoted {} due retries", promoted);
                                    metrics::record_retries_promoted(promoted);
                                }
                            }
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Failed to promote due retries: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_claimer(&self) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let consumer_name = self.consumer_name.clone();
        let period = self.config.claim_interval;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut failures = FailureTracker::new(3);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let available = dispatcher.slots.available_permits();
                        if available == 0 {
                            continue;
                        }

                        match dispatcher
                            .queue
                            .claim_stale(&consumer_name, min_idle_ms, available.min(CONSUME_BATCH))
                            .await
                        {
                            Ok(deliveries) => {
                                failures.record_success();
                                if deliveries.is_empty() {
                                    continue;
                                }
                                info!("Claimed {} stale jobs", deliveries.len());
                                metrics::record_jobs_claimed(deliveries.len());
                                for delivery in deliveries {
                                    if let Err(e) = dispatcher.dispatch(delivery).await {
                                        warn!("Failed to dispatch claimed job: {}", e);
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Failed to claim stale jobs: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Keep running deliveries from looking abandoned to `claim_stale`.
    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let consumer_name = self.consumer_name.clone();
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut failures = FailureTracker::new(3);
            loop {
                interval.tick().await;
                let ids = dispatcher.in_flight_ids().await;
                if ids.is_empty() {
                    continue;
                }
                match dispatcher.queue.heartbeat(&consumer_name, &ids).await {
                    Ok(()) => failures.record_success(),
                    Err(e) => {
                        if failures.record_failure() {
                            warn!("Failed to refresh {} in-flight jobs: {}", ids.len(), e);
                        }
                    }
                }
            }
        })
    }

    /// Resolves once every worker slot is free.
    async fn wait_for_jobs(&self) {
        let _ = self
            .dispatcher
            .slots
            .acquire_many(self.dispatcher.max_slots as u32)
            .await;
    }
}

//! In-process render queue.
//!
//! Same delivery semantics as the Redis queue (pending entries, delayed
//! retries, dead letters) without a broker. Used by tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use reel_models::RenderJob;

use crate::delivery::{parse_entry, DeadLetter, DeadLetterRecord, Delivery, RenderQueue};
use crate::error::{QueueError, QueueResult};

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    payload: Option<String>,
    attempt: u32,
}

#[derive(Debug)]
struct Pending {
    entry: Entry,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    ready: VecDeque<Entry>,
    pending: HashMap<String, Pending>,
    delayed: Vec<(Instant, Entry)>,
    dead: Vec<DeadLetterRecord>,
    acked: Vec<String>,
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{}-0", self.next_id)
    }
}

/// Queue held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> QueueResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| QueueError::connection_failed("memory queue lock poisoned"))
    }

    /// Enqueue a job as its first attempt.
    pub fn enqueue(&self, job: &RenderJob) -> QueueResult<String> {
        let payload = job.to_json()?;
        self.push_raw(Some(payload), 1)
    }

    /// Enqueue a raw payload; `None` means the entry has no `job` field.
    pub fn push_raw(&self, payload: Option<String>, attempt: u32) -> QueueResult<String> {
        let id = {
            let mut state = self.lock()?;
            let id = state.next_id();
            state.ready.push_back(Entry {
                id: id.clone(),
                payload,
                attempt,
            });
            id
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    /// Entries waiting to be consumed.
    pub fn ready_len(&self) -> usize {
        self.lock().map(|s| s.ready.len()).unwrap_or_default()
    }

    /// Entries consumed but not yet acked.
    pub fn pending_len(&self) -> usize {
        self.lock().map(|s| s.pending.len()).unwrap_or_default()
    }

    /// Retries not yet promoted.
    pub fn delayed_len(&self) -> usize {
        self.lock().map(|s| s.delayed.len()).unwrap_or_default()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.lock().map(|s| s.dead.clone()).unwrap_or_default()
    }

    /// Message ids acked so far, in order.
    pub fn acked(&self) -> Vec<String> {
        self.lock().map(|s| s.acked.clone()).unwrap_or_default()
    }

    /// True once nothing is ready, pending or delayed.
    pub fn is_drained(&self) -> bool {
        self.lock()
            .map(|s| s.ready.is_empty() && s.pending.is_empty() && s.delayed.is_empty())
            .unwrap_or(false)
    }

    fn take_ready(&self, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut state = self.lock()?;
        let mut deliveries = Vec::new();

        while deliveries.len() < count {
            let Some(entry) = state.ready.pop_front() else {
                break;
            };

            match parse_entry(&entry.id, entry.payload.as_deref(), Some(&entry.attempt.to_string())) {
                Ok(delivery) => {
                    state.pending.insert(
                        entry.id.clone(),
                        Pending {
                            entry,
                            delivered_at: Instant::now(),
                        },
                    );
                    deliveries.push(delivery);
                }
                Err(malformed) => {
                    state.dead.push(DeadLetterRecord::from_malformed(&malformed));
                    state.acked.push(entry.id);
                }
            }
        }

        Ok(deliveries)
    }

    fn settle(&self, state: &mut State, message_id: &str) {
        if state.pending.remove(message_id).is_some() {
            state.acked.push(message_id.to_string());
        }
    }
}

#[async_trait]
impl RenderQueue for MemoryQueue {
    async fn consume(&self, _consumer: &str, block_ms: u64, count: usize) -> QueueResult<Vec<Delivery>> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let deliveries = self.take_ready(count)?;
        if !deliveries.is_empty() || block_ms == 0 {
            return Ok(deliveries);
        }

        let _ = tokio::time::timeout(Duration::from_millis(block_ms), notified).await;
        self.take_ready(count)
    }

    async fn claim_stale(&self, _consumer: &str, min_idle_ms: u64, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut state = self.lock()?;
        let min_idle = Duration::from_millis(min_idle_ms);
        let now = Instant::now();

        let mut stale: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.delivered_at) >= min_idle)
            .map(|(id, _)| id.clone())
            .collect();
        stale.sort();
        stale.truncate(count);

        let mut deliveries = Vec::new();
        for id in stale {
            if let Some(pending) = state.pending.get_mut(&id) {
                pending.delivered_at = now;
                if let Ok(delivery) = parse_entry(
                    &pending.entry.id,
                    pending.entry.payload.as_deref(),
                    Some(&pending.entry.attempt.to_string()),
                ) {
                    deliveries.push(delivery);
                }
            }
        }

        Ok(deliveries)
    }

    async fn heartbeat(&self, _consumer: &str, message_ids: &[String]) -> QueueResult<()> {
        let mut state = self.lock()?;
        let now = Instant::now();
        for id in message_ids {
            if let Some(pending) = state.pending.get_mut(id) {
                pending.delivered_at = now;
            }
        }
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.lock()?;
        self.settle(&mut state, &delivery.message_id);
        Ok(())
    }

    async fn retry_later(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()> {
        let payload = delivery.job.to_json()?;
        let mut state = self.lock()?;
        let id = state.next_id();
        state.delayed.push((
            Instant::now() + delay,
            Entry {
                id,
                payload: Some(payload),
                attempt: delivery.attempt + 1,
            },
        ));
        self.settle(&mut state, &delivery.message_id);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, letter: &DeadLetter) -> QueueResult<()> {
        let mut state = self.lock()?;
        state.dead.push(DeadLetterRecord::from_delivery(delivery, letter));
        self.settle(&mut state, &delivery.message_id);
        Ok(())
    }

    async fn promote_due(&self) -> QueueResult<usize> {
        let moved = {
            let mut state = self.lock()?;
            let now = Instant::now();
            let (due, waiting): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.delayed).into_iter().partition(|(at, _)| *at <= now);
            state.delayed = waiting;
            let moved = due.len();
            for (_, entry) in due {
                state.ready.push_back(entry);
            }
            moved
        };

        if moved > 0 {
            self.notify.notify_waiters();
        }
        Ok(moved)
    }
}

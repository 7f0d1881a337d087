//! # Message Bus
//!
//! At-least-once delivery of [`Envelope`]s with optional delay. A received
//! message stays invisible for the visibility timeout; if it is not
//! acknowledged within that window it becomes visible again and is
//! redelivered.

use super::errors::{MessagingError, MessagingResult};
use super::message::Envelope;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A received message and the receipt that acknowledges it
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: String,
    pub envelope: Envelope,
    /// How many times this message has been handed out, this one included
    pub read_count: u32,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Make `envelope` visible after `delay`
    async fn publish(&self, envelope: Envelope, delay: Duration) -> MessagingResult<()>;

    /// Next visible message, waiting at most `wait` for one
    async fn receive(&self, wait: Duration) -> MessagingResult<Option<Delivery>>;

    /// Remove a delivered message for good
    async fn acknowledge(&self, receipt: &str) -> MessagingResult<()>;

    /// Scheduled plus in-flight messages
    async fn pending_count(&self) -> MessagingResult<u64>;
}

#[derive(Debug)]
struct QueuedMessage {
    envelope: Envelope,
    read_count: u32,
}

#[derive(Debug, Default)]
struct BusState {
    next_sequence: u64,
    /// (visible_at, sequence), earliest first
    schedule: BinaryHeap<Reverse<(Instant, u64)>>,
    queued: HashMap<u64, QueuedMessage>,
    /// sequence -> invisibility deadline
    in_flight: BTreeMap<u64, Instant>,
}

impl BusState {
    fn schedule(&mut self, sequence: u64, visible_at: Instant) {
        self.schedule.push(Reverse((visible_at, sequence)));
    }

    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(sequence, _)| *sequence)
            .collect();

        for sequence in expired {
            self.in_flight.remove(&sequence);
            self.schedule(sequence, now);
        }
    }

    /// Earliest instant at which something may become receivable
    fn next_wakeup(&self) -> Option<Instant> {
        let scheduled = self.schedule.peek().map(|Reverse((at, _))| *at);
        let in_flight = self.in_flight.values().min().copied();
        match (scheduled, in_flight) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Process-local bus on tokio timers; delays and redelivery honour paused time
pub struct InMemoryMessageBus {
    state: Mutex<BusState>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl InMemoryMessageBus {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }

    fn try_take(&self, now: Instant) -> Result<Delivery, Option<Instant>> {
        let mut state = self.state.lock();
        state.release_expired(now);

        while let Some(Reverse((visible_at, sequence))) = state.schedule.peek().copied() {
            if visible_at > now {
                break;
            }
            state.schedule.pop();

            let deadline = now + self.visibility_timeout;
            let Some(queued) = state.queued.get_mut(&sequence) else {
                continue;
            };
            queued.read_count += 1;
            let delivery = Delivery {
                receipt: sequence.to_string(),
                envelope: queued.envelope.clone(),
                read_count: queued.read_count,
            };
            state.in_flight.insert(sequence, deadline);
            return Ok(delivery);
        }

        Err(state.next_wakeup())
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, envelope: Envelope, delay: Duration) -> MessagingResult<()> {
        {
            let mut state = self.state.lock();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.queued.insert(
                sequence,
                QueuedMessage {
                    envelope,
                    read_count: 0,
                },
            );
            state.schedule(sequence, Instant::now() + delay);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> MessagingResult<Option<Delivery>> {
        let give_up_at = Instant::now() + wait;

        loop {
            let now = Instant::now();
            let wake_at = match self.try_take(now) {
                Ok(delivery) => return Ok(Some(delivery)),
                Err(next) => next.map_or(give_up_at, |next| next.min(give_up_at)),
            };

            if now >= give_up_at {
                return Ok(None);
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn acknowledge(&self, receipt: &str) -> MessagingResult<()> {
        let sequence: u64 = receipt
            .parse()
            .map_err(|_| MessagingError::unknown_receipt(receipt))?;

        let mut state = self.state.lock();
        if state.in_flight.remove(&sequence).is_none() {
            return Err(MessagingError::unknown_receipt(receipt));
        }
        state.queued.remove(&sequence);
        Ok(())
    }

    async fn pending_count(&self) -> MessagingResult<u64> {
        Ok(self.state.lock().queued.len() as u64)
    }
}

/// In-memory bus that rejects a set number of publishes before delegating
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FlakyMessageBus {
    inner: InMemoryMessageBus,
    failing_publishes: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl FlakyMessageBus {
    pub(crate) fn fail_next_publishes(&self, count: u32) {
        self.failing_publishes.store(count, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
#[async_trait]
impl MessageBus for FlakyMessageBus {
    async fn publish(&self, envelope: Envelope, delay: Duration) -> MessagingResult<()> {
        use std::sync::atomic::Ordering;
        let failing = self
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(MessagingError::queue_operation("flaky", "publish", "connection reset"));
        }
        self.inner.publish(envelope, delay).await
    }

    async fn receive(&self, wait: Duration) -> MessagingResult<Option<Delivery>> {
        self.inner.receive(wait).await
    }

    async fn acknowledge(&self, receipt: &str) -> MessagingResult<()> {
        self.inner.acknowledge(receipt).await
    }

    async fn pending_count(&self) -> MessagingResult<u64> {
        self.inner.pending_count().await
    }
}

//! In-memory bus whose publishes can be made to fail on demand.

use async_trait::async_trait;
use job_coordinator::messaging::{
    Delivery, Envelope, InMemoryMessageBus, MessageBus, MessagingError, MessagingResult,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub struct FlakyBus {
    inner: InMemoryMessageBus,
    failing_publishes: AtomicU32,
}

impl FlakyBus {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            inner: InMemoryMessageBus::new(visibility_timeout),
            failing_publishes: AtomicU32::new(0),
        }
    }

    /// Reject the next `count` publishes
    pub fn fail_next_publishes(&self, count: u32) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageBus for FlakyBus {
    async fn publish(&self, envelope: Envelope, delay: Duration) -> MessagingResult<()> {
        let failing = self
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(MessagingError::queue_operation(
                "remote_requests",
                "publish",
                "connection reset",
            ));
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

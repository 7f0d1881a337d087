use super::domain_events::DomainEvent;
use tokio::sync::broadcast;

/// Fan-out of domain events to observers
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: &'static str,
    pub event: DomainEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to current subscribers; having none is fine
    pub fn publish(&self, event: &DomainEvent) {
        let published = PublishedEvent {
            name: event.name(),
            event: event.clone(),
            published_at: chrono::Utc::now(),
        };

        if self.sender.send(published).is_err() {
            tracing::trace!(event = event.name(), "No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

pub mod domain_events;
pub mod publisher;
pub mod reactions;

// Re-export key types for convenience
pub use domain_events::{DomainEvent, DomainEventKind};
pub use publisher::{EventPublisher, PublishedEvent};
pub use reactions::{plan, reactions_for, PlannedDispatch, Reaction};

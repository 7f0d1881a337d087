//! # Messaging Module
//!
//! Remote request messages, the bus they travel on and the dispatcher that
//! gates them. Two bus backends are provided: a process-local one for tests
//! and embedded use, and a PostgreSQL queue table.

pub mod bus;
pub mod dispatcher;
pub mod errors;
pub mod message;
#[cfg(feature = "postgres")]
pub mod postgres_bus;

pub use bus::{Delivery, InMemoryMessageBus, MessageBus};
pub use dispatcher::{DispatchOutcome, DispatchPolicy, MessageDispatcher};
pub use errors::{DispatchError, MessagingError, MessagingResult};
pub use message::{Envelope, MessageKind, RemoteRequestMessage, Stamp};
#[cfg(feature = "postgres")]
pub use postgres_bus::PostgresMessageBus;

//! # Orchestration
//!
//! The message-processing side of the coordinator.
//!
//! - [`handlers`]: one [`handlers::MessageHandler`] per remote component,
//!   performing the remote call once preflight has passed
//! - [`failure_handlers`]: turns every [`errors::HandlerError`] into ledger
//!   writes and an acknowledge/redeliver decision
//! - [`coordinator`]: [`JobCoordinator`], the entry point owning the bus,
//!   the consumer loop and the event reactions

pub mod coordinator;
pub mod errors;
pub mod failure_handlers;
pub mod handlers;

pub use coordinator::{JobCoordinator, NewJob};
pub use errors::{HandlerError, HandlerResult, NotReadyReason};
pub use failure_handlers::{FailureHandlers, FailureResolution};
pub use handlers::{HandlerContext, HandlerOutcome, MessageHandler, MessageHandlers};

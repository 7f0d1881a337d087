#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Job Coordinator
//!
//! Readiness-gated orchestration of test-execution jobs. A job needs four
//! remote components before it can run: a results job, a serialized suite,
//! a machine and a worker job on that machine. The coordinator drives each
//! of them through create/poll/terminate requests against the owning
//! services, one queued message per request.
//!
//! ## Architecture
//!
//! ```text
//!   DomainEvent ──▶ reaction table ──▶ MessageDispatcher ──▶ MessageBus
//!        ▲                                   │ ledger row         │
//!        │                                   ▼                    ▼
//!   MessageHandlers ◀──────────────── RemoteRequestLedger ◀── consumer
//!        │ HandlerError                      ▲
//!        └──────────▶ FailureHandlers ───────┘
//! ```
//!
//! - Every request is an attempt row in the [`ledger`], keyed by
//!   `(job_id, type, index)` and moved through a fixed state machine
//!   ([`state_machine`]).
//! - Before a message is published or handled, [`readiness`] answers `NOW`,
//!   `EVENTUALLY` or `NEVER` from a snapshot of the job's entities.
//! - Remote failures are classified ([`classification`]) into content
//!   addressed records shared by every attempt that hit the same failure.
//! - [`services::JobStatusService`] reduces everything into a per-job
//!   preparation state.
//!
//! ## Module Organization
//!
//! - [`models`] - jobs, ledger rows, failures and component entities
//! - [`storage`] - repository traits with in-memory and PostgreSQL backends
//! - [`messaging`] - messages, envelopes, buses and the dispatcher
//! - [`events`] - domain events, the reaction table and the event publisher
//! - [`orchestration`] - handlers, failure handlers and [`JobCoordinator`]
//! - [`clients`] - traits for the remote services
//! - [`config`] - layered configuration via the `config` crate
//! - [`logging`] - `tracing` subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use job_coordinator::{ConfigManager, JobCoordinator, NewJob, RemoteClients};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! # async fn example(clients: RemoteClients) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! job_coordinator::logging::init_structured_logging(&manager.config().logging);
//!
//! let coordinator = Arc::new(JobCoordinator::connect(manager.config().clone(), clients).await?);
//! let job_id = coordinator
//!     .create_job(NewJob {
//!         user_id: "user-1".into(),
//!         suite_id: "suite-1".into(),
//!         maximum_duration_in_seconds: 3600,
//!         parameters: BTreeMap::new(),
//!         authentication_token: "token".into(),
//!     })
//!     .await?;
//!
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! tokio::spawn(coordinator.clone().run(shutdown));
//! println!("{:?}", coordinator.status(&job_id).await?.preparation_state);
//! # Ok(())
//! # }
//! ```

pub mod classification;
pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod readiness;
pub mod services;
pub mod state_machine;
pub mod storage;

pub use classification::FailureClassifier;
pub use clients::RemoteClients;
pub use config::{ConfigManager, CoordinatorConfig};
pub use error::{CoordinatorError, Result};
pub use events::{DomainEvent, DomainEventKind, EventPublisher};
pub use ledger::RemoteRequestLedger;
pub use messaging::{
    DispatchOutcome, DispatchPolicy, InMemoryMessageBus, MessageBus, MessageDispatcher,
    RemoteRequestMessage,
};
pub use models::{Job, JobId, PreparationState, RemoteRequestType};
pub use orchestration::{JobCoordinator, NewJob};
pub use readiness::{Readiness, ReadinessAssessor};
pub use services::{JobStatus, JobStatusService};
pub use state_machine::{RequestEvent, RequestState};
pub use storage::Stores;

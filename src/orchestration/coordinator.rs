//! # Job Coordinator
//!
//! Wires the ledger, dispatcher, message handlers and failure handlers to a
//! [`MessageBus`] and runs the consumer loop.
//!
//! ```text
//!  create_job ──▶ JobCreated ──▶ react ──▶ dispatch ──▶ bus
//!                                  ▲                     │
//!                                  │                     ▼
//!                         domain events ◀── handler ◀── consumer
//!                                  ▲                     │ error
//!                                  └── failure handler ◀─┘
//! ```
//!
//! `react` publishes every domain event on the [`EventPublisher`] and then
//! runs it through the reaction table against a fresh job snapshot. A
//! refused duplicate dispatch is expected there (two events racing towards
//! the same action) and is not an error.
//!
//! A delivery whose attempt already ended `FAILED` is handed back to the
//! failure handlers, which dispatch the retry if none exists yet.

use super::failure_handlers::{FailureHandlers, FailureResolution};
use super::handlers::{HandlerContext, HandlerOutcome, MessageHandlers};
use crate::classification::FailureClassifier;
use crate::clients::RemoteClients;
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::events::{
    self, DomainEvent, DomainEventKind, EventPublisher, PlannedDispatch, PublishedEvent,
};
use crate::ledger::RemoteRequestLedger;
use crate::messaging::{Delivery, InMemoryMessageBus, MessageBus, MessageDispatcher};
use crate::models::{Job, JobId};
use crate::readiness::{JobSnapshot, ReadinessAssessor};
use crate::services::{JobStatus, JobStatusService};
use crate::state_machine::RequestState;
use crate::storage::Stores;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Request to create a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub user_id: String,
    pub suite_id: String,
    pub maximum_duration_in_seconds: u32,
    pub parameters: BTreeMap<String, String>,
    /// Credential forwarded to the remote services on behalf of the user
    pub authentication_token: String,
}

impl NewJob {
    fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(CoordinatorError::Validation("user_id must not be blank".into()));
        }
        if self.suite_id.trim().is_empty() {
            return Err(CoordinatorError::Validation("suite_id must not be blank".into()));
        }
        if self.maximum_duration_in_seconds == 0 {
            return Err(CoordinatorError::Validation(
                "maximum_duration_in_seconds must be positive".into(),
            ));
        }
        Ok(())
    }
}

pub struct JobCoordinator {
    config: CoordinatorConfig,
    stores: Stores,
    ledger: RemoteRequestLedger,
    bus: Arc<dyn MessageBus>,
    dispatcher: MessageDispatcher,
    handlers: MessageHandlers,
    failures: FailureHandlers,
    publisher: EventPublisher,
    status: JobStatusService,
}

impl JobCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        stores: Stores,
        bus: Arc<dyn MessageBus>,
        clients: RemoteClients,
    ) -> Self {
        let ledger = RemoteRequestLedger::from_stores(&stores);
        let dispatcher = MessageDispatcher::new(
            ledger.clone(),
            ReadinessAssessor::new(stores.clone()),
            stores.jobs.clone(),
            bus.clone(),
            config.dispatch.clone(),
        );
        let handlers = MessageHandlers::new(HandlerContext::new(stores.clone(), clients));
        let failures = FailureHandlers::new(
            ledger.clone(),
            stores.jobs.clone(),
            Arc::new(FailureClassifier::new()),
            dispatcher.clone(),
            config.retry.clone(),
        );
        let publisher = EventPublisher::new(config.messaging.event_channel_capacity);
        let status = JobStatusService::new(stores.clone());

        Self {
            config,
            stores,
            ledger,
            bus,
            dispatcher,
            handlers,
            failures,
            publisher,
            status,
        }
    }

    /// Coordinator over in-memory stores and an in-memory bus
    pub fn in_memory(config: CoordinatorConfig, clients: RemoteClients) -> Self {
        let bus = Arc::new(InMemoryMessageBus::new(config.messaging.visibility_timeout()));
        Self::new(config, Stores::in_memory(), bus, clients)
    }

    /// Connect to PostgreSQL, apply migrations and use the database for both
    /// storage and the message queue
    #[cfg(feature = "postgres")]
    pub async fn connect(config: CoordinatorConfig, clients: RemoteClients) -> Result<Self> {
        use crate::config::ConfigurationError;
        use crate::messaging::PostgresMessageBus;
        use crate::storage::StorageError;

        config.validate()?;
        let database_url = config.database.database_url().ok_or_else(|| {
            ConfigurationError::missing_required_field("url", "database (or DATABASE_URL)")
        })?;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&database_url)
            .await
            .map_err(StorageError::from)?;

        crate::storage::postgres::MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StorageError::Database(sqlx::Error::Migrate(Box::new(e))))?;

        info!(
            max_connections = config.database.max_connections,
            queue = %config.messaging.queue_name,
            "Database pool initialized and migrations applied"
        );

        let bus = Arc::new(PostgresMessageBus::new(
            pool.clone(),
            config.messaging.queue_name.clone(),
            config.messaging.visibility_timeout(),
            config.messaging.poll_interval(),
        ));
        Ok(Self::new(config, Stores::postgres(pool), bus, clients))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn ledger(&self) -> &RemoteRequestLedger {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Observe every domain event the coordinator produces
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }

    pub async fn status(&self, job_id: &JobId) -> Result<JobStatus> {
        self.status.status(job_id).await
    }

    /// Persist a new job and start provisioning its components
    pub async fn create_job(&self, new_job: NewJob) -> Result<JobId> {
        new_job.validate()?;

        let job = Job::new(
            new_job.user_id,
            new_job.suite_id.clone(),
            new_job.maximum_duration_in_seconds,
        );
        self.stores.jobs.save(&job).await?;
        info!(job_id = %job.id, suite_id = %job.suite_id, "🆕 Job created");

        self.react(DomainEvent::new(
            job.id.clone(),
            new_job.authentication_token,
            DomainEventKind::JobCreated {
                suite_id: new_job.suite_id,
                parameters: new_job.parameters,
            },
        ))
        .await?;

        Ok(job.id)
    }

    /// Publish `event` and dispatch whatever the reaction table plans for it.
    /// A dispatch that fails for reasons other than a duplicate is retried up
    /// to `retry.max_attempts` times; the last error is returned once every
    /// planned dispatch has been tried.
    pub async fn react(&self, event: DomainEvent) -> Result<()> {
        self.publisher.publish(&event);

        let Some(snapshot) = JobSnapshot::load(&self.stores, &event.job_id).await? else {
            debug!(job_id = %event.job_id, event = event.name(), "No job to react for");
            return Ok(());
        };

        let mut outcome = Ok(());
        for planned in events::plan(&event, &snapshot) {
            if let Err(e) = self.dispatch_reaction(&event, planned).await {
                outcome = Err(e);
            }
        }
        outcome
    }

    async fn dispatch_reaction(&self, event: &DomainEvent, planned: PlannedDispatch) -> Result<()> {
        let request_type = planned.message.request_type();
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self
                .dispatcher
                .dispatch(planned.message.clone(), planned.policy)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_duplicate() => {
                    debug!(
                        job_id = %event.job_id,
                        request_type = %request_type,
                        event = event.name(),
                        "Reaction skipped: attempt already live or succeeded"
                    );
                    return Ok(());
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        job_id = %event.job_id,
                        request_type = %request_type,
                        event = event.name(),
                        attempt = attempt,
                        error = %e,
                        "Reaction dispatch failed; retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.messaging.poll_interval()).await;
                }
                Err(e) => {
                    error!(
                        job_id = %event.job_id,
                        request_type = %request_type,
                        event = event.name(),
                        error = %e,
                        "Failed to dispatch reaction"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    /// Take one message off the bus and run it to completion. Returns `false`
    /// when nothing arrived within `wait`.
    pub async fn process_next(&self, wait: Duration) -> Result<bool> {
        let Some(delivery) = self.bus.receive(wait).await? else {
            return Ok(false);
        };

        let events = match self.handlers.handle(&delivery.envelope.message).await {
            Ok(HandlerOutcome::Completed { events }) => events,
            Ok(HandlerOutcome::Skipped {
                state: Some(RequestState::Failed),
            }) => match self.failures.resume_failed(&delivery.envelope).await {
                FailureResolution::Acknowledge { events } => events,
                FailureResolution::Redeliver => return Ok(true),
            },
            Ok(HandlerOutcome::Skipped { state }) => {
                debug!(
                    key = %delivery.envelope.message.key(),
                    state = ?state,
                    "Message skipped"
                );
                Vec::new()
            }
            Err(error) => match self.failures.handle(&delivery.envelope, error).await {
                FailureResolution::Acknowledge { events } => events,
                FailureResolution::Redeliver => return Ok(true),
            },
        };

        self.acknowledge(&delivery).await;
        let mut outcome = Ok(true);
        for event in events {
            if let Err(e) = self.react(event).await {
                outcome = Err(e);
            }
        }
        outcome
    }

    /// Process messages until the bus stays empty for `wait` or `max_messages`
    /// were handled; returns how many were handled
    pub async fn drain(&self, max_messages: usize, wait: Duration) -> Result<usize> {
        let mut processed = 0;
        while processed < max_messages && self.process_next(wait).await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Run `messaging.worker_count` consumers until `shutdown` turns true.
    /// Each consumer finishes the message in hand before stopping.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let worker_count = self.config.messaging.worker_count;
        info!(worker_count = worker_count, "🚀 Starting job coordinator consumers");

        let mut consumers = JoinSet::new();
        for consumer_id in 0..worker_count {
            let coordinator = Arc::clone(&self);
            let shutdown = shutdown.clone();
            consumers.spawn(async move { coordinator.consume(consumer_id, shutdown).await });
        }

        while let Some(joined) = consumers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Consumer task panicked");
            }
        }

        info!("✅ Job coordinator consumers stopped");
        Ok(())
    }

    async fn consume(&self, consumer_id: usize, shutdown: watch::Receiver<bool>) {
        let poll_interval = self.config.messaging.poll_interval();
        debug!(consumer_id = consumer_id, "Consumer started");

        while !*shutdown.borrow() {
            if let Err(e) = self.process_next(poll_interval).await {
                error!(consumer_id = consumer_id, error = %e, "Failed to process message");
                tokio::time::sleep(poll_interval).await;
            }
        }

        debug!(consumer_id = consumer_id, "Consumer stopped");
    }

    /// Remove a job and its component entities. Ledger rows stay, so messages
    /// still in flight observe the missing job and abort their attempts.
    pub async fn delete_job(&self, job_id: &JobId) -> Result<bool> {
        let removed = self.stores.jobs.remove(job_id).await?;
        if !removed {
            return Ok(false);
        }

        futures::try_join!(
            self.stores.results_jobs.remove(job_id),
            self.stores.serialized_suites.remove(job_id),
            self.stores.machines.remove(job_id),
            self.stores.worker_states.remove(job_id),
            self.stores.worker_component_states.remove_for_job(job_id),
        )?;

        info!(job_id = %job_id, "🗑️ Job deleted");
        Ok(true)
    }

    /// [`Self::delete_job`] plus every ledger row of the job and the failures
    /// nothing else references
    pub async fn purge_job(&self, job_id: &JobId) -> Result<bool> {
        let deleted = self.delete_job(job_id).await?;
        let removed = self.ledger.remove_for_job(job_id).await?;
        info!(job_id = %job_id, removed_requests = removed, "Job purged");
        Ok(deleted || removed > 0)
    }

    async fn acknowledge(&self, delivery: &Delivery) {
        if let Err(e) = self.bus.acknowledge(&delivery.receipt).await {
            warn!(
                receipt = %delivery.receipt,
                key = %delivery.envelope.message.key(),
                error = %e,
                "Failed to acknowledge message"
            );
        }
    }
}

//! # Message Handlers
//!
//! One handler per remote component. Every invocation starts with the same
//! preflight:
//!
//! 1. load the job snapshot; a missing job is [`HandlerError::JobNotFound`]
//! 2. load the ledger row; a missing or terminal row drops the message
//! 3. resume a `HALTED` row
//! 4. assess readiness; anything but `NOW` is [`HandlerError::NotReady`]
//!
//! after which the handler performs its remote call. Success stores the
//! entity, marks the attempt `SUCCEEDED` and returns domain events. Remote
//! errors come back as [`HandlerError::RemoteActionFailed`] for the failure
//! handlers to deal with.

pub mod machine;
pub mod results_job;
pub mod serialized_suite;
pub mod worker_job;

use super::errors::{HandlerError, HandlerResult, NotReadyReason};
use crate::clients::RemoteClients;
use crate::events::{DomainEvent, DomainEventKind};
use crate::ledger::RemoteRequestLedger;
use crate::messaging::RemoteRequestMessage;
use crate::models::{ComponentRequestState, RemoteRequest, RemoteRequestEntity};
use crate::readiness::{JobSnapshot, Readiness};
use crate::state_machine::{RequestEvent, RequestState};
use crate::storage::Stores;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// What a handler did with a message it did not fail on
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Completed { events: Vec<DomainEvent> },
    /// Attempt missing or already terminal; nothing was done
    Skipped { state: Option<RequestState> },
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn handler_name(&self) -> &'static str;

    fn entity(&self) -> RemoteRequestEntity;

    async fn handle(&self, message: &RemoteRequestMessage) -> HandlerResult<HandlerOutcome>;
}

/// Shared collaborators of every handler
#[derive(Clone)]
pub struct HandlerContext {
    pub stores: Stores,
    pub ledger: RemoteRequestLedger,
    pub clients: RemoteClients,
}

/// Result of a passed preflight
pub struct Preflight {
    pub snapshot: JobSnapshot,
    pub request: RemoteRequest,
}

pub enum PreflightResult {
    Proceed(Box<Preflight>),
    Skip(Option<RequestState>),
}

impl HandlerContext {
    pub fn new(stores: Stores, clients: RemoteClients) -> Self {
        let ledger = RemoteRequestLedger::from_stores(&stores);
        Self {
            stores,
            ledger,
            clients,
        }
    }

    pub async fn preflight(
        &self,
        message: &RemoteRequestMessage,
    ) -> HandlerResult<PreflightResult> {
        let Some(snapshot) = JobSnapshot::load(&self.stores, &message.job_id).await? else {
            return Err(HandlerError::job_not_found(message));
        };

        let key = message.key();
        let Some(mut request) = self.ledger.find(&key).await? else {
            debug!(key = %key, "No ledger row for message; dropping");
            return Ok(PreflightResult::Skip(None));
        };

        if request.state.is_terminal() {
            debug!(key = %key, state = %request.state, "Attempt already terminal; dropping");
            return Ok(PreflightResult::Skip(Some(request.state)));
        }

        if request.state == RequestState::Halted {
            if let Some(resumed) = self.ledger.transition(&key, RequestEvent::Resume).await? {
                request = resumed;
            }
        }

        match snapshot.assess(message.request_type()) {
            Readiness::Now => {}
            Readiness::Eventually => {
                return Err(HandlerError::not_ready(message, NotReadyReason::Eventually))
            }
            Readiness::Never => return Err(HandlerError::not_ready(message, NotReadyReason::Never)),
        }

        Ok(PreflightResult::Proceed(Box::new(Preflight { snapshot, request })))
    }

    /// Mark the attempt `SUCCEEDED` and, for creation types, the job
    /// component as succeeded; then wrap the events
    pub async fn complete(
        &self,
        message: &RemoteRequestMessage,
        kinds: Vec<DomainEventKind>,
    ) -> HandlerResult<HandlerOutcome> {
        let request_type = message.request_type();
        self.ledger.transition(&message.key(), RequestEvent::Succeed).await?;

        if request_type.is_creation() {
            self.stores
                .jobs
                .set_request_state(
                    &message.job_id,
                    request_type.entity(),
                    ComponentRequestState::Succeeded,
                )
                .await?;
        }

        let events = kinds
            .into_iter()
            .map(|kind| {
                DomainEvent::new(
                    message.job_id.clone(),
                    message.authentication_token.clone(),
                    kind,
                )
            })
            .collect();
        Ok(HandlerOutcome::Completed { events })
    }
}

/// Routes a message to the handler for its component
#[derive(Clone)]
pub struct MessageHandlers {
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl MessageHandlers {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            handlers: vec![
                Arc::new(results_job::ResultsJobHandler::new(context.clone())),
                Arc::new(serialized_suite::SerializedSuiteHandler::new(context.clone())),
                Arc::new(machine::MachineHandler::new(context.clone())),
                Arc::new(worker_job::WorkerJobHandler::new(context)),
            ],
        }
    }

    pub fn handler_for(&self, entity: RemoteRequestEntity) -> Option<&Arc<dyn MessageHandler>> {
        self.handlers.iter().find(|handler| handler.entity() == entity)
    }

    pub async fn handle(&self, message: &RemoteRequestMessage) -> HandlerResult<HandlerOutcome> {
        let entity = message.request_type().entity();
        match self.handler_for(entity) {
            Some(handler) => {
                debug!(
                    handler = handler.handler_name(),
                    job_id = %message.job_id,
                    request_type = %message.request_type(),
                    index = message.index,
                    "Handling remote request message"
                );
                handler.handle(message).await
            }
            None => Ok(HandlerOutcome::Skipped { state: None }),
        }
    }
}

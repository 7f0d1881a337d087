//! # Failure Handlers
//!
//! Single place where failed handler invocations turn into ledger writes.
//! Each [`HandlerError`] kind has its own resolution:
//!
//! | error                          | ledger                     | message                |
//! |--------------------------------|----------------------------|------------------------|
//! | `RemoteActionFailed` (halt)    | failure recorded, `HALTED` | re-armed, same index   |
//! | `RemoteActionFailed` (fail)    | failure recorded, `FAILED` | retried at a new index |
//! | `NotReady::Eventually`         | untouched                  | re-armed, same index   |
//! | `NotReady::Never`              | `ABORTED`                  | dropped                |
//! | `JobNotFound`/`EntityNotFound` | `ABORTED`                  | dropped                |
//! | storage / dispatch             | untouched                  | left for redelivery    |
//!
//! Everything but the last row acknowledges the delivery; redispatch is
//! always explicit. When a re-arm or retry cannot be published the delivery
//! is left for redelivery instead, and a redelivered message of a `FAILED`
//! attempt picks the retry up again through [`FailureHandlers::resume_failed`].

use super::errors::{HandlerError, NotReadyReason};
use crate::classification::FailureClassifier;
use crate::config::RetryConfig;
use crate::events::{DomainEvent, DomainEventKind};
use crate::ledger::RemoteRequestLedger;
use crate::logging::log_error;
use crate::messaging::{DispatchOutcome, DispatchPolicy, Envelope, MessageDispatcher};
use crate::models::{
    ComponentRequestState, FailureType, RemoteRequestAction, RemoteRequestFailure, RemoteRequestKey,
};
use crate::state_machine::{RequestEvent, RequestState};
use crate::storage::{JobRepository, StorageResult};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What the consumer should do with the delivery after a failed invocation
#[derive(Debug, Clone, PartialEq)]
pub enum FailureResolution {
    /// Resolved; acknowledge and publish the events
    Acknowledge { events: Vec<DomainEvent> },
    /// Leave the delivery unacknowledged so the bus redelivers it
    Redeliver,
}

impl FailureResolution {
    fn acknowledged() -> Self {
        Self::Acknowledge { events: Vec::new() }
    }
}

#[derive(Clone)]
pub struct FailureHandlers {
    ledger: RemoteRequestLedger,
    jobs: Arc<dyn JobRepository>,
    classifier: Arc<FailureClassifier>,
    dispatcher: MessageDispatcher,
    retry: RetryConfig,
}

impl FailureHandlers {
    pub fn new(
        ledger: RemoteRequestLedger,
        jobs: Arc<dyn JobRepository>,
        classifier: Arc<FailureClassifier>,
        dispatcher: MessageDispatcher,
        retry: RetryConfig,
    ) -> Self {
        Self {
            ledger,
            jobs,
            classifier,
            dispatcher,
            retry,
        }
    }

    pub async fn handle(&self, envelope: &Envelope, error: HandlerError) -> FailureResolution {
        let result = match error {
            HandlerError::RemoteActionFailed { error, .. } => {
                self.remote_action_failed(envelope, &error).await
            }
            HandlerError::NotReady {
                reason: NotReadyReason::Eventually,
                ..
            } => self.not_ready_eventually(envelope).await,
            HandlerError::NotReady {
                reason: NotReadyReason::Never,
                ..
            } => self.not_ready_never(envelope).await,
            HandlerError::JobNotFound { .. } | HandlerError::EntityNotFound { .. } => {
                self.referent_missing(envelope, &error).await
            }
            other => return self.unexpected(envelope, &other),
        };

        match result {
            Ok(resolution) => resolution,
            Err(e) => self.unexpected(envelope, &HandlerError::from(e)),
        }
    }

    async fn remote_action_failed(
        &self,
        envelope: &Envelope,
        cause: &anyhow::Error,
    ) -> StorageResult<FailureResolution> {
        let message = &envelope.message;
        let key = message.key();
        let request_type = message.request_type();

        let record = self.classifier.classify(cause);
        let failure = self.ledger.record_failure(&key, &record).await?;

        if self.should_halt(&failure, request_type.is_repeatable()) {
            self.ledger.transition(&key, RequestEvent::Halt).await?;
            let delay = self.dispatcher.configured_delay(message);
            warn!(
                key = %key,
                code = failure.code,
                delay_ms = delay.as_millis() as u64,
                "⏸️ Remote request halted"
            );
            if let Err(e) = self.dispatcher.redispatch(envelope, delay).await {
                error!(key = %key, error = %e, "Failed to re-arm halted remote request");
                return Ok(FailureResolution::Redeliver);
            }
            return Ok(FailureResolution::acknowledged());
        }

        self.ledger.transition(&key, RequestEvent::Fail).await?;
        warn!(
            key = %key,
            failure_type = %failure.failure_type,
            code = failure.code,
            retry_count = message.retry_count,
            "❌ Remote request failed"
        );

        self.settle_failed_attempt(envelope).await
    }

    /// Follow-up for a delivery whose attempt is already `FAILED`, as when a
    /// message is redelivered after its retry could not be dispatched
    pub async fn resume_failed(&self, envelope: &Envelope) -> FailureResolution {
        match self.settle_failed_attempt(envelope).await {
            Ok(resolution) => resolution,
            Err(e) => self.unexpected(envelope, &HandlerError::from(e)),
        }
    }

    /// Dispatch the next attempt while the budget allows, otherwise give up
    /// on the action. Only acts while the failed attempt is still the newest
    /// of its type.
    async fn settle_failed_attempt(
        &self,
        envelope: &Envelope,
    ) -> StorageResult<FailureResolution> {
        let message = &envelope.message;
        let key = message.key();
        let request_type = message.request_type();

        let newest = self.ledger.find_newest(&message.job_id, request_type).await?;
        let Some(failed) = newest.filter(|newest| {
            newest.index == message.index && newest.state == RequestState::Failed
        }) else {
            debug!(key = %key, "Failed attempt already superseded");
            return Ok(FailureResolution::acknowledged());
        };

        if message.retry_count + 1 < self.retry.max_attempts {
            let resolution = match self
                .dispatcher
                .dispatch(message.next_attempt(), DispatchPolicy::Configured)
                .await
            {
                Ok(DispatchOutcome::Dispatched { key: retry_key, delay }) => {
                    info!(
                        key = %retry_key,
                        delay_ms = delay.as_millis() as u64,
                        "🔁 Retrying failed remote request"
                    );
                    FailureResolution::acknowledged()
                }
                Ok(DispatchOutcome::NeverReady) => {
                    debug!(key = %key, "Retry skipped: request is no longer ready");
                    FailureResolution::acknowledged()
                }
                Err(e) if e.is_duplicate() => {
                    debug!(key = %key, "Retry skipped: another attempt is live");
                    FailureResolution::acknowledged()
                }
                Err(e) => {
                    error!(key = %key, error = %e, "Failed to dispatch retry");
                    FailureResolution::Redeliver
                }
            };
            return Ok(resolution);
        }

        if request_type.action() != RemoteRequestAction::Retrieve {
            self.jobs
                .set_request_state(
                    &message.job_id,
                    request_type.entity(),
                    ComponentRequestState::Failed,
                )
                .await?;
        }

        let failure_id = failed.failure_id.unwrap_or_default();
        error!(
            key = %key,
            attempts = message.retry_count + 1,
            failure_id = %failure_id,
            "Remote request failed with no attempts left"
        );

        Ok(FailureResolution::Acknowledge {
            events: vec![DomainEvent::new(
                message.job_id.clone(),
                message.authentication_token.clone(),
                DomainEventKind::RemoteRequestFailed {
                    request_type,
                    index: message.index,
                    failure_id,
                },
            )],
        })
    }

    fn should_halt(&self, failure: &RemoteRequestFailure, repeatable: bool) -> bool {
        repeatable && failure.failure_type == FailureType::Http && self.retry.halts_on(failure.code)
    }

    async fn not_ready_eventually(&self, envelope: &Envelope) -> StorageResult<FailureResolution> {
        let delay = self.dispatcher.configured_delay(&envelope.message);
        if let Err(e) = self.dispatcher.redispatch(envelope, delay).await {
            error!(
                key = %envelope.message.key(),
                error = %e,
                "Failed to re-arm remote request that is not ready yet"
            );
            return Ok(FailureResolution::Redeliver);
        }
        Ok(FailureResolution::acknowledged())
    }

    async fn not_ready_never(&self, envelope: &Envelope) -> StorageResult<FailureResolution> {
        let key = envelope.message.key();
        self.abort(&key).await?;
        debug!(key = %key, "Remote request will never be ready; aborted");
        Ok(FailureResolution::acknowledged())
    }

    async fn referent_missing(
        &self,
        envelope: &Envelope,
        cause: &HandlerError,
    ) -> StorageResult<FailureResolution> {
        let message = &envelope.message;
        let key = message.key();
        self.abort(&key).await?;
        info!(key = %key, reason = %cause, "🚫 Remote request aborted");

        Ok(FailureResolution::Acknowledge {
            events: vec![DomainEvent::new(
                message.job_id.clone(),
                message.authentication_token.clone(),
                DomainEventKind::RemoteRequestAborted {
                    request_type: message.request_type(),
                    index: message.index,
                },
            )],
        })
    }

    /// Move the attempt to `ABORTED`, passing through `REQUESTING` when it is
    /// parked in `HALTED`
    async fn abort(&self, key: &RemoteRequestKey) -> StorageResult<()> {
        let Some(request) = self.ledger.find(key).await? else {
            return Ok(());
        };

        if request.state == RequestState::Halted {
            self.ledger.transition(key, RequestEvent::Resume).await?;
        }
        self.ledger.transition(key, RequestEvent::Abort).await?;
        Ok(())
    }

    fn unexpected(&self, envelope: &Envelope, error: &HandlerError) -> FailureResolution {
        log_error(
            "failure_handlers",
            "handle",
            &error.to_string(),
            Some(&format!("{} left for redelivery", envelope.message.key())),
        );
        FailureResolution::Redeliver
    }
}

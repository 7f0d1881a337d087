//! # Message Dispatcher
//!
//! Publishes remote request messages after gating them on readiness and on
//! the single-live-attempt rule.
//!
//! ```text
//! message ──▶ readiness ──NEVER──▶ NeverReady (nothing written)
//!                │
//!                ▼
//!        non-repeatable? ──live or succeeded attempt──▶ DuplicateDispatch
//!                │
//!                ▼
//!     insert PENDING at newest + 1 ──conflict──▶ DuplicateDispatch
//!                │
//!                ▼
//!        PENDING → REQUESTING ──▶ publish (Immediate | Configured delay)
//!                                    │
//!                                  error ──▶ row removed, component state restored
//! ```
//!
//! Concurrent dispatches of one non-repeatable action race on the
//! `(job_id, type, index)` uniqueness of the ledger; exactly one insert wins.

use super::bus::MessageBus;
use super::errors::DispatchError;
use super::message::{Envelope, RemoteRequestMessage, Stamp};
use crate::config::DispatchConfig;
use crate::ledger::RemoteRequestLedger;
use crate::models::{ComponentRequestState, RemoteRequest, RemoteRequestKey};
use crate::readiness::{Readiness, ReadinessAssessor};
use crate::state_machine::RequestEvent;
use crate::storage::{JobRepository, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Triggered directly by an event that just happened
    Immediate,
    /// Poll or retry; wait the type's configured delay
    Configured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched { key: RemoteRequestKey, delay: Duration },
    NeverReady,
}

#[derive(Clone)]
pub struct MessageDispatcher {
    ledger: RemoteRequestLedger,
    readiness: ReadinessAssessor,
    jobs: Arc<dyn JobRepository>,
    bus: Arc<dyn MessageBus>,
    config: DispatchConfig,
}

impl MessageDispatcher {
    pub fn new(
        ledger: RemoteRequestLedger,
        readiness: ReadinessAssessor,
        jobs: Arc<dyn JobRepository>,
        bus: Arc<dyn MessageBus>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            ledger,
            readiness,
            jobs,
            bus,
            config,
        }
    }

    pub async fn dispatch(
        &self,
        mut message: RemoteRequestMessage,
        policy: DispatchPolicy,
    ) -> Result<DispatchOutcome, DispatchError> {
        let job_id = message.job_id.clone();
        let request_type = message.request_type();

        if self.readiness.is_ready(request_type, &job_id).await? == Readiness::Never {
            debug!(job_id = %job_id, request_type = %request_type, "Dispatch skipped: never ready");
            return Ok(DispatchOutcome::NeverReady);
        }

        // A non-repeatable action takes the index after the row its liveness
        // check read, so a racing dispatch collides on the same key.
        let index = if request_type.is_repeatable() {
            self.ledger.next_index(&job_id, request_type).await?
        } else {
            match self.ledger.find_newest(&job_id, request_type).await? {
                Some(newest) if newest.blocks_redispatch() => {
                    return Err(DispatchError::duplicate(&job_id, request_type));
                }
                Some(newest) => newest.index + 1,
                None => 0,
            }
        };

        let previous_state = if request_type.is_creation() {
            self.jobs
                .find(&job_id)
                .await?
                .map(|job| job.request_state(request_type.entity()))
        } else {
            None
        };

        let request = RemoteRequest::new(job_id.clone(), request_type, index);
        match self.ledger.create(&request).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => {
                return Err(DispatchError::duplicate(&job_id, request_type));
            }
            Err(e) => return Err(e.into()),
        }

        let key = request.key();
        message.index = index;
        let delay = match self.begin_and_publish(&key, message, policy).await {
            Ok(delay) => delay,
            Err(e) => {
                self.abandon(&key, previous_state).await;
                return Err(e);
            }
        };

        info!(
            job_id = %job_id,
            request_type = %request_type,
            index = index,
            delay_ms = delay.as_millis() as u64,
            "📤 Dispatched remote request"
        );

        Ok(DispatchOutcome::Dispatched { key, delay })
    }

    async fn begin_and_publish(
        &self,
        key: &RemoteRequestKey,
        message: RemoteRequestMessage,
        policy: DispatchPolicy,
    ) -> Result<Duration, DispatchError> {
        self.ledger.transition(key, RequestEvent::Begin).await?;

        if key.request_type.is_creation() {
            self.jobs
                .set_request_state(
                    &key.job_id,
                    key.request_type.entity(),
                    ComponentRequestState::Requesting,
                )
                .await?;
        }

        let mut envelope = Envelope::new(message);
        if policy == DispatchPolicy::Immediate {
            envelope = envelope.with_stamp(Stamp::NonDelayed);
        }
        self.publish(envelope).await
    }

    /// Undo an attempt whose message never reached the bus. The row is
    /// removed so it cannot block the next dispatch of its action.
    async fn abandon(
        &self,
        key: &RemoteRequestKey,
        previous_state: Option<ComponentRequestState>,
    ) {
        if let Err(e) = self.ledger.remove(key).await {
            warn!(key = %key, error = %e, "Failed to remove unpublished remote request");
        }
        if let Some(state) = previous_state {
            if let Err(e) = self
                .jobs
                .set_request_state(&key.job_id, key.request_type.entity(), state)
                .await
            {
                warn!(key = %key, error = %e, "Failed to restore component request state");
            }
        }
    }

    /// Re-arm an already dispatched message under its existing index. No
    /// ledger row is written.
    pub async fn redispatch(
        &self,
        envelope: &Envelope,
        delay: Duration,
    ) -> Result<(), DispatchError> {
        self.bus.publish(envelope.rearmed(), delay).await?;
        debug!(
            job_id = %envelope.message.job_id,
            request_type = %envelope.message.request_type(),
            index = envelope.message.index,
            delay_ms = delay.as_millis() as u64,
            "Re-armed remote request"
        );
        Ok(())
    }

    /// Ambient delay for an envelope: zero when stamped `NonDelayed`, the
    /// configured per-type delay otherwise
    pub fn effective_delay(&self, envelope: &Envelope) -> Duration {
        if envelope.has_stamp(Stamp::NonDelayed) {
            Duration::ZERO
        } else {
            self.config.delay_for(envelope.message.request_type())
        }
    }

    pub fn configured_delay(&self, message: &RemoteRequestMessage) -> Duration {
        self.config.delay_for(message.request_type())
    }

    async fn publish(&self, envelope: Envelope) -> Result<Duration, DispatchError> {
        let delay = self.effective_delay(&envelope);
        self.bus.publish(envelope, delay).await?;
        Ok(delay)
    }
}

use super::{HandlerContext, HandlerOutcome, MessageHandler, PreflightResult};
use crate::clients::RemoteSerializedSuite;
use crate::events::DomainEventKind;
use crate::messaging::{MessageKind, RemoteRequestMessage};
use crate::models::{JobId, RemoteRequestEntity, SerializedSuite, SerializedSuiteState};
use crate::orchestration::errors::{HandlerError, HandlerResult};
use async_trait::async_trait;
use std::collections::BTreeMap;

pub struct SerializedSuiteHandler {
    context: HandlerContext,
}

fn to_entity(job_id: &JobId, remote: RemoteSerializedSuite) -> SerializedSuite {
    SerializedSuite {
        job_id: job_id.clone(),
        serialized_suite_id: remote.id,
        state: remote.state,
        failure_reason: remote.failure_reason,
        failure_message: remote.failure_message,
    }
}

/// Prepared/failed notification when the suite has just reached an end state
fn end_state_event(
    previous: Option<SerializedSuiteState>,
    suite: &SerializedSuite,
) -> Option<DomainEventKind> {
    if previous.is_some_and(|previous| previous.is_end_state()) {
        return None;
    }

    match suite.state {
        SerializedSuiteState::Prepared => Some(DomainEventKind::SerializedSuitePrepared {
            serialized_suite_id: suite.serialized_suite_id.clone(),
        }),
        SerializedSuiteState::Failed => Some(DomainEventKind::SerializedSuiteFailed {
            serialized_suite_id: suite.serialized_suite_id.clone(),
            reason: suite.failure_reason.clone(),
        }),
        SerializedSuiteState::Requested | SerializedSuiteState::Preparing => None,
    }
}

impl SerializedSuiteHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self { context }
    }

    async fn create(
        &self,
        message: &RemoteRequestMessage,
        suite_id: &str,
        parameters: &BTreeMap<String, String>,
    ) -> HandlerResult<HandlerOutcome> {
        let remote = self
            .context
            .clients
            .sources
            .create_serialized_suite(
                &message.authentication_token,
                &message.job_id,
                suite_id,
                parameters,
            )
            .await
            .map_err(|e| HandlerError::remote(message, e))?;

        let suite = to_entity(&message.job_id, remote);
        self.context.stores.serialized_suites.save(&suite).await?;

        let mut events = vec![DomainEventKind::SerializedSuiteCreated {
            serialized_suite_id: suite.serialized_suite_id.clone(),
        }];
        events.extend(end_state_event(None, &suite));

        self.context.complete(message, events).await
    }

    async fn retrieve(
        &self,
        message: &RemoteRequestMessage,
        serialized_suite_id: &str,
        previous: Option<SerializedSuite>,
    ) -> HandlerResult<HandlerOutcome> {
        let previous =
            previous.ok_or_else(|| HandlerError::entity_not_found(message, "serialized suite"))?;

        let remote = self
            .context
            .clients
            .sources
            .get_serialized_suite(&message.authentication_token, serialized_suite_id)
            .await
            .map_err(|e| HandlerError::remote(message, e))?;

        let suite = to_entity(&message.job_id, remote);
        self.context.stores.serialized_suites.save(&suite).await?;

        let mut events = vec![DomainEventKind::SerializedSuiteRetrieved {
            serialized_suite_id: suite.serialized_suite_id.clone(),
            state: suite.state,
        }];
        events.extend(end_state_event(Some(previous.state), &suite));

        self.context.complete(message, events).await
    }
}

#[async_trait]
impl MessageHandler for SerializedSuiteHandler {
    fn handler_name(&self) -> &'static str {
        "serialized_suite"
    }

    fn entity(&self) -> RemoteRequestEntity {
        RemoteRequestEntity::SerializedSuite
    }

    async fn handle(&self, message: &RemoteRequestMessage) -> HandlerResult<HandlerOutcome> {
        let preflight = match self.context.preflight(message).await? {
            PreflightResult::Proceed(preflight) => preflight,
            PreflightResult::Skip(state) => return Ok(HandlerOutcome::Skipped { state }),
        };

        match &message.kind {
            MessageKind::SerializedSuiteCreate {
                suite_id,
                parameters,
            } => self.create(message, suite_id, parameters).await,
            MessageKind::SerializedSuiteRetrieve {
                serialized_suite_id,
            } => {
                self.retrieve(message, serialized_suite_id, preflight.snapshot.serialized_suite)
                    .await
            }
            _ => Ok(HandlerOutcome::Skipped { state: None }),
        }
    }
}

use super::{HandlerContext, HandlerOutcome, MessageHandler, PreflightResult};
use crate::clients::{ApplicationState, WorkerJobRequest};
use crate::events::DomainEventKind;
use crate::messaging::{MessageKind, RemoteRequestMessage};
use crate::models::{JobId, RemoteRequestEntity, WorkerComponentState, WorkerState};
use crate::orchestration::errors::{HandlerError, HandlerResult};
use crate::readiness::JobSnapshot;
use async_trait::async_trait;

/// State recorded once the worker runtime accepted the job
const CREATED_STATE: &str = "created";

pub struct WorkerJobHandler {
    context: HandlerContext,
}

fn component_states(job_id: &JobId, application: &ApplicationState) -> Vec<WorkerComponentState> {
    application
        .components
        .iter()
        .map(|(name, status)| WorkerComponentState {
            job_id: job_id.clone(),
            component_name: *name,
            state: status.state.clone(),
            is_end_state: status.is_end_state,
        })
        .collect()
}

impl WorkerJobHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self { context }
    }

    async fn create(
        &self,
        message: &RemoteRequestMessage,
        machine_ip_address: &str,
        serialized_suite_id: &str,
        snapshot: JobSnapshot,
    ) -> HandlerResult<HandlerOutcome> {
        let results_job = snapshot
            .results_job
            .ok_or_else(|| HandlerError::entity_not_found(message, "results job"))?;

        let source = self
            .context
            .clients
            .sources
            .read_serialized_suite(&message.authentication_token, serialized_suite_id)
            .await
            .map_err(|e| HandlerError::remote(message, e))?;

        let request = WorkerJobRequest {
            job_id: message.job_id.clone(),
            results_token: results_job.token,
            maximum_duration_in_seconds: snapshot.job.maximum_duration_in_seconds,
            source,
        };

        self.context
            .clients
            .workers
            .create_job(machine_ip_address, &request)
            .await
            .map_err(|e| HandlerError::remote(message, e))?;

        let worker_state = WorkerState {
            job_id: message.job_id.clone(),
            state: CREATED_STATE.to_string(),
            is_end_state: false,
        };
        self.context.stores.worker_states.save(&worker_state).await?;

        self.context
            .complete(
                message,
                vec![DomainEventKind::WorkerJobStarted {
                    machine_ip_address: machine_ip_address.to_string(),
                }],
            )
            .await
    }

    async fn retrieve(
        &self,
        message: &RemoteRequestMessage,
        machine_ip_address: &str,
    ) -> HandlerResult<HandlerOutcome> {
        let application = self
            .context
            .clients
            .workers
            .get_application_state(machine_ip_address)
            .await
            .map_err(|e| HandlerError::remote(message, e))?;

        let worker_state = WorkerState {
            job_id: message.job_id.clone(),
            state: application.state.clone(),
            is_end_state: application.is_end_state,
        };
        self.context.stores.worker_states.save(&worker_state).await?;

        for component in component_states(&message.job_id, &application) {
            self.context
                .stores
                .worker_component_states
                .save(&component)
                .await?;
        }

        self.context
            .complete(
                message,
                vec![DomainEventKind::WorkerStateRetrieved {
                    machine_ip_address: machine_ip_address.to_string(),
                    state: application.state,
                    is_end_state: application.is_end_state,
                }],
            )
            .await
    }
}

#[async_trait]
impl MessageHandler for WorkerJobHandler {
    fn handler_name(&self) -> &'static str {
        "worker_job"
    }

    fn entity(&self) -> RemoteRequestEntity {
        RemoteRequestEntity::WorkerJob
    }

    async fn handle(&self, message: &RemoteRequestMessage) -> HandlerResult<HandlerOutcome> {
        let preflight = match self.context.preflight(message).await? {
            PreflightResult::Proceed(preflight) => preflight,
            PreflightResult::Skip(state) => return Ok(HandlerOutcome::Skipped { state }),
        };

        match &message.kind {
            MessageKind::WorkerJobCreate {
                machine_ip_address,
                serialized_suite_id,
            } => {
                self.create(
                    message,
                    machine_ip_address,
                    serialized_suite_id,
                    preflight.snapshot,
                )
                .await
            }
            MessageKind::WorkerJobRetrieve { machine_ip_address } => {
                self.retrieve(message, machine_ip_address).await
            }
            _ => Ok(HandlerOutcome::Skipped { state: None }),
        }
    }
}

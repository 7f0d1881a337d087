use super::{HandlerContext, HandlerOutcome, MessageHandler, PreflightResult};
use crate::clients::RemoteMachine;
use crate::events::DomainEventKind;
use crate::messaging::{MessageKind, RemoteRequestMessage};
use crate::models::{JobId, Machine, RemoteRequestEntity};
use crate::orchestration::errors::{HandlerError, HandlerResult};
use async_trait::async_trait;

pub struct MachineHandler {
    context: HandlerContext,
}

fn to_entity(job_id: &JobId, remote: RemoteMachine) -> Machine {
    Machine {
        job_id: job_id.clone(),
        id: remote.id,
        state: remote.state,
        state_category: remote.state_category,
        ip_addresses: remote.ip_addresses,
        action_failure: remote.action_failure,
        has_end_state: remote.has_end_state,
    }
}

fn reachable(machine: &Machine) -> bool {
    machine.state_category.has_been_active() && machine.ip_address().is_some()
}

/// Events for a fresh machine reading compared to the stored one
fn retrieval_events(previous: &Machine, current: &Machine) -> Vec<DomainEventKind> {
    let mut events = vec![DomainEventKind::MachineRetrieved {
        machine_id: current.id.clone(),
        state_category: current.state_category,
        has_end_state: current.has_end_state,
    }];

    if current.is_active() && !reachable(previous) {
        if let Some(ip_address) = current.ip_address() {
            events.push(DomainEventKind::MachineIsActive {
                machine_id: current.id.clone(),
                ip_address: ip_address.to_string(),
            });
        }
    }

    if let Some(failure) = &current.action_failure {
        if previous.action_failure.as_ref() != Some(failure) {
            events.push(DomainEventKind::MachineHasActionFailure {
                machine_id: current.id.clone(),
                failure: failure.clone(),
            });
        }
    }

    events
}

impl MachineHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self { context }
    }

    async fn create(&self, message: &RemoteRequestMessage) -> HandlerResult<HandlerOutcome> {
        let remote = self
            .context
            .clients
            .machines
            .create_machine(&message.authentication_token, &message.job_id)
            .await
            .map_err(|e| HandlerError::remote(message, e))?;

        let machine = to_entity(&message.job_id, remote);
        self.context.stores.machines.save(&machine).await?;

        self.context
            .complete(
                message,
                vec![DomainEventKind::MachineCreationRequested {
                    machine_id: machine.id.clone(),
                }],
            )
            .await
    }

    async fn retrieve(
        &self,
        message: &RemoteRequestMessage,
        machine_id: &str,
        previous: Option<Machine>,
    ) -> HandlerResult<HandlerOutcome> {
        let previous = previous.ok_or_else(|| HandlerError::entity_not_found(message, "machine"))?;

        let remote = self
            .context
            .clients
            .machines
            .get_machine(&message.authentication_token, machine_id)
            .await
            .map_err(|e| HandlerError::remote(message, e))?;

        let machine = to_entity(&message.job_id, remote);
        self.context.stores.machines.save(&machine).await?;

        self.context
            .complete(message, retrieval_events(&previous, &machine))
            .await
    }

    async fn terminate(
        &self,
        message: &RemoteRequestMessage,
        machine_id: &str,
        previous: Option<Machine>,
    ) -> HandlerResult<HandlerOutcome> {
        if previous.is_none() {
            return Err(HandlerError::entity_not_found(message, "machine"));
        }

        let remote = self
            .context
            .clients
            .machines
            .delete_machine(&message.authentication_token, machine_id)
            .await
            .map_err(|e| HandlerError::remote(message, e))?;

        let machine = to_entity(&message.job_id, remote);
        self.context.stores.machines.save(&machine).await?;

        self.context
            .complete(
                message,
                vec![DomainEventKind::MachineTerminationRequested {
                    machine_id: machine.id.clone(),
                }],
            )
            .await
    }
}

#[async_trait]
impl MessageHandler for MachineHandler {
    fn handler_name(&self) -> &'static str {
        "machine"
    }

    fn entity(&self) -> RemoteRequestEntity {
        RemoteRequestEntity::Machine
    }

    async fn handle(&self, message: &RemoteRequestMessage) -> HandlerResult<HandlerOutcome> {
        let preflight = match self.context.preflight(message).await? {
            PreflightResult::Proceed(preflight) => preflight,
            PreflightResult::Skip(state) => return Ok(HandlerOutcome::Skipped { state }),
        };

        match &message.kind {
            MessageKind::MachineCreate => self.create(message).await,
            MessageKind::MachineRetrieve { machine_id } => {
                self.retrieve(message, machine_id, preflight.snapshot.machine)
                    .await
            }
            MessageKind::MachineTerminate { machine_id } => {
                self.terminate(message, machine_id, preflight.snapshot.machine)
                    .await
            }
            _ => Ok(HandlerOutcome::Skipped { state: None }),
        }
    }
}

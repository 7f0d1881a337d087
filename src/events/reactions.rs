//! # Event Reactions
//!
//! Explicit wiring from domain events to the next remote requests. Each
//! reaction is a pure function of the event and a [`JobSnapshot`] taken after
//! the event's effects were stored; it plans at most one dispatch. The
//! coordinator runs the plan through the dispatcher, which still applies
//! readiness and duplicate checks.
//!
//! | event                        | reactions                                      |
//! |------------------------------|------------------------------------------------|
//! | job created                  | create results job, create serialized suite    |
//! | results job created          | create machine, poll results job               |
//! | results job state retrieved  | terminate machine at end, else poll            |
//! | serialized suite created     | poll serialized suite                          |
//! | serialized suite retrieved   | poll until end state                           |
//! | serialized suite prepared    | create machine                                 |
//! | machine creation requested   | poll machine                                   |
//! | machine retrieved            | poll until end, terminate if results job ended |
//! | machine is active            | create worker job                              |
//! | worker job started           | poll worker                                    |
//! | worker state retrieved       | poll until end state                           |

use super::domain_events::{DomainEvent, DomainEventKind};
use crate::messaging::{DispatchPolicy, MessageKind, RemoteRequestMessage};
use crate::models::ComponentEntity;
use crate::readiness::JobSnapshot;

/// A dispatch a reaction asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDispatch {
    pub message: RemoteRequestMessage,
    pub policy: DispatchPolicy,
}

pub type Reaction = fn(&DomainEvent, &JobSnapshot) -> Option<PlannedDispatch>;

const ON_JOB_CREATED: &[Reaction] = &[create_results_job, create_serialized_suite];
const ON_RESULTS_JOB_CREATED: &[Reaction] = &[create_machine, poll_results_job];
const ON_RESULTS_JOB_STATE_RETRIEVED: &[Reaction] =
    &[terminate_machine_after_results_job, poll_results_job_until_end];
const ON_SERIALIZED_SUITE_CREATED: &[Reaction] = &[poll_serialized_suite];
const ON_SERIALIZED_SUITE_RETRIEVED: &[Reaction] = &[poll_serialized_suite_until_end];
const ON_SERIALIZED_SUITE_PREPARED: &[Reaction] = &[create_machine];
const ON_MACHINE_CREATION_REQUESTED: &[Reaction] = &[poll_machine];
const ON_MACHINE_RETRIEVED: &[Reaction] =
    &[poll_machine_until_end, terminate_machine_after_machine_poll];
const ON_MACHINE_IS_ACTIVE: &[Reaction] = &[create_worker_job];
const ON_WORKER_JOB_STARTED: &[Reaction] = &[poll_worker];
const ON_WORKER_STATE_RETRIEVED: &[Reaction] = &[poll_worker_until_end];
const NO_REACTIONS: &[Reaction] = &[];

/// Reactions subscribed to the event's kind
pub fn reactions_for(event: &DomainEvent) -> &'static [Reaction] {
    match &event.kind {
        DomainEventKind::JobCreated { .. } => ON_JOB_CREATED,
        DomainEventKind::ResultsJobCreated => ON_RESULTS_JOB_CREATED,
        DomainEventKind::ResultsJobStateRetrieved { .. } => ON_RESULTS_JOB_STATE_RETRIEVED,
        DomainEventKind::SerializedSuiteCreated { .. } => ON_SERIALIZED_SUITE_CREATED,
        DomainEventKind::SerializedSuiteRetrieved { .. } => ON_SERIALIZED_SUITE_RETRIEVED,
        DomainEventKind::SerializedSuitePrepared { .. } => ON_SERIALIZED_SUITE_PREPARED,
        DomainEventKind::MachineCreationRequested { .. } => ON_MACHINE_CREATION_REQUESTED,
        DomainEventKind::MachineRetrieved { .. } => ON_MACHINE_RETRIEVED,
        DomainEventKind::MachineIsActive { .. } => ON_MACHINE_IS_ACTIVE,
        DomainEventKind::WorkerJobStarted { .. } => ON_WORKER_JOB_STARTED,
        DomainEventKind::WorkerStateRetrieved { .. } => ON_WORKER_STATE_RETRIEVED,
        DomainEventKind::SerializedSuiteFailed { .. }
        | DomainEventKind::MachineHasActionFailure { .. }
        | DomainEventKind::MachineTerminationRequested { .. }
        | DomainEventKind::RemoteRequestFailed { .. }
        | DomainEventKind::RemoteRequestAborted { .. } => NO_REACTIONS,
    }
}

pub fn plan(event: &DomainEvent, snapshot: &JobSnapshot) -> Vec<PlannedDispatch> {
    reactions_for(event)
        .iter()
        .filter_map(|reaction| reaction(event, snapshot))
        .collect()
}

fn planned(
    event: &DomainEvent,
    kind: MessageKind,
    policy: DispatchPolicy,
) -> Option<PlannedDispatch> {
    Some(PlannedDispatch {
        message: RemoteRequestMessage::new(
            event.job_id.clone(),
            event.authentication_token.clone(),
            kind,
        ),
        policy,
    })
}

fn create_results_job(event: &DomainEvent, _snapshot: &JobSnapshot) -> Option<PlannedDispatch> {
    planned(event, MessageKind::ResultsJobCreate, DispatchPolicy::Immediate)
}

fn create_serialized_suite(
    event: &DomainEvent,
    _snapshot: &JobSnapshot,
) -> Option<PlannedDispatch> {
    let DomainEventKind::JobCreated {
        suite_id,
        parameters,
    } = &event.kind
    else {
        return None;
    };

    planned(
        event,
        MessageKind::SerializedSuiteCreate {
            suite_id: suite_id.clone(),
            parameters: parameters.clone(),
        },
        DispatchPolicy::Immediate,
    )
}

fn create_machine(event: &DomainEvent, _snapshot: &JobSnapshot) -> Option<PlannedDispatch> {
    planned(event, MessageKind::MachineCreate, DispatchPolicy::Immediate)
}

fn poll_results_job(event: &DomainEvent, _snapshot: &JobSnapshot) -> Option<PlannedDispatch> {
    planned(event, MessageKind::ResultsJobRetrieve, DispatchPolicy::Configured)
}

fn poll_results_job_until_end(
    event: &DomainEvent,
    snapshot: &JobSnapshot,
) -> Option<PlannedDispatch> {
    let DomainEventKind::ResultsJobStateRetrieved { state } = &event.kind else {
        return None;
    };
    if state.has_ended() {
        return None;
    }
    poll_results_job(event, snapshot)
}

fn terminate_machine_after_results_job(
    event: &DomainEvent,
    snapshot: &JobSnapshot,
) -> Option<PlannedDispatch> {
    let DomainEventKind::ResultsJobStateRetrieved { state } = &event.kind else {
        return None;
    };
    if !state.has_ended() {
        return None;
    }
    terminate_live_machine(event, snapshot)
}

fn terminate_machine_after_machine_poll(
    event: &DomainEvent,
    snapshot: &JobSnapshot,
) -> Option<PlannedDispatch> {
    let DomainEventKind::MachineRetrieved { has_end_state, .. } = &event.kind else {
        return None;
    };
    let results_job_ended = snapshot
        .results_job
        .as_ref()
        .is_some_and(ComponentEntity::has_end_state);

    if *has_end_state || !results_job_ended {
        return None;
    }
    terminate_live_machine(event, snapshot)
}

fn terminate_live_machine(event: &DomainEvent, snapshot: &JobSnapshot) -> Option<PlannedDispatch> {
    let machine = snapshot.machine.as_ref()?;
    if machine.has_end_state() {
        return None;
    }

    planned(
        event,
        MessageKind::MachineTerminate {
            machine_id: machine.id.clone(),
        },
        DispatchPolicy::Immediate,
    )
}

fn poll_serialized_suite(event: &DomainEvent, _snapshot: &JobSnapshot) -> Option<PlannedDispatch> {
    let DomainEventKind::SerializedSuiteCreated {
        serialized_suite_id,
    } = &event.kind
    else {
        return None;
    };

    planned(
        event,
        MessageKind::SerializedSuiteRetrieve {
            serialized_suite_id: serialized_suite_id.clone(),
        },
        DispatchPolicy::Configured,
    )
}

fn poll_serialized_suite_until_end(
    event: &DomainEvent,
    _snapshot: &JobSnapshot,
) -> Option<PlannedDispatch> {
    let DomainEventKind::SerializedSuiteRetrieved {
        serialized_suite_id,
        state,
    } = &event.kind
    else {
        return None;
    };
    if state.is_end_state() {
        return None;
    }

    planned(
        event,
        MessageKind::SerializedSuiteRetrieve {
            serialized_suite_id: serialized_suite_id.clone(),
        },
        DispatchPolicy::Configured,
    )
}

fn poll_machine(event: &DomainEvent, _snapshot: &JobSnapshot) -> Option<PlannedDispatch> {
    let DomainEventKind::MachineCreationRequested { machine_id } = &event.kind else {
        return None;
    };

    planned(
        event,
        MessageKind::MachineRetrieve {
            machine_id: machine_id.clone(),
        },
        DispatchPolicy::Configured,
    )
}

fn poll_machine_until_end(event: &DomainEvent, _snapshot: &JobSnapshot) -> Option<PlannedDispatch> {
    let DomainEventKind::MachineRetrieved {
        machine_id,
        has_end_state,
        ..
    } = &event.kind
    else {
        return None;
    };
    if *has_end_state {
        return None;
    }

    planned(
        event,
        MessageKind::MachineRetrieve {
            machine_id: machine_id.clone(),
        },
        DispatchPolicy::Configured,
    )
}

fn create_worker_job(event: &DomainEvent, snapshot: &JobSnapshot) -> Option<PlannedDispatch> {
    let DomainEventKind::MachineIsActive { ip_address, .. } = &event.kind else {
        return None;
    };
    let serialized_suite = snapshot.serialized_suite.as_ref()?;

    planned(
        event,
        MessageKind::WorkerJobCreate {
            machine_ip_address: ip_address.clone(),
            serialized_suite_id: serialized_suite.serialized_suite_id.clone(),
        },
        DispatchPolicy::Immediate,
    )
}

fn poll_worker(event: &DomainEvent, _snapshot: &JobSnapshot) -> Option<PlannedDispatch> {
    let DomainEventKind::WorkerJobStarted { machine_ip_address } = &event.kind else {
        return None;
    };

    planned(
        event,
        MessageKind::WorkerJobRetrieve {
            machine_ip_address: machine_ip_address.clone(),
        },
        DispatchPolicy::Configured,
    )
}

fn poll_worker_until_end(event: &DomainEvent, _snapshot: &JobSnapshot) -> Option<PlannedDispatch> {
    let DomainEventKind::WorkerStateRetrieved {
        machine_ip_address,
        is_end_state,
        ..
    } = &event.kind
    else {
        return None;
    };
    if *is_end_state {
        return None;
    }

    planned(
        event,
        MessageKind::WorkerJobRetrieve {
            machine_ip_address: machine_ip_address.clone(),
        },
        DispatchPolicy::Configured,
    )
}

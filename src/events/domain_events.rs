//! Domain events emitted by message handlers and failure handlers.
//!
//! Every event names the job it concerns and carries the authentication token
//! of the message that produced it, so reactions can build follow-up messages
//! without looking anything up.

use crate::models::{
    JobId, MachineActionFailure, MachineStateCategory, RemoteRequestType, ResultsJobState,
    SerializedSuiteState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub job_id: JobId,
    pub authentication_token: String,
    pub kind: DomainEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        job_id: JobId,
        authentication_token: impl Into<String>,
        kind: DomainEventKind,
    ) -> Self {
        Self {
            job_id,
            authentication_token: authentication_token.into(),
            kind,
            occurred_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEventKind {
    JobCreated {
        suite_id: String,
        parameters: BTreeMap<String, String>,
    },
    ResultsJobCreated,
    ResultsJobStateRetrieved {
        state: ResultsJobState,
    },
    SerializedSuiteCreated {
        serialized_suite_id: String,
    },
    SerializedSuiteRetrieved {
        serialized_suite_id: String,
        state: SerializedSuiteState,
    },
    SerializedSuitePrepared {
        serialized_suite_id: String,
    },
    SerializedSuiteFailed {
        serialized_suite_id: String,
        reason: Option<String>,
    },
    MachineCreationRequested {
        machine_id: String,
    },
    MachineRetrieved {
        machine_id: String,
        state_category: MachineStateCategory,
        has_end_state: bool,
    },
    MachineIsActive {
        machine_id: String,
        ip_address: String,
    },
    MachineHasActionFailure {
        machine_id: String,
        failure: MachineActionFailure,
    },
    MachineTerminationRequested {
        machine_id: String,
    },
    WorkerJobStarted {
        machine_ip_address: String,
    },
    WorkerStateRetrieved {
        machine_ip_address: String,
        state: String,
        is_end_state: bool,
    },
    RemoteRequestFailed {
        request_type: RemoteRequestType,
        index: u32,
        failure_id: String,
    },
    RemoteRequestAborted {
        request_type: RemoteRequestType,
        index: u32,
    },
}

impl DomainEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job.created",
            Self::ResultsJobCreated => "results_job.created",
            Self::ResultsJobStateRetrieved { .. } => "results_job.state_retrieved",
            Self::SerializedSuiteCreated { .. } => "serialized_suite.created",
            Self::SerializedSuiteRetrieved { .. } => "serialized_suite.retrieved",
            Self::SerializedSuitePrepared { .. } => "serialized_suite.prepared",
            Self::SerializedSuiteFailed { .. } => "serialized_suite.failed",
            Self::MachineCreationRequested { .. } => "machine.creation_requested",
            Self::MachineRetrieved { .. } => "machine.retrieved",
            Self::MachineIsActive { .. } => "machine.is_active",
            Self::MachineHasActionFailure { .. } => "machine.has_action_failure",
            Self::MachineTerminationRequested { .. } => "machine.termination_requested",
            Self::WorkerJobStarted { .. } => "worker_job.started",
            Self::WorkerStateRetrieved { .. } => "worker_job.state_retrieved",
            Self::RemoteRequestFailed { .. } => "remote_request.failed",
            Self::RemoteRequestAborted { .. } => "remote_request.aborted",
        }
    }
}

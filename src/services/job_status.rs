use crate::error::{CoordinatorError, Result};
use crate::ledger::RemoteRequestLedger;
use crate::models::{
    ComponentRequestState, JobId, Machine, PreparationState, RemoteRequest, RemoteRequestEntity,
    RemoteRequestFailure, RemoteRequestType, ResultsJob, SerializedSuite, SerializedSuiteState,
    WorkerComponentState, WorkerState,
};
use crate::readiness::JobSnapshot;
use crate::storage::Stores;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Preparation of one job component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub state: PreparationState,
    pub request_state: ComponentRequestState,
    /// Newest classified failure of any request acting on the component
    pub latest_failure: Option<RemoteRequestFailure>,
    /// Failure reported by the remote service itself (suite failure reason,
    /// machine action failure)
    pub remote_failure: Option<String>,
}

/// Read model of everything known about a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub user_id: String,
    pub suite_id: String,
    pub created_at: DateTime<Utc>,
    pub preparation_state: PreparationState,
    pub components: BTreeMap<RemoteRequestEntity, ComponentStatus>,
    pub attempts: BTreeMap<RemoteRequestType, Vec<RemoteRequest>>,
    pub results_job: Option<ResultsJob>,
    pub serialized_suite: Option<SerializedSuite>,
    pub machine: Option<Machine>,
    pub worker_state: Option<WorkerState>,
    pub worker_components: Vec<WorkerComponentState>,
}

impl JobStatus {
    pub fn component(&self, entity: RemoteRequestEntity) -> Option<&ComponentStatus> {
        self.components.get(&entity)
    }
}

fn from_request_state(state: ComponentRequestState) -> PreparationState {
    match state {
        ComponentRequestState::Failed => PreparationState::Failed,
        ComponentRequestState::Requesting | ComponentRequestState::Halted => {
            PreparationState::Preparing
        }
        ComponentRequestState::Succeeded => PreparationState::Succeeded,
        ComponentRequestState::Unknown => PreparationState::Pending,
    }
}

fn serialized_suite_state(suite: &SerializedSuite) -> PreparationState {
    match suite.state {
        SerializedSuiteState::Prepared => PreparationState::Succeeded,
        SerializedSuiteState::Failed => PreparationState::Failed,
        SerializedSuiteState::Requested | SerializedSuiteState::Preparing => {
            PreparationState::Preparing
        }
    }
}

fn machine_state(machine: &Machine) -> PreparationState {
    if machine.action_failure.is_some() {
        PreparationState::Failed
    } else if machine.state_category.has_been_active() {
        PreparationState::Succeeded
    } else {
        PreparationState::Preparing
    }
}

/// Component preparation from the entity when it exists, from the job's
/// denormalized request state otherwise
fn preparation_state(snapshot: &JobSnapshot, entity: RemoteRequestEntity) -> PreparationState {
    let from_entity = match entity {
        RemoteRequestEntity::ResultsJob => {
            snapshot.results_job.as_ref().map(|_| PreparationState::Succeeded)
        }
        RemoteRequestEntity::SerializedSuite => {
            snapshot.serialized_suite.as_ref().map(serialized_suite_state)
        }
        RemoteRequestEntity::Machine => snapshot.machine.as_ref().map(machine_state),
        RemoteRequestEntity::WorkerJob => {
            snapshot.worker_state.as_ref().map(|_| PreparationState::Succeeded)
        }
    };

    from_entity.unwrap_or_else(|| from_request_state(snapshot.job.request_state(entity)))
}

fn remote_failure(snapshot: &JobSnapshot, entity: RemoteRequestEntity) -> Option<String> {
    match entity {
        RemoteRequestEntity::SerializedSuite => snapshot
            .serialized_suite
            .as_ref()
            .filter(|suite| suite.has_failed())
            .and_then(|suite| suite.failure_reason.clone()),
        RemoteRequestEntity::Machine => snapshot
            .machine
            .as_ref()
            .and_then(|machine| machine.action_failure.as_ref())
            .map(|failure| format!("{} {}", failure.action, failure.failure_type)),
        RemoteRequestEntity::ResultsJob | RemoteRequestEntity::WorkerJob => None,
    }
}

/// Newest request acting on `entity` that carries a failure
fn latest_failed_request(
    requests: &[RemoteRequest],
    entity: RemoteRequestEntity,
) -> Option<&RemoteRequest> {
    requests
        .iter()
        .filter(|request| request.request_type.entity() == entity && request.failure_id.is_some())
        .max_by_key(|request| request.updated_at)
}

/// Assembles [`JobStatus`] from the stores
#[derive(Clone)]
pub struct JobStatusService {
    stores: Stores,
    ledger: RemoteRequestLedger,
}

impl JobStatusService {
    pub fn new(stores: Stores) -> Self {
        let ledger = RemoteRequestLedger::from_stores(&stores);
        Self { stores, ledger }
    }

    pub async fn status(&self, job_id: &JobId) -> Result<JobStatus> {
        let snapshot = JobSnapshot::load(&self.stores, job_id)
            .await?
            .ok_or_else(|| CoordinatorError::JobNotFound(job_id.clone()))?;

        let (requests, worker_components) = futures::try_join!(
            self.ledger.find_for_job(job_id),
            self.stores.worker_component_states.find_for_job(job_id),
        )?;

        let mut components = BTreeMap::new();
        for entity in RemoteRequestEntity::ALL {
            let latest_failure = match latest_failed_request(&requests, entity)
                .and_then(|request| request.failure_id.as_deref())
            {
                Some(failure_id) => self.ledger.find_failure(failure_id).await?,
                None => None,
            };

            components.insert(
                entity,
                ComponentStatus {
                    state: preparation_state(&snapshot, entity),
                    request_state: snapshot.job.request_state(entity),
                    latest_failure,
                    remote_failure: remote_failure(&snapshot, entity),
                },
            );
        }

        let states: Vec<PreparationState> = components.values().map(|c| c.state).collect();
        let preparation_state = PreparationState::reduce(&states);

        let mut attempts: BTreeMap<RemoteRequestType, Vec<RemoteRequest>> = BTreeMap::new();
        for request in requests {
            attempts.entry(request.request_type).or_default().push(request);
        }
        for history in attempts.values_mut() {
            history.sort_by_key(|request| request.index);
        }

        debug!(job_id = %job_id, preparation_state = %preparation_state, "Assembled job status");

        let JobSnapshot {
            job,
            results_job,
            serialized_suite,
            machine,
            worker_state,
        } = snapshot;

        Ok(JobStatus {
            job_id: job.id,
            user_id: job.user_id,
            suite_id: job.suite_id,
            created_at: job.created_at,
            preparation_state,
            components,
            attempts,
            results_job,
            serialized_suite,
            machine,
            worker_state,
            worker_components,
        })
    }
}

//! # Readiness Assessment
//!
//! Answers "can this remote action run now, never, or not yet" for one job.
//!
//! Assessment works on a [`JobSnapshot`]: the job row plus every component
//! entity, loaded once from the stores. The rules themselves are pure
//! functions selected by a `match` on [`RemoteRequestType`], which keeps them
//! testable without any storage.

use crate::models::{
    ComponentEntity, ComponentRequestState, Job, JobId, Machine, RemoteRequestEntity,
    RemoteRequestType, ResultsJob, SerializedSuite, WorkerState,
};
use crate::storage::{StorageResult, Stores};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Readiness {
    /// Dependencies satisfied; perform the call
    Now,
    /// Dependencies outstanding; re-arm after the type's delay
    Eventually,
    /// Must never be attempted again for this job
    Never,
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Now => write!(f, "NOW"),
            Self::Eventually => write!(f, "EVENTUALLY"),
            Self::Never => write!(f, "NEVER"),
        }
    }
}

/// Job plus every component entity at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job: Job,
    pub results_job: Option<ResultsJob>,
    pub serialized_suite: Option<SerializedSuite>,
    pub machine: Option<Machine>,
    pub worker_state: Option<WorkerState>,
}

impl JobSnapshot {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            results_job: None,
            serialized_suite: None,
            machine: None,
            worker_state: None,
        }
    }

    /// `None` when the job does not exist
    pub async fn load(stores: &Stores, job_id: &JobId) -> StorageResult<Option<Self>> {
        let Some(job) = stores.jobs.find(job_id).await? else {
            return Ok(None);
        };

        let (results_job, serialized_suite, machine, worker_state) = futures::try_join!(
            stores.results_jobs.find(job_id),
            stores.serialized_suites.find(job_id),
            stores.machines.find(job_id),
            stores.worker_states.find(job_id),
        )?;

        Ok(Some(Self {
            job,
            results_job,
            serialized_suite,
            machine,
            worker_state,
        }))
    }

    pub fn job_id(&self) -> &JobId {
        &self.job.id
    }

    fn request_state(&self, entity: RemoteRequestEntity) -> ComponentRequestState {
        self.job.request_state(entity)
    }

    fn suite_failed(&self) -> bool {
        self.serialized_suite
            .as_ref()
            .is_some_and(SerializedSuite::has_failed)
            || self.request_state(RemoteRequestEntity::SerializedSuite)
                == ComponentRequestState::Failed
    }

    fn suite_prepared(&self) -> bool {
        self.serialized_suite
            .as_ref()
            .is_some_and(SerializedSuite::is_prepared)
    }

    fn results_job_ended(&self) -> bool {
        self.results_job
            .as_ref()
            .is_some_and(ComponentEntity::has_end_state)
    }

    /// Readiness of `request_type` against this snapshot
    pub fn assess(&self, request_type: RemoteRequestType) -> Readiness {
        match request_type {
            RemoteRequestType::ResultsJobCreate => results_job_create(self),
            RemoteRequestType::ResultsJobRetrieve => entity_retrieve(self.results_job.as_ref()),
            RemoteRequestType::SerializedSuiteCreate => serialized_suite_create(self),
            RemoteRequestType::SerializedSuiteRetrieve => {
                entity_retrieve(self.serialized_suite.as_ref())
            }
            RemoteRequestType::MachineCreate => machine_create(self),
            RemoteRequestType::MachineRetrieve => tracked_retrieve(self.machine.as_ref()),
            RemoteRequestType::MachineTerminate => machine_terminate(self),
            RemoteRequestType::WorkerJobCreate => worker_job_create(self),
            RemoteRequestType::WorkerJobRetrieve => tracked_retrieve(self.worker_state.as_ref()),
        }
    }
}

fn results_job_create(snapshot: &JobSnapshot) -> Readiness {
    if snapshot.results_job.is_some() {
        Readiness::Never
    } else {
        Readiness::Now
    }
}

fn serialized_suite_create(snapshot: &JobSnapshot) -> Readiness {
    if snapshot.serialized_suite.is_some() {
        Readiness::Never
    } else {
        Readiness::Now
    }
}

fn machine_create(snapshot: &JobSnapshot) -> Readiness {
    if snapshot.machine.is_some()
        || snapshot.suite_failed()
        || snapshot.request_state(RemoteRequestEntity::ResultsJob) == ComponentRequestState::Failed
    {
        return Readiness::Never;
    }

    if !snapshot.suite_prepared() || snapshot.results_job.is_none() {
        return Readiness::Eventually;
    }

    Readiness::Now
}

fn worker_job_create(snapshot: &JobSnapshot) -> Readiness {
    if snapshot.suite_failed() || snapshot.worker_state.is_some() {
        return Readiness::Never;
    }

    if !snapshot.suite_prepared() || snapshot.results_job.is_none() {
        return Readiness::Eventually;
    }

    Readiness::Now
}

fn machine_terminate(snapshot: &JobSnapshot) -> Readiness {
    if snapshot.machine.is_none() {
        return Readiness::Never;
    }

    if !snapshot.results_job_ended() {
        return Readiness::Eventually;
    }

    Readiness::Now
}

/// Poll of an entity whose row is written by another handler; a missing row
/// only means the creation handler has not finished yet
fn entity_retrieve<T: ComponentEntity>(entity: Option<&T>) -> Readiness {
    match entity {
        None => Readiness::Eventually,
        Some(entity) if entity.has_end_state() => Readiness::Never,
        Some(_) => Readiness::Now,
    }
}

/// Poll of an entity the poll itself may create
fn tracked_retrieve<T: ComponentEntity>(entity: Option<&T>) -> Readiness {
    match entity {
        Some(entity) if entity.has_end_state() => Readiness::Never,
        _ => Readiness::Now,
    }
}

/// Loads a [`JobSnapshot`] and assesses it
#[derive(Clone)]
pub struct ReadinessAssessor {
    stores: Stores,
}

impl ReadinessAssessor {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// A missing job yields [`Readiness::Never`]
    pub async fn is_ready(
        &self,
        request_type: RemoteRequestType,
        job_id: &JobId,
    ) -> StorageResult<Readiness> {
        let readiness = match JobSnapshot::load(&self.stores, job_id).await? {
            Some(snapshot) => snapshot.assess(request_type),
            None => Readiness::Never,
        };

        tracing::debug!(
            job_id = %job_id,
            request_type = %request_type,
            readiness = %readiness,
            "Assessed readiness"
        );
        Ok(readiness)
    }
}

//! # Remote Request Model
//!
//! One attempt to perform a named remote action for a job. The ledger keys
//! attempts by `(job_id, type, index)`; `index` counts attempts per
//! `(job_id, type)` from zero and never goes backwards.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE remote_request (
//!   job_id VARCHAR(26) NOT NULL,
//!   type VARCHAR(64) NOT NULL,
//!   index INTEGER NOT NULL,
//!   state VARCHAR(32) NOT NULL,
//!   failure_id VARCHAR(32) REFERENCES remote_request_failure (id),
//!   UNIQUE (job_id, type, index)
//! );
//! ```

use super::job::JobId;
use crate::state_machine::RequestState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote component a request acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteRequestEntity {
    ResultsJob,
    SerializedSuite,
    Machine,
    WorkerJob,
}

impl RemoteRequestEntity {
    pub const ALL: [RemoteRequestEntity; 4] = [
        Self::ResultsJob,
        Self::SerializedSuite,
        Self::Machine,
        Self::WorkerJob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResultsJob => "results-job",
            Self::SerializedSuite => "serialized-suite",
            Self::Machine => "machine",
            Self::WorkerJob => "worker-job",
        }
    }
}

impl fmt::Display for RemoteRequestEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteRequestAction {
    Create,
    Retrieve,
    Terminate,
}

impl RemoteRequestAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Retrieve => "retrieve",
            Self::Terminate => "terminate",
        }
    }
}

/// Named `(entity, action)` pair, e.g. `machine/create`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RemoteRequestType {
    #[serde(rename = "results-job/create")]
    ResultsJobCreate,
    #[serde(rename = "results-job/retrieve")]
    ResultsJobRetrieve,
    #[serde(rename = "serialized-suite/create")]
    SerializedSuiteCreate,
    #[serde(rename = "serialized-suite/retrieve")]
    SerializedSuiteRetrieve,
    #[serde(rename = "machine/create")]
    MachineCreate,
    #[serde(rename = "machine/retrieve")]
    MachineRetrieve,
    #[serde(rename = "machine/terminate")]
    MachineTerminate,
    #[serde(rename = "worker-job/create")]
    WorkerJobCreate,
    #[serde(rename = "worker-job/retrieve")]
    WorkerJobRetrieve,
}

impl RemoteRequestType {
    pub const ALL: [RemoteRequestType; 9] = [
        Self::ResultsJobCreate,
        Self::ResultsJobRetrieve,
        Self::SerializedSuiteCreate,
        Self::SerializedSuiteRetrieve,
        Self::MachineCreate,
        Self::MachineRetrieve,
        Self::MachineTerminate,
        Self::WorkerJobCreate,
        Self::WorkerJobRetrieve,
    ];

    pub fn entity(&self) -> RemoteRequestEntity {
        match self {
            Self::ResultsJobCreate | Self::ResultsJobRetrieve => RemoteRequestEntity::ResultsJob,
            Self::SerializedSuiteCreate | Self::SerializedSuiteRetrieve => {
                RemoteRequestEntity::SerializedSuite
            }
            Self::MachineCreate | Self::MachineRetrieve | Self::MachineTerminate => {
                RemoteRequestEntity::Machine
            }
            Self::WorkerJobCreate | Self::WorkerJobRetrieve => RemoteRequestEntity::WorkerJob,
        }
    }

    pub fn action(&self) -> RemoteRequestAction {
        match self {
            Self::ResultsJobCreate
            | Self::SerializedSuiteCreate
            | Self::MachineCreate
            | Self::WorkerJobCreate => RemoteRequestAction::Create,
            Self::ResultsJobRetrieve
            | Self::SerializedSuiteRetrieve
            | Self::MachineRetrieve
            | Self::WorkerJobRetrieve => RemoteRequestAction::Retrieve,
            Self::MachineTerminate => RemoteRequestAction::Terminate,
        }
    }

    /// Polls may be sent any number of times; anything with a remote side
    /// effect may not be re-sent while an attempt is live or has succeeded.
    pub fn is_repeatable(&self) -> bool {
        self.action() == RemoteRequestAction::Retrieve
    }

    /// Creation type for the entity this request acts on
    pub fn is_creation(&self) -> bool {
        self.action() == RemoteRequestAction::Create
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResultsJobCreate => "results-job/create",
            Self::ResultsJobRetrieve => "results-job/retrieve",
            Self::SerializedSuiteCreate => "serialized-suite/create",
            Self::SerializedSuiteRetrieve => "serialized-suite/retrieve",
            Self::MachineCreate => "machine/create",
            Self::MachineRetrieve => "machine/retrieve",
            Self::MachineTerminate => "machine/terminate",
            Self::WorkerJobCreate => "worker-job/create",
            Self::WorkerJobRetrieve => "worker-job/retrieve",
        }
    }
}

impl fmt::Display for RemoteRequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteRequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid remote request type: {s}"))
    }
}

/// Ledger key of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteRequestKey {
    pub job_id: JobId,
    pub request_type: RemoteRequestType,
    pub index: u32,
}

impl RemoteRequestKey {
    pub fn new(job_id: JobId, request_type: RemoteRequestType, index: u32) -> Self {
        Self {
            job_id,
            request_type,
            index,
        }
    }
}

impl fmt::Display for RemoteRequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.job_id, self.request_type, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub job_id: JobId,
    pub request_type: RemoteRequestType,
    pub index: u32,
    pub state: RequestState,
    pub failure_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteRequest {
    /// New `PENDING` attempt
    pub fn new(job_id: JobId, request_type: RemoteRequestType, index: u32) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            request_type,
            index,
            state: RequestState::Pending,
            failure_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> RemoteRequestKey {
        RemoteRequestKey::new(self.job_id.clone(), self.request_type, self.index)
    }

    /// A live attempt blocks re-dispatch of a non-repeatable action, and so
    /// does one that already succeeded.
    pub fn blocks_redispatch(&self) -> bool {
        !self.state.is_terminal() || self.state == RequestState::Succeeded
    }
}

/// Predicate for [`crate::storage::RemoteRequestRepository::count`]
#[derive(Debug, Clone, Default)]
pub struct RemoteRequestCriteria {
    pub job_id: Option<JobId>,
    pub request_type: Option<RemoteRequestType>,
    pub states: Vec<RequestState>,
}

impl RemoteRequestCriteria {
    pub fn for_job(job_id: &JobId) -> Self {
        Self {
            job_id: Some(job_id.clone()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, request_type: RemoteRequestType) -> Self {
        self.request_type = Some(request_type);
        self
    }

    pub fn in_states(mut self, states: &[RequestState]) -> Self {
        self.states = states.to_vec();
        self
    }

    pub fn matches(&self, request: &RemoteRequest) -> bool {
        self.job_id.as_ref().map_or(true, |id| *id == request.job_id)
            && self
                .request_type
                .map_or(true, |t| t == request.request_type)
            && (self.states.is_empty() || self.states.contains(&request.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_string_round_trip() {
        for request_type in RemoteRequestType::ALL {
            assert_eq!(
                request_type.as_str().parse::<RemoteRequestType>().unwrap(),
                request_type
            );
            let json = serde_json::to_string(&request_type).unwrap();
            assert_eq!(json, format!("\"{}\"", request_type.as_str()));
        }
    }

    #[test]
    fn test_only_retrievals_are_repeatable() {
        assert!(RemoteRequestType::MachineRetrieve.is_repeatable());
        assert!(RemoteRequestType::WorkerJobRetrieve.is_repeatable());
        assert!(!RemoteRequestType::MachineCreate.is_repeatable());
        assert!(!RemoteRequestType::MachineTerminate.is_repeatable());
        assert!(!RemoteRequestType::ResultsJobCreate.is_repeatable());
    }

    #[test]
    fn test_entity_mapping() {
        assert_eq!(
            RemoteRequestType::MachineTerminate.entity(),
            RemoteRequestEntity::Machine
        );
        assert_eq!(
            RemoteRequestType::SerializedSuiteRetrieve.entity(),
            RemoteRequestEntity::SerializedSuite
        );
    }

    #[test]
    fn test_blocks_redispatch() {
        let job_id = JobId::generate();
        let mut request = RemoteRequest::new(job_id, RemoteRequestType::MachineCreate, 0);
        assert!(request.blocks_redispatch());

        request.state = RequestState::Halted;
        assert!(request.blocks_redispatch());

        request.state = RequestState::Succeeded;
        assert!(request.blocks_redispatch());

        request.state = RequestState::Failed;
        assert!(!request.blocks_redispatch());

        request.state = RequestState::Aborted;
        assert!(!request.blocks_redispatch());
    }

    #[test]
    fn test_criteria_matching() {
        let job_id = JobId::generate();
        let mut request = RemoteRequest::new(job_id.clone(), RemoteRequestType::MachineCreate, 0);
        request.state = RequestState::Failed;

        assert!(RemoteRequestCriteria::for_job(&job_id).matches(&request));
        assert!(RemoteRequestCriteria::for_job(&job_id)
            .with_type(RemoteRequestType::MachineCreate)
            .in_states(&[RequestState::Failed, RequestState::Aborted])
            .matches(&request));
        assert!(!RemoteRequestCriteria::for_job(&job_id)
            .in_states(&[RequestState::Succeeded])
            .matches(&request));
        assert!(!RemoteRequestCriteria::for_job(&JobId::generate()).matches(&request));
    }
}

//! # Remote Service Clients
//!
//! Interfaces of the four services a job is provisioned across. Concrete
//! HTTP implementations live outside this crate; the orchestration core only
//! sees these traits.
//!
//! Every method returns `anyhow::Result` so that transport and protocol
//! errors keep their concrete type ([`NetworkError`], [`HttpError`]) for the
//! failure classifier.

pub mod errors;

pub use errors::{HttpError, NetworkError, NetworkErrorKind};

use crate::models::{
    JobId, MachineActionFailure, MachineStateCategory, ResultsJobState, SerializedSuiteState,
    WorkerComponentName,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type ClientResult<T> = anyhow::Result<T>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsJobCreation {
    pub token: String,
}

#[async_trait]
pub trait ResultsClient: Send + Sync {
    async fn create_job(
        &self,
        auth_token: &str,
        job_id: &JobId,
    ) -> ClientResult<ResultsJobCreation>;

    async fn get_job_state(
        &self,
        auth_token: &str,
        job_id: &JobId,
    ) -> ClientResult<ResultsJobState>;
}

/// Serialized suite as reported by the sources service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSerializedSuite {
    pub id: String,
    pub state: SerializedSuiteState,
    pub failure_reason: Option<String>,
    pub failure_message: Option<String>,
}

#[async_trait]
pub trait SourcesClient: Send + Sync {
    async fn create_serialized_suite(
        &self,
        auth_token: &str,
        job_id: &JobId,
        suite_id: &str,
        parameters: &BTreeMap<String, String>,
    ) -> ClientResult<RemoteSerializedSuite>;

    /// Serialized suite content, once prepared
    async fn read_serialized_suite(
        &self,
        auth_token: &str,
        serialized_suite_id: &str,
    ) -> ClientResult<String>;

    async fn get_serialized_suite(
        &self,
        auth_token: &str,
        serialized_suite_id: &str,
    ) -> ClientResult<RemoteSerializedSuite>;
}

/// Machine as reported by the machine manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMachine {
    pub id: String,
    pub state: String,
    pub state_category: MachineStateCategory,
    pub ip_addresses: Vec<String>,
    pub action_failure: Option<MachineActionFailure>,
    pub has_end_state: bool,
}

#[async_trait]
pub trait MachineClient: Send + Sync {
    async fn create_machine(&self, auth_token: &str, job_id: &JobId) -> ClientResult<RemoteMachine>;

    async fn get_machine(&self, auth_token: &str, machine_id: &str) -> ClientResult<RemoteMachine>;

    async fn delete_machine(
        &self,
        auth_token: &str,
        machine_id: &str,
    ) -> ClientResult<RemoteMachine>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerJobRequest {
    pub job_id: JobId,
    pub results_token: String,
    pub maximum_duration_in_seconds: u32,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerComponentStatus {
    pub state: String,
    pub is_end_state: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationState {
    pub state: String,
    pub is_end_state: bool,
    pub components: BTreeMap<WorkerComponentName, WorkerComponentStatus>,
}

/// Worker runtime on a machine, addressed by IP
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn create_job(&self, ip_address: &str, request: &WorkerJobRequest) -> ClientResult<()>;

    async fn get_application_state(&self, ip_address: &str) -> ClientResult<ApplicationState>;
}

/// Client bundle handed to the message handlers
#[derive(Clone)]
pub struct RemoteClients {
    pub results: Arc<dyn ResultsClient>,
    pub sources: Arc<dyn SourcesClient>,
    pub machines: Arc<dyn MachineClient>,
    pub workers: Arc<dyn WorkerClient>,
}

//! # Models
//!
//! Jobs, the remote-request ledger rows, classified failures and the per-job
//! component entities mirrored from the remote services.

pub mod job;
pub mod machine;
pub mod preparation_state;
pub mod remote_request;
pub mod remote_request_failure;
pub mod results_job;
pub mod serialized_suite;
pub mod worker_state;

pub use job::{ComponentRequestState, Job, JobId};
pub use machine::{Machine, MachineActionFailure, MachineStateCategory};
pub use preparation_state::PreparationState;
pub use remote_request::{
    RemoteRequest, RemoteRequestAction, RemoteRequestCriteria, RemoteRequestEntity,
    RemoteRequestKey, RemoteRequestType,
};
pub use remote_request_failure::{FailureRecord, FailureType, RemoteRequestFailure};
pub use results_job::{ResultsJob, ResultsJobMetaState, ResultsJobState};
pub use serialized_suite::{SerializedSuite, SerializedSuiteState};
pub use worker_state::{WorkerComponentName, WorkerComponentState, WorkerState};

/// Per-job component mirrored from a remote service.
///
/// Existence of the row means the component has been created at least once.
pub trait ComponentEntity: Clone + Send + Sync + 'static {
    fn job_id(&self) -> &JobId;

    /// Component reached a state it will not leave
    fn has_end_state(&self) -> bool;
}

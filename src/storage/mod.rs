//! # Storage Ports
//!
//! One repository trait per persisted entity. The orchestration core only
//! needs point lookups by `(job_id[, type[, index]])` and predicate counts,
//! so every backend stays small.
//!
//! Two backends ship with the crate:
//!
//! - [`memory`]: `dashmap`-backed, used by tests and embedded setups
//! - [`postgres`]: `sqlx` over PostgreSQL with the schema in `migrations/`
//!
//! The `(job_id, type, index)` uniqueness of remote requests is enforced by
//! [`RemoteRequestRepository::insert`] in both backends; it is what serializes
//! concurrent dispatches of the same non-repeatable action.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::models::{
    ComponentEntity, ComponentRequestState, FailureRecord, Job, JobId, Machine, RemoteRequest,
    RemoteRequestCriteria, RemoteRequestEntity, RemoteRequestFailure, RemoteRequestKey,
    RemoteRequestType, ResultsJob, SerializedSuite, WorkerComponentState, WorkerState,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find(&self, job_id: &JobId) -> StorageResult<Option<Job>>;

    async fn save(&self, job: &Job) -> StorageResult<()>;

    /// Returns whether a job was removed
    async fn remove(&self, job_id: &JobId) -> StorageResult<bool>;

    /// Update one component's request state; no-op when the job is gone
    async fn set_request_state(
        &self,
        job_id: &JobId,
        entity: RemoteRequestEntity,
        state: ComponentRequestState,
    ) -> StorageResult<()>;
}

#[async_trait]
pub trait RemoteRequestRepository: Send + Sync {
    /// Insert a new attempt. Fails with [`StorageError::Conflict`] when the
    /// `(job_id, type, index)` key is taken.
    async fn insert(&self, request: &RemoteRequest) -> StorageResult<()>;

    /// Update an existing attempt in place
    async fn save(&self, request: &RemoteRequest) -> StorageResult<()>;

    async fn find(&self, key: &RemoteRequestKey) -> StorageResult<Option<RemoteRequest>>;

    /// Attempt with the highest index for `(job_id, type)`
    async fn find_newest(
        &self,
        job_id: &JobId,
        request_type: RemoteRequestType,
    ) -> StorageResult<Option<RemoteRequest>>;

    async fn largest_index(
        &self,
        job_id: &JobId,
        request_type: RemoteRequestType,
    ) -> StorageResult<Option<u32>>;

    async fn count(&self, criteria: &RemoteRequestCriteria) -> StorageResult<u64>;

    /// All attempts for a job ordered by type then index
    async fn find_for_job(&self, job_id: &JobId) -> StorageResult<Vec<RemoteRequest>>;

    async fn remove(&self, key: &RemoteRequestKey) -> StorageResult<bool>;

    async fn count_referencing_failure(&self, failure_id: &str) -> StorageResult<u64>;
}

#[async_trait]
pub trait RemoteRequestFailureRepository: Send + Sync {
    /// Stored failure for `record`, inserting it only if no row with the same
    /// content address exists yet
    async fn find_or_create(&self, record: &FailureRecord) -> StorageResult<RemoteRequestFailure>;

    async fn find(&self, id: &str) -> StorageResult<Option<RemoteRequestFailure>>;

    async fn remove(&self, id: &str) -> StorageResult<bool>;
}

/// Per-job component row, keyed by job id
#[async_trait]
pub trait ComponentRepository<T: ComponentEntity>: Send + Sync {
    async fn find(&self, job_id: &JobId) -> StorageResult<Option<T>>;

    async fn save(&self, entity: &T) -> StorageResult<()>;

    async fn remove(&self, job_id: &JobId) -> StorageResult<bool>;
}

#[async_trait]
pub trait WorkerComponentStateRepository: Send + Sync {
    async fn find_for_job(&self, job_id: &JobId) -> StorageResult<Vec<WorkerComponentState>>;

    async fn save(&self, state: &WorkerComponentState) -> StorageResult<()>;

    async fn remove_for_job(&self, job_id: &JobId) -> StorageResult<u64>;
}

/// Every repository the coordinator uses, behind trait objects
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobRepository>,
    pub remote_requests: Arc<dyn RemoteRequestRepository>,
    pub failures: Arc<dyn RemoteRequestFailureRepository>,
    pub results_jobs: Arc<dyn ComponentRepository<ResultsJob>>,
    pub serialized_suites: Arc<dyn ComponentRepository<SerializedSuite>>,
    pub machines: Arc<dyn ComponentRepository<Machine>>,
    pub worker_states: Arc<dyn ComponentRepository<WorkerState>>,
    pub worker_component_states: Arc<dyn WorkerComponentStateRepository>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            jobs: Arc::new(memory::InMemoryJobRepository::default()),
            remote_requests: Arc::new(memory::InMemoryRemoteRequestRepository::default()),
            failures: Arc::new(memory::InMemoryFailureRepository::default()),
            results_jobs: Arc::new(memory::InMemoryComponentRepository::<ResultsJob>::default()),
            serialized_suites: Arc::new(
                memory::InMemoryComponentRepository::<SerializedSuite>::default(),
            ),
            machines: Arc::new(memory::InMemoryComponentRepository::<Machine>::default()),
            worker_states: Arc::new(memory::InMemoryComponentRepository::<WorkerState>::default()),
            worker_component_states: Arc::new(
                memory::InMemoryWorkerComponentStateRepository::default(),
            ),
        }
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let storage = Arc::new(postgres::PostgresStorage::new(pool));
        Self {
            jobs: storage.clone(),
            remote_requests: storage.clone(),
            failures: storage.clone(),
            results_jobs: storage.clone(),
            serialized_suites: storage.clone(),
            machines: storage.clone(),
            worker_states: storage.clone(),
            worker_component_states: storage,
        }
    }
}

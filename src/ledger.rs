//! # Remote Request Ledger
//!
//! Durable record of every attempt to perform a remote action for a job.
//!
//! All state changes go through [`RemoteRequestLedger::transition`], which
//! routes them through [`RemoteRequestStateMachine`]. An illegal transition is
//! a no-op, so callers always look at the returned row rather than assuming
//! the requested state was reached.
//!
//! Failures are content addressed and shared between attempts. A failure row
//! is removed only once the last attempt referencing it is gone.

use crate::logging::log_remote_request_operation;
use crate::models::{
    FailureRecord, JobId, RemoteRequest, RemoteRequestCriteria, RemoteRequestFailure,
    RemoteRequestKey, RemoteRequestType,
};
use crate::state_machine::{RemoteRequestStateMachine, RequestEvent};
use crate::storage::{
    RemoteRequestFailureRepository, RemoteRequestRepository, StorageResult, Stores,
};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct RemoteRequestLedger {
    requests: Arc<dyn RemoteRequestRepository>,
    failures: Arc<dyn RemoteRequestFailureRepository>,
}

impl RemoteRequestLedger {
    pub fn new(
        requests: Arc<dyn RemoteRequestRepository>,
        failures: Arc<dyn RemoteRequestFailureRepository>,
    ) -> Self {
        Self { requests, failures }
    }

    pub fn from_stores(stores: &Stores) -> Self {
        Self::new(stores.remote_requests.clone(), stores.failures.clone())
    }

    /// Insert a new attempt; a taken key surfaces as `StorageError::Conflict`
    pub async fn create(&self, request: &RemoteRequest) -> StorageResult<()> {
        self.requests.insert(request).await?;
        log_remote_request_operation("create", &request.key(), Some(request.state), None);
        Ok(())
    }

    pub async fn save(&self, request: &RemoteRequest) -> StorageResult<()> {
        self.requests.save(request).await
    }

    pub async fn find(&self, key: &RemoteRequestKey) -> StorageResult<Option<RemoteRequest>> {
        self.requests.find(key).await
    }

    pub async fn find_newest(
        &self,
        job_id: &JobId,
        request_type: RemoteRequestType,
    ) -> StorageResult<Option<RemoteRequest>> {
        self.requests.find_newest(job_id, request_type).await
    }

    pub async fn largest_index(
        &self,
        job_id: &JobId,
        request_type: RemoteRequestType,
    ) -> StorageResult<Option<u32>> {
        self.requests.largest_index(job_id, request_type).await
    }

    /// Index the next attempt for `(job_id, type)` will use
    pub async fn next_index(
        &self,
        job_id: &JobId,
        request_type: RemoteRequestType,
    ) -> StorageResult<u32> {
        Ok(self
            .largest_index(job_id, request_type)
            .await?
            .map_or(0, |index| index + 1))
    }

    pub async fn count(&self, criteria: &RemoteRequestCriteria) -> StorageResult<u64> {
        self.requests.count(criteria).await
    }

    pub async fn find_for_job(&self, job_id: &JobId) -> StorageResult<Vec<RemoteRequest>> {
        self.requests.find_for_job(job_id).await
    }

    pub async fn find_failure(
        &self,
        failure_id: &str,
    ) -> StorageResult<Option<RemoteRequestFailure>> {
        self.failures.find(failure_id).await
    }

    /// Apply `event` to the attempt at `key` and return the row as stored
    /// afterwards. `None` when the attempt does not exist.
    pub async fn transition(
        &self,
        key: &RemoteRequestKey,
        event: RequestEvent,
    ) -> StorageResult<Option<RemoteRequest>> {
        let Some(mut request) = self.requests.find(key).await? else {
            debug!(key = %key, event = event.event_type(), "Transition on missing remote request");
            return Ok(None);
        };

        if RemoteRequestStateMachine::apply(&mut request, event) {
            self.requests.save(&request).await?;
            log_remote_request_operation(event.event_type(), key, Some(request.state), None);
        }

        Ok(Some(request))
    }

    /// Attach a classified failure to the attempt at `key`. Identical failures
    /// resolve to the same stored row.
    pub async fn record_failure(
        &self,
        key: &RemoteRequestKey,
        record: &FailureRecord,
    ) -> StorageResult<RemoteRequestFailure> {
        let failure = self.failures.find_or_create(record).await?;

        if let Some(mut request) = self.requests.find(key).await? {
            let previous = request.failure_id.replace(failure.id.clone());
            self.requests.save(&request).await?;

            if let Some(previous) = previous.filter(|previous| *previous != failure.id) {
                self.remove_failure_if_unreferenced(&previous).await?;
            }

            log_remote_request_operation(
                "record_failure",
                key,
                Some(request.state),
                Some(&format!("{} {}", failure.failure_type, failure.code)),
            );
        }

        Ok(failure)
    }

    /// Remove an attempt and, when nothing else points at it, its failure
    pub async fn remove(&self, key: &RemoteRequestKey) -> StorageResult<bool> {
        let Some(request) = self.requests.find(key).await? else {
            return Ok(false);
        };

        let removed = self.requests.remove(key).await?;
        if let Some(failure_id) = request.failure_id.as_deref() {
            self.remove_failure_if_unreferenced(failure_id).await?;
        }

        if removed {
            log_remote_request_operation("remove", key, Some(request.state), None);
        }
        Ok(removed)
    }

    /// Remove every attempt of a job; returns how many were removed
    pub async fn remove_for_job(&self, job_id: &JobId) -> StorageResult<usize> {
        let mut removed = 0;
        for request in self.requests.find_for_job(job_id).await? {
            if self.remove(&request.key()).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn remove_failure_if_unreferenced(&self, failure_id: &str) -> StorageResult<()> {
        if self.requests.count_referencing_failure(failure_id).await? == 0 {
            self.failures.remove(failure_id).await?;
            debug!(failure_id = failure_id, "Removed unreferenced remote request failure");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureType;
    use crate::state_machine::RequestState;

    fn ledger() -> RemoteRequestLedger {
        RemoteRequestLedger::from_stores(&Stores::in_memory())
    }

    #[tokio::test]
    async fn test_transition_follows_legal_edges_only() {
        let ledger = ledger();
        let request = RemoteRequest::new(JobId::generate(), RemoteRequestType::MachineCreate, 0);
        ledger.create(&request).await.unwrap();
        let key = request.key();

        let begun = ledger.transition(&key, RequestEvent::Begin).await.unwrap().unwrap();
        assert_eq!(begun.state, RequestState::Requesting);

        let succeeded = ledger.transition(&key, RequestEvent::Succeed).await.unwrap().unwrap();
        assert_eq!(succeeded.state, RequestState::Succeeded);

        let unchanged = ledger.transition(&key, RequestEvent::Fail).await.unwrap().unwrap();
        assert_eq!(unchanged.state, RequestState::Succeeded);
        assert_eq!(
            ledger.find(&key).await.unwrap().unwrap().state,
            RequestState::Succeeded
        );
    }

    #[tokio::test]
    async fn test_transition_on_missing_request_is_none() {
        let key = RemoteRequestKey::new(JobId::generate(), RemoteRequestType::MachineCreate, 0);
        assert!(ledger().transition(&key, RequestEvent::Begin).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shared_failure_survives_until_last_reference_removed() {
        let ledger = ledger();
        let job_id = JobId::generate();
        let record =
            FailureRecord::new(FailureType::Http, 500, Some("Internal Server Error".into()));

        let first = RemoteRequest::new(job_id.clone(), RemoteRequestType::MachineCreate, 0);
        let second = RemoteRequest::new(job_id.clone(), RemoteRequestType::MachineCreate, 1);
        ledger.create(&first).await.unwrap();
        ledger.create(&second).await.unwrap();

        let a = ledger.record_failure(&first.key(), &record).await.unwrap();
        let b = ledger.record_failure(&second.key(), &record).await.unwrap();
        assert_eq!(a.id, b.id);

        assert!(ledger.remove(&first.key()).await.unwrap());
        assert!(ledger.find_failure(&a.id).await.unwrap().is_some());

        assert!(ledger.remove(&second.key()).await.unwrap());
        assert!(ledger.find_failure(&a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_index_is_monotonic() {
        let ledger = ledger();
        let job_id = JobId::generate();
        assert_eq!(
            ledger
                .next_index(&job_id, RemoteRequestType::MachineRetrieve)
                .await
                .unwrap(),
            0
        );

        ledger
            .create(&RemoteRequest::new(job_id.clone(), RemoteRequestType::MachineRetrieve, 0))
            .await
            .unwrap();
        assert_eq!(
            ledger
                .next_index(&job_id, RemoteRequestType::MachineRetrieve)
                .await
                .unwrap(),
            1
        );
    }
}

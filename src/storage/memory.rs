//! In-memory repositories.
//!
//! Remote requests are grouped per `(job_id, type)` in a `BTreeMap` keyed by
//! index, so "newest" and "largest index" are the last entry and the
//! uniqueness check happens under the dashmap shard lock.

use super::{
    ComponentRepository, JobRepository, RemoteRequestFailureRepository, RemoteRequestRepository,
    StorageError, StorageResult, WorkerComponentStateRepository,
};
use crate::models::{
    ComponentEntity, ComponentRequestState, FailureRecord, Job, JobId, RemoteRequest,
    RemoteRequestCriteria, RemoteRequestEntity, RemoteRequestFailure, RemoteRequestKey,
    RemoteRequestType, WorkerComponentName, WorkerComponentState,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    jobs: DashMap<JobId, Job>,
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find(&self, job_id: &JobId) -> StorageResult<Option<Job>> {
        Ok(self.jobs.get(job_id).map(|job| job.clone()))
    }

    async fn save(&self, job: &Job) -> StorageResult<()> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> StorageResult<bool> {
        Ok(self.jobs.remove(job_id).is_some())
    }

    async fn set_request_state(
        &self,
        job_id: &JobId,
        entity: RemoteRequestEntity,
        state: ComponentRequestState,
    ) -> StorageResult<()> {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            job.set_request_state(entity, state);
        }
        Ok(())
    }
}

type RequestGroupKey = (JobId, RemoteRequestType);

#[derive(Debug, Default)]
pub struct InMemoryRemoteRequestRepository {
    requests: DashMap<RequestGroupKey, BTreeMap<u32, RemoteRequest>>,
}

#[async_trait]
impl RemoteRequestRepository for InMemoryRemoteRequestRepository {
    async fn insert(&self, request: &RemoteRequest) -> StorageResult<()> {
        let mut group = self
            .requests
            .entry((request.job_id.clone(), request.request_type))
            .or_default();

        if group.contains_key(&request.index) {
            return Err(StorageError::Conflict(format!(
                "remote request {} already exists",
                request.key()
            )));
        }

        group.insert(request.index, request.clone());
        Ok(())
    }

    async fn save(&self, request: &RemoteRequest) -> StorageResult<()> {
        self.requests
            .entry((request.job_id.clone(), request.request_type))
            .or_default()
            .insert(request.index, request.clone());
        Ok(())
    }

    async fn find(&self, key: &RemoteRequestKey) -> StorageResult<Option<RemoteRequest>> {
        Ok(self
            .requests
            .get(&(key.job_id.clone(), key.request_type))
            .and_then(|group| group.get(&key.index).cloned()))
    }

    async fn find_newest(
        &self,
        job_id: &JobId,
        request_type: RemoteRequestType,
    ) -> StorageResult<Option<RemoteRequest>> {
        Ok(self
            .requests
            .get(&(job_id.clone(), request_type))
            .and_then(|group| group.values().next_back().cloned()))
    }

    async fn largest_index(
        &self,
        job_id: &JobId,
        request_type: RemoteRequestType,
    ) -> StorageResult<Option<u32>> {
        Ok(self
            .requests
            .get(&(job_id.clone(), request_type))
            .and_then(|group| group.keys().next_back().copied()))
    }

    async fn count(&self, criteria: &RemoteRequestCriteria) -> StorageResult<u64> {
        let count = self
            .requests
            .iter()
            .map(|group| {
                group
                    .values()
                    .filter(|request| criteria.matches(request))
                    .count()
            })
            .sum::<usize>();
        Ok(count as u64)
    }

    async fn find_for_job(&self, job_id: &JobId) -> StorageResult<Vec<RemoteRequest>> {
        let mut requests: Vec<RemoteRequest> = self
            .requests
            .iter()
            .filter(|group| group.key().0 == *job_id)
            .flat_map(|group| group.values().cloned().collect::<Vec<_>>())
            .collect();
        requests.sort_by(|a, b| {
            a.request_type
                .cmp(&b.request_type)
                .then(a.index.cmp(&b.index))
        });
        Ok(requests)
    }

    async fn remove(&self, key: &RemoteRequestKey) -> StorageResult<bool> {
        Ok(self
            .requests
            .get_mut(&(key.job_id.clone(), key.request_type))
            .map(|mut group| group.remove(&key.index).is_some())
            .unwrap_or(false))
    }

    async fn count_referencing_failure(&self, failure_id: &str) -> StorageResult<u64> {
        let count = self
            .requests
            .iter()
            .map(|group| {
                group
                    .values()
                    .filter(|request| request.failure_id.as_deref() == Some(failure_id))
                    .count()
            })
            .sum::<usize>();
        Ok(count as u64)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFailureRepository {
    failures: DashMap<String, RemoteRequestFailure>,
}

#[async_trait]
impl RemoteRequestFailureRepository for InMemoryFailureRepository {
    async fn find_or_create(&self, record: &FailureRecord) -> StorageResult<RemoteRequestFailure> {
        let failure = RemoteRequestFailure::from(record.clone());
        let stored = match self.failures.entry(failure.id.clone()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => slot.insert(failure).clone(),
        };
        Ok(stored)
    }

    async fn find(&self, id: &str) -> StorageResult<Option<RemoteRequestFailure>> {
        Ok(self.failures.get(id).map(|failure| failure.clone()))
    }

    async fn remove(&self, id: &str) -> StorageResult<bool> {
        Ok(self.failures.remove(id).is_some())
    }
}

#[derive(Debug)]
pub struct InMemoryComponentRepository<T> {
    entities: DashMap<JobId, T>,
}

impl<T> Default for InMemoryComponentRepository<T> {
    fn default() -> Self {
        Self {
            entities: DashMap::new(),
        }
    }
}

#[async_trait]
impl<T: ComponentEntity> ComponentRepository<T> for InMemoryComponentRepository<T> {
    async fn find(&self, job_id: &JobId) -> StorageResult<Option<T>> {
        Ok(self.entities.get(job_id).map(|entity| entity.clone()))
    }

    async fn save(&self, entity: &T) -> StorageResult<()> {
        self.entities.insert(entity.job_id().clone(), entity.clone());
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> StorageResult<bool> {
        Ok(self.entities.remove(job_id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryWorkerComponentStateRepository {
    states: DashMap<(JobId, WorkerComponentName), WorkerComponentState>,
}

#[async_trait]
impl WorkerComponentStateRepository for InMemoryWorkerComponentStateRepository {
    async fn find_for_job(&self, job_id: &JobId) -> StorageResult<Vec<WorkerComponentState>> {
        let mut states: Vec<WorkerComponentState> = self
            .states
            .iter()
            .filter(|entry| entry.key().0 == *job_id)
            .map(|entry| entry.value().clone())
            .collect();
        states.sort_by_key(|state| state.component_name);
        Ok(states)
    }

    async fn save(&self, state: &WorkerComponentState) -> StorageResult<()> {
        self.states
            .insert((state.job_id.clone(), state.component_name), state.clone());
        Ok(())
    }

    async fn remove_for_job(&self, job_id: &JobId) -> StorageResult<u64> {
        let mut removed = 0u64;
        self.states.retain(|key, _| {
            let keep = key.0 != *job_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::RequestState;

    #[tokio::test]
    async fn test_insert_rejects_taken_index() {
        let repository = InMemoryRemoteRequestRepository::default();
        let request = RemoteRequest::new(JobId::generate(), RemoteRequestType::MachineCreate, 0);

        repository.insert(&request).await.unwrap();
        let result = repository.insert(&request).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_newest_orders_by_index() {
        let repository = InMemoryRemoteRequestRepository::default();
        let job_id = JobId::generate();

        for index in [1, 0, 2] {
            let mut request =
                RemoteRequest::new(job_id.clone(), RemoteRequestType::MachineRetrieve, index);
            request.state = RequestState::Succeeded;
            repository.insert(&request).await.unwrap();
        }

        let newest = repository
            .find_newest(&job_id, RemoteRequestType::MachineRetrieve)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(newest.index, 2);
        assert_eq!(
            repository
                .largest_index(&job_id, RemoteRequestType::MachineRetrieve)
                .await
                .unwrap(),
            Some(2)
        );
        assert_eq!(
            repository
                .largest_index(&job_id, RemoteRequestType::MachineCreate)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_count_by_criteria() {
        let repository = InMemoryRemoteRequestRepository::default();
        let job_id = JobId::generate();

        let mut failed = RemoteRequest::new(job_id.clone(), RemoteRequestType::MachineCreate, 0);
        failed.state = RequestState::Failed;
        let requesting = RemoteRequest::new(job_id.clone(), RemoteRequestType::MachineCreate, 1);
        let other_job = RemoteRequest::new(JobId::generate(), RemoteRequestType::MachineCreate, 0);

        for request in [&failed, &requesting, &other_job] {
            repository.insert(request).await.unwrap();
        }

        let criteria = RemoteRequestCriteria::for_job(&job_id);
        assert_eq!(repository.count(&criteria).await.unwrap(), 2);
        assert_eq!(
            repository
                .count(&criteria.in_states(&[RequestState::Failed]))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            repository
                .count(&RemoteRequestCriteria::default())
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_worker_state_removal_counts_only_that_job() {
        let repository = InMemoryWorkerComponentStateRepository::default();
        let job_id = JobId::generate();
        let other_job = JobId::generate();

        for (job, component_name) in [
            (&job_id, WorkerComponentName::Compilation),
            (&job_id, WorkerComponentName::Execution),
            (&other_job, WorkerComponentName::Compilation),
        ] {
            let state = WorkerComponentState {
                job_id: job.clone(),
                component_name,
                state: "running".to_string(),
                is_end_state: false,
            };
            repository.save(&state).await.unwrap();
        }

        assert_eq!(repository.remove_for_job(&job_id).await.unwrap(), 2);
        assert_eq!(repository.remove_for_job(&job_id).await.unwrap(), 0);
        assert_eq!(repository.find_for_job(&other_job).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_find_or_create_deduplicates() {
        let repository = InMemoryFailureRepository::default();
        let record = FailureRecord::new(
            crate::models::FailureType::Network,
            7,
            Some("connection refused".to_string()),
        );

        let first = repository.find_or_create(&record).await.unwrap();
        let second = repository.find_or_create(&record).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repository.failures.len(), 1);
    }
}

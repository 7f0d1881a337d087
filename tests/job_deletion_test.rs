//! Deleting a job while its requests are still in flight.

mod common;

use common::*;
use job_coordinator::models::RemoteRequestType;
use job_coordinator::{CoordinatorError, RequestState};

#[tokio::test]
async fn test_in_flight_requests_abort_after_deletion() {
    let mut harness = Harness::new();
    let job_id = harness.create_job().await;

    let observed = &harness;
    let job = &job_id;
    harness
        .process_until(move || async move {
            observed
                .coordinator
                .stores()
                .results_jobs
                .find(job)
                .await
                .unwrap()
                .is_some()
        })
        .await;

    assert!(harness.coordinator.delete_job(&job_id).await.unwrap());
    harness.drain().await;

    let requests = harness.coordinator.ledger().find_for_job(&job_id).await.unwrap();
    assert!(requests.iter().all(|request| request.state.is_terminal()));
    assert!(requests
        .iter()
        .any(|request| request.state == RequestState::Aborted));

    assert_eq!(harness.services.calls_to("machines.create_machine"), 0);
    assert!(harness.event_names().contains(&"remote_request.aborted"));
    assert!(matches!(
        harness.coordinator.status(&job_id).await,
        Err(CoordinatorError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_deleting_twice_reports_nothing_removed() {
    let harness = Harness::new();
    let job_id = harness.create_job().await;

    assert!(harness.coordinator.delete_job(&job_id).await.unwrap());
    assert!(!harness.coordinator.delete_job(&job_id).await.unwrap());
}

#[tokio::test]
async fn test_purge_removes_the_ledger_rows() {
    let services = FakeServices::new();
    services.end_results_job();
    let harness = Harness::with_services(test_config(), services);
    let job_id = harness.create_job().await;
    harness.drain().await;

    let attempts = harness
        .attempts(&job_id, RemoteRequestType::ResultsJobCreate)
        .await;
    assert_eq!(attempts.len(), 1);

    assert!(harness.coordinator.purge_job(&job_id).await.unwrap());

    assert!(harness
        .coordinator
        .ledger()
        .find_for_job(&job_id)
        .await
        .unwrap()
        .is_empty());
    assert!(harness
        .coordinator
        .stores()
        .machines
        .find(&job_id)
        .await
        .unwrap()
        .is_none());
    assert!(harness
        .coordinator
        .stores()
        .worker_component_states
        .find_for_job(&job_id)
        .await
        .unwrap()
        .is_empty());
}

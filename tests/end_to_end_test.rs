//! Full provisioning runs against the scripted services.

mod common;

use common::*;
use job_coordinator::models::{
    ComponentRequestState, MachineActionFailure, MachineStateCategory, RemoteRequestEntity,
    RemoteRequestType, SerializedSuiteState,
};
use job_coordinator::{PreparationState, RequestState};

#[tokio::test]
async fn test_job_is_provisioned_and_machine_terminated_once() {
    let mut harness = Harness::new();
    let job_id = harness.create_job().await;

    harness.drain().await;

    let services = &harness.services;
    assert_eq!(services.calls_to("results.create_job"), 1);
    assert_eq!(services.calls_to("sources.create_serialized_suite"), 1);
    assert_eq!(services.calls_to("machines.create_machine"), 1);
    assert_eq!(services.calls_to("sources.read_serialized_suite"), 1);
    assert_eq!(services.calls_to("workers.create_job"), 1);
    assert_eq!(services.calls_to("machines.delete_machine"), 1);

    let requests = services.worker_requests();
    let (ip_address, request) = &requests[0];
    assert_eq!(ip_address, MACHINE_IP);
    assert_eq!(request.job_id, job_id);
    assert_eq!(request.results_token, RESULTS_TOKEN);
    assert_eq!(request.source, SUITE_SOURCE);
    assert_eq!(request.maximum_duration_in_seconds, 1800);

    let terminations = harness
        .attempts(&job_id, RemoteRequestType::MachineTerminate)
        .await;
    assert_eq!(terminations.len(), 1);
    assert_eq!(terminations[0].state, RequestState::Succeeded);

    let status = harness.coordinator.status(&job_id).await.unwrap();
    assert_eq!(status.preparation_state, PreparationState::Succeeded);
    assert!(status.results_job.as_ref().unwrap().meta_state.ended);
    assert_eq!(
        status.serialized_suite.as_ref().unwrap().state,
        SerializedSuiteState::Prepared
    );
    assert_eq!(
        status.machine.as_ref().unwrap().state_category,
        MachineStateCategory::End
    );
    assert!(status.worker_state.as_ref().unwrap().is_end_state);
    assert_eq!(status.worker_components.len(), 3);

    let names = harness.event_names();
    for expected in [
        "job.created",
        "results_job.created",
        "serialized_suite.created",
        "serialized_suite.prepared",
        "machine.creation_requested",
        "machine.is_active",
        "worker_job.started",
        "machine.termination_requested",
    ] {
        assert!(names.contains(&expected), "missing event {expected}");
    }
    assert_eq!(
        names
            .iter()
            .filter(|name| **name == "machine.is_active")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_every_attempt_ends_terminal() {
    let harness = Harness::new();
    let job_id = harness.create_job().await;

    harness.drain().await;

    let requests = harness.coordinator.ledger().find_for_job(&job_id).await.unwrap();
    assert!(!requests.is_empty());
    assert!(requests.iter().all(|request| request.state.is_terminal()));

    for request_type in [
        RemoteRequestType::ResultsJobCreate,
        RemoteRequestType::SerializedSuiteCreate,
        RemoteRequestType::MachineCreate,
        RemoteRequestType::WorkerJobCreate,
    ] {
        let attempts = harness.attempts(&job_id, request_type).await;
        assert_eq!(attempts.len(), 1, "{request_type} attempted more than once");
        assert_eq!(attempts[0].state, RequestState::Succeeded);
    }

    let polls = harness
        .attempts(&job_id, RemoteRequestType::MachineRetrieve)
        .await;
    let indexes: Vec<u32> = polls.iter().map(|poll| poll.index).collect();
    let expected: Vec<u32> = (0..polls.len() as u32).collect();
    assert_eq!(indexes, expected);
}

#[tokio::test]
async fn test_remote_calls_carry_the_users_credential() {
    let harness = Harness::new();
    harness.create_job().await;

    harness.drain().await;

    for operation in [
        "results.create_job",
        "results.get_job_state",
        "sources.create_serialized_suite",
        "sources.get_serialized_suite",
        "sources.read_serialized_suite",
        "machines.create_machine",
        "machines.get_machine",
        "machines.delete_machine",
    ] {
        assert_eq!(
            harness.services.tokens_sent_to(operation),
            vec![AUTH_TOKEN.to_string()],
            "{operation} sent the wrong credential"
        );
    }
}

#[tokio::test]
async fn test_failed_suite_never_requests_a_machine() {
    let services = FakeServices::new();
    services.fail_suite_preparation();
    services.end_results_job();
    let harness = Harness::with_services(test_config(), services);
    let job_id = harness.create_job().await;

    harness.drain().await;

    assert_eq!(harness.services.calls_to("machines.create_machine"), 0);
    assert_eq!(harness.services.calls_to("workers.create_job"), 0);

    let machine_creations = harness
        .attempts(&job_id, RemoteRequestType::MachineCreate)
        .await;
    assert!(machine_creations
        .iter()
        .all(|request| request.state == RequestState::Aborted));

    let status = harness.coordinator.status(&job_id).await.unwrap();
    assert_eq!(status.preparation_state, PreparationState::Failed);
    let suite = status
        .component(RemoteRequestEntity::SerializedSuite)
        .unwrap();
    assert_eq!(suite.state, PreparationState::Failed);
    assert_eq!(suite.remote_failure.as_deref(), Some("compilation_failed"));
}

#[tokio::test]
async fn test_machine_action_failure_surfaces_in_status() {
    let services = FakeServices::new();
    services.end_results_job();
    services.report_machine_action_failure(MachineActionFailure {
        action: "find".to_string(),
        failure_type: "no_capacity".to_string(),
        context: None,
    });
    let mut harness = Harness::with_services(test_config(), services);
    let job_id = harness.create_job().await;

    let observed = &harness;
    let job = &job_id;
    harness
        .process_until(move || async move {
            observed
                .coordinator
                .stores()
                .machines
                .find(job)
                .await
                .unwrap()
                .is_some_and(|machine| machine.action_failure.is_some())
        })
        .await;

    let status = harness.coordinator.status(&job_id).await.unwrap();
    assert_eq!(status.preparation_state, PreparationState::Failed);
    let machine = status.component(RemoteRequestEntity::Machine).unwrap();
    assert_eq!(machine.state, PreparationState::Failed);
    assert_eq!(machine.request_state, ComponentRequestState::Succeeded);
    assert_eq!(machine.remote_failure.as_deref(), Some("find no_capacity"));
    assert!(harness.event_names().contains(&"machine.has_action_failure"));
}

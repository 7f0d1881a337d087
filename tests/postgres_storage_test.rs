//! PostgreSQL backends. These need a database reachable through
//! `DATABASE_URL`; run them with `cargo test -- --ignored`.

#![cfg(feature = "postgres")]

use job_coordinator::messaging::{
    Envelope, MessageBus, MessageKind, PostgresMessageBus, RemoteRequestMessage,
};
use job_coordinator::models::{
    ComponentRequestState, FailureRecord, FailureType, Job, JobId, RemoteRequest,
    RemoteRequestEntity, RemoteRequestType,
};
use job_coordinator::storage::StorageError;
use job_coordinator::{RemoteRequestLedger, RequestEvent, RequestState, Stores};
use sqlx::PgPool;
use std::time::Duration;

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_job_round_trip_with_request_states(pool: PgPool) {
    let stores = Stores::postgres(pool);
    let job = Job::new("user-1", "suite-1", 900);
    stores.jobs.save(&job).await.unwrap();

    stores
        .jobs
        .set_request_state(&job.id, RemoteRequestEntity::Machine, ComponentRequestState::Requesting)
        .await
        .unwrap();

    let loaded = stores.jobs.find(&job.id).await.unwrap().unwrap();
    assert_eq!(loaded.suite_id, "suite-1");
    assert_eq!(
        loaded.request_state(RemoteRequestEntity::Machine),
        ComponentRequestState::Requesting
    );
    assert_eq!(
        loaded.request_state(RemoteRequestEntity::ResultsJob),
        ComponentRequestState::Unknown
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_taken_index_is_a_conflict(pool: PgPool) {
    let stores = Stores::postgres(pool);
    let request = RemoteRequest::new(JobId::generate(), RemoteRequestType::MachineCreate, 0);

    stores.remote_requests.insert(&request).await.unwrap();
    let second = stores.remote_requests.insert(&request).await;

    assert!(matches!(second, Err(StorageError::Conflict(_))));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_ledger_shares_failures_and_tracks_state(pool: PgPool) {
    let ledger = RemoteRequestLedger::from_stores(&Stores::postgres(pool));
    let job_id = JobId::generate();
    let first = RemoteRequest::new(job_id.clone(), RemoteRequestType::MachineRetrieve, 0);
    let second = RemoteRequest::new(job_id.clone(), RemoteRequestType::MachineRetrieve, 1);
    ledger.create(&first).await.unwrap();
    ledger.create(&second).await.unwrap();

    ledger.transition(&first.key(), RequestEvent::Begin).await.unwrap();
    let halted = ledger
        .transition(&first.key(), RequestEvent::Halt)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(halted.state, RequestState::Halted);

    let record = FailureRecord::new(FailureType::Http, 503, Some("Service Unavailable".into()));
    let a = ledger.record_failure(&first.key(), &record).await.unwrap();
    let b = ledger.record_failure(&second.key(), &record).await.unwrap();
    assert_eq!(a.id, b.id);

    assert_eq!(
        ledger
            .next_index(&job_id, RemoteRequestType::MachineRetrieve)
            .await
            .unwrap(),
        2
    );

    assert_eq!(ledger.remove_for_job(&job_id).await.unwrap(), 2);
    assert!(ledger.find_failure(&a.id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_queue_delivers_acknowledges_and_redelivers(pool: PgPool) {
    let bus = PostgresMessageBus::new(
        pool,
        "remote_requests_test",
        Duration::from_millis(200),
        Duration::from_millis(20),
    );
    let message =
        RemoteRequestMessage::new(JobId::generate(), "token", MessageKind::ResultsJobCreate);
    bus.publish(Envelope::new(message.clone()), Duration::ZERO)
        .await
        .unwrap();

    let first = bus
        .receive(Duration::from_millis(500))
        .await
        .unwrap()
        .expect("published message should be visible");
    assert_eq!(first.envelope.message, message);
    assert_eq!(first.read_count, 1);

    let redelivered = bus
        .receive(Duration::from_secs(2))
        .await
        .unwrap()
        .expect("unacknowledged message should come back");
    assert_eq!(redelivered.read_count, 2);

    bus.acknowledge(&redelivered.receipt).await.unwrap();
    assert_eq!(bus.pending_count().await.unwrap(), 0);
}

//! Ledger behaviour over the in-memory stores.

use job_coordinator::models::{FailureRecord, FailureType, JobId, RemoteRequest, RemoteRequestType};
use job_coordinator::{RemoteRequestLedger, RequestEvent, RequestState, Stores};
use proptest::prelude::*;

fn ledger() -> RemoteRequestLedger {
    RemoteRequestLedger::from_stores(&Stores::in_memory())
}

#[tokio::test]
async fn test_replacing_a_failure_drops_the_orphaned_one() {
    let ledger = ledger();
    let request = RemoteRequest::new(JobId::generate(), RemoteRequestType::MachineRetrieve, 0);
    ledger.create(&request).await.unwrap();

    let throttled = FailureRecord::new(FailureType::Http, 503, Some("Service Unavailable".into()));
    let timeout = FailureRecord::new(FailureType::Network, 28, Some("operation timed out".into()));

    let first = ledger.record_failure(&request.key(), &throttled).await.unwrap();
    let second = ledger.record_failure(&request.key(), &timeout).await.unwrap();

    assert_ne!(first.id, second.id);
    assert!(ledger.find_failure(&first.id).await.unwrap().is_none());

    let stored = ledger.find(&request.key()).await.unwrap().unwrap();
    assert_eq!(stored.failure_id.as_deref(), Some(second.id.as_str()));
}

#[tokio::test]
async fn test_replacing_keeps_a_failure_other_attempts_reference() {
    let ledger = ledger();
    let job_id = JobId::generate();
    let first = RemoteRequest::new(job_id.clone(), RemoteRequestType::MachineRetrieve, 0);
    let second = RemoteRequest::new(job_id, RemoteRequestType::MachineRetrieve, 1);
    ledger.create(&first).await.unwrap();
    ledger.create(&second).await.unwrap();

    let shared = FailureRecord::new(FailureType::Http, 503, Some("Service Unavailable".into()));
    let shared_id = ledger.record_failure(&first.key(), &shared).await.unwrap().id;
    ledger.record_failure(&second.key(), &shared).await.unwrap();

    let other = FailureRecord::new(FailureType::Unknown, 0, Some("boom".into()));
    ledger.record_failure(&first.key(), &other).await.unwrap();

    assert!(ledger.find_failure(&shared_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_remove_for_job_leaves_other_jobs_alone() {
    let ledger = ledger();
    let doomed = JobId::generate();
    let kept = JobId::generate();
    for index in 0..3 {
        ledger
            .create(&RemoteRequest::new(doomed.clone(), RemoteRequestType::MachineRetrieve, index))
            .await
            .unwrap();
    }
    ledger
        .create(&RemoteRequest::new(kept.clone(), RemoteRequestType::MachineCreate, 0))
        .await
        .unwrap();

    assert_eq!(ledger.remove_for_job(&doomed).await.unwrap(), 3);
    assert!(ledger.find_for_job(&doomed).await.unwrap().is_empty());
    assert_eq!(ledger.find_for_job(&kept).await.unwrap().len(), 1);
}

fn any_event() -> impl Strategy<Value = RequestEvent> {
    prop_oneof![
        Just(RequestEvent::Begin),
        Just(RequestEvent::Succeed),
        Just(RequestEvent::Fail),
        Just(RequestEvent::Halt),
        Just(RequestEvent::Resume),
        Just(RequestEvent::Abort),
    ]
}

proptest! {
    #[test]
    fn prop_stored_state_never_leaves_a_terminal_state(
        events in proptest::collection::vec(any_event(), 1..24)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let ledger = ledger();
            let request =
                RemoteRequest::new(JobId::generate(), RemoteRequestType::ResultsJobRetrieve, 0);
            ledger.create(&request).await.unwrap();
            let key = request.key();

            let mut settled: Option<RequestState> = None;
            let mut begun = false;
            for event in events {
                let stored = ledger.transition(&key, event).await.unwrap().unwrap();
                if let Some(terminal) = settled {
                    prop_assert_eq!(stored.state, terminal);
                } else if stored.state.is_terminal() {
                    settled = Some(stored.state);
                }
                begun |= event == RequestEvent::Begin;
                if begun {
                    prop_assert_ne!(stored.state, RequestState::Pending);
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}

//! Single gate for every remote request state change.
//!
//! The legal edges are:
//!
//! ```text
//! PENDING    --begin-->   REQUESTING
//! REQUESTING --begin-->   REQUESTING
//! REQUESTING --succeed--> SUCCEEDED
//! REQUESTING --fail-->    FAILED
//! REQUESTING --halt-->    HALTED
//! HALTED     --resume-->  REQUESTING
//! REQUESTING --abort-->   ABORTED
//! ```
//!
//! Anything else is refused. [`RemoteRequestStateMachine::apply`] turns a
//! refusal into a logged no-op; callers re-read the state afterwards.

use super::{
    errors::{StateMachineError, StateMachineResult},
    RequestEvent, RequestState,
};
use crate::models::RemoteRequest;
use chrono::Utc;
use tracing::debug;

pub struct RemoteRequestStateMachine;

impl RemoteRequestStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: RequestState,
        event: RequestEvent,
    ) -> StateMachineResult<RequestState> {
        let target = match (current_state, event) {
            (RequestState::Pending, RequestEvent::Begin) => RequestState::Requesting,
            (RequestState::Requesting, RequestEvent::Begin) => RequestState::Requesting,
            (RequestState::Requesting, RequestEvent::Succeed) => RequestState::Succeeded,
            (RequestState::Requesting, RequestEvent::Fail) => RequestState::Failed,
            (RequestState::Requesting, RequestEvent::Halt) => RequestState::Halted,
            (RequestState::Halted, RequestEvent::Resume) => RequestState::Requesting,
            (RequestState::Requesting, RequestEvent::Abort) => RequestState::Aborted,

            (from, event) => return Err(StateMachineError::InvalidTransition { from, event }),
        };

        Ok(target)
    }

    pub fn can_transition(current_state: RequestState, event: RequestEvent) -> bool {
        Self::determine_target_state(current_state, event).is_ok()
    }

    /// Apply `event` to `request` in place. Returns false for an illegal
    /// transition, which leaves the request untouched.
    pub fn apply(request: &mut RemoteRequest, event: RequestEvent) -> bool {
        match Self::determine_target_state(request.state, event) {
            Ok(target) => {
                request.state = target;
                request.updated_at = Utc::now();
                true
            }
            Err(e) => {
                debug!(
                    job_id = %request.job_id,
                    request_type = %request.request_type,
                    index = request.index,
                    error = %e,
                    "Ignoring illegal remote request transition"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobId, RemoteRequestType};
    use proptest::prelude::*;

    const ALL_STATES: [RequestState; 6] = [
        RequestState::Pending,
        RequestState::Requesting,
        RequestState::Halted,
        RequestState::Succeeded,
        RequestState::Failed,
        RequestState::Aborted,
    ];

    const ALL_EVENTS: [RequestEvent; 6] = [
        RequestEvent::Begin,
        RequestEvent::Succeed,
        RequestEvent::Fail,
        RequestEvent::Halt,
        RequestEvent::Resume,
        RequestEvent::Abort,
    ];

    fn request_in(state: RequestState) -> RemoteRequest {
        let mut request =
            RemoteRequest::new(JobId::generate(), RemoteRequestType::MachineRetrieve, 0);
        request.state = state;
        request
    }

    #[test]
    fn test_happy_path() {
        let mut request = request_in(RequestState::Pending);
        assert!(RemoteRequestStateMachine::apply(&mut request, RequestEvent::Begin));
        assert_eq!(request.state, RequestState::Requesting);
        assert!(RemoteRequestStateMachine::apply(&mut request, RequestEvent::Succeed));
        assert_eq!(request.state, RequestState::Succeeded);
    }

    #[test]
    fn test_halt_and_resume() {
        let mut request = request_in(RequestState::Requesting);
        assert!(RemoteRequestStateMachine::apply(&mut request, RequestEvent::Halt));
        assert_eq!(request.state, RequestState::Halted);

        // halted only goes back to requesting
        assert!(!RemoteRequestStateMachine::apply(&mut request, RequestEvent::Fail));
        assert!(!RemoteRequestStateMachine::apply(&mut request, RequestEvent::Abort));
        assert_eq!(request.state, RequestState::Halted);

        assert!(RemoteRequestStateMachine::apply(&mut request, RequestEvent::Resume));
        assert_eq!(request.state, RequestState::Requesting);
    }

    #[test]
    fn test_requesting_may_restart() {
        assert_eq!(
            RemoteRequestStateMachine::determine_target_state(
                RequestState::Requesting,
                RequestEvent::Begin
            )
            .unwrap(),
            RequestState::Requesting
        );
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        assert!(!RemoteRequestStateMachine::can_transition(
            RequestState::Pending,
            RequestEvent::Succeed
        ));
        assert!(!RemoteRequestStateMachine::can_transition(
            RequestState::Pending,
            RequestEvent::Fail
        ));
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for state in [RequestState::Succeeded, RequestState::Failed, RequestState::Aborted] {
            for event in ALL_EVENTS {
                let mut request = request_in(state);
                assert!(!RemoteRequestStateMachine::apply(&mut request, event));
                assert_eq!(request.state, state);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_any_event_sequence_stays_on_legal_edges(
            events in proptest::collection::vec(0usize..ALL_EVENTS.len(), 0..32)
        ) {
            let mut request = request_in(RequestState::Pending);
            for i in events {
                let event = ALL_EVENTS[i];
                let before = request.state;
                let changed = RemoteRequestStateMachine::apply(&mut request, event);
                if changed {
                    prop_assert!(!before.is_terminal());
                    prop_assert_eq!(
                        RemoteRequestStateMachine::determine_target_state(before, event).unwrap(),
                        request.state
                    );
                } else {
                    prop_assert_eq!(before, request.state);
                }
                prop_assert!(ALL_STATES.contains(&request.state));
            }
        }
    }
}

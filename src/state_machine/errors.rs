use super::{RequestEvent, RequestState};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on {event:?}")]
    InvalidTransition {
        from: RequestState,
        event: RequestEvent,
    },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;

// State machine for remote request attempts
//
// Every change to RemoteRequest.state goes through RemoteRequestStateMachine so
// that terminal states stay terminal and HALTED only ever resumes.

pub mod errors;
pub mod events;
pub mod remote_request_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::RequestEvent;
pub use remote_request_state_machine::RemoteRequestStateMachine;
pub use states::RequestState;

use serde::{Deserialize, Serialize};

/// Events that can trigger remote request state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestEvent {
    /// Dispatch or (re)delivery of the message
    Begin,
    /// Remote call completed
    Succeed,
    /// Remote call failed for good
    Fail,
    /// Pause; the message will be re-armed
    Halt,
    /// Re-armed message picked up again
    Resume,
    /// Job or entity disappeared
    Abort,
}

impl RequestEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Succeed => "succeed",
            Self::Fail => "fail",
            Self::Halt => "halt",
            Self::Resume => "resume",
            Self::Abort => "abort",
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeed | Self::Fail | Self::Abort)
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one remote-request attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Row written, message not yet on its way
    #[default]
    Pending,
    /// Message dispatched or being handled
    Requesting,
    /// Paused by policy; will be re-armed
    Halted,
    /// Remote call completed
    Succeeded,
    /// Remote call failed; the failure is recorded on the row
    Failed,
    /// Job or target entity went away, or the action can never run
    Aborted,
}

impl RequestState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Requesting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Requesting => "requesting",
            Self::Halted => "halted",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "requesting" => Ok(Self::Requesting),
            "halted" => Ok(Self::Halted),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("Invalid remote request state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_state_terminal_check() {
        assert!(RequestState::Succeeded.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(RequestState::Aborted.is_terminal());
        assert!(!RequestState::Pending.is_terminal());
        assert!(!RequestState::Requesting.is_terminal());
        assert!(!RequestState::Halted.is_terminal());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(RequestState::Requesting.to_string(), "requesting");
        assert_eq!(
            "halted".parse::<RequestState>().unwrap(),
            RequestState::Halted
        );
        assert!("complete".parse::<RequestState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&RequestState::Aborted).unwrap();
        assert_eq!(json, "\"aborted\"");

        let parsed: RequestState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, RequestState::Aborted);
    }
}

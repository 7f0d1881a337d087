use super::job::JobId;
use super::ComponentEntity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializedSuiteState {
    Requested,
    Preparing,
    Prepared,
    Failed,
}

impl SerializedSuiteState {
    pub fn is_end_state(&self) -> bool {
        matches!(self, Self::Prepared | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SerializedSuiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerializedSuiteState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "preparing" => Ok(Self::Preparing),
            "prepared" => Ok(Self::Prepared),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid serialized suite state: {s}")),
        }
    }
}

/// Suite serialization as reported by the sources service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedSuite {
    pub job_id: JobId,
    pub serialized_suite_id: String,
    pub state: SerializedSuiteState,
    pub failure_reason: Option<String>,
    pub failure_message: Option<String>,
}

impl SerializedSuite {
    pub fn is_prepared(&self) -> bool {
        self.state == SerializedSuiteState::Prepared
    }

    pub fn has_failed(&self) -> bool {
        self.state == SerializedSuiteState::Failed
    }
}

impl ComponentEntity for SerializedSuite {
    fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn has_end_state(&self) -> bool {
        self.state.is_end_state()
    }
}

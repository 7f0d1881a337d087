use super::job::JobId;
use super::ComponentEntity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerComponentName {
    Compilation,
    Execution,
    EventDelivery,
}

impl WorkerComponentName {
    pub const ALL: [WorkerComponentName; 3] =
        [Self::Compilation, Self::Execution, Self::EventDelivery];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compilation => "compilation",
            Self::Execution => "execution",
            Self::EventDelivery => "event_delivery",
        }
    }
}

impl fmt::Display for WorkerComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerComponentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compilation" => Ok(Self::Compilation),
            "execution" => Ok(Self::Execution),
            "event_delivery" => Ok(Self::EventDelivery),
            _ => Err(format!("Invalid worker component name: {s}")),
        }
    }
}

/// Application-level state of the worker runtime for a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerState {
    pub job_id: JobId,
    pub state: String,
    pub is_end_state: bool,
}

impl ComponentEntity for WorkerState {
    fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn has_end_state(&self) -> bool {
        self.is_end_state
    }
}

/// State of one worker component, keyed by `(job_id, component_name)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerComponentState {
    pub job_id: JobId,
    pub component_name: WorkerComponentName,
    pub state: String,
    pub is_end_state: bool,
}

//! # Machine Model
//!
//! Worker machine as last reported by the machine manager. The state string
//! is the provider's own; `state_category` is the coarse lifecycle position
//! used by readiness and event reactions.

use super::job::JobId;
use super::ComponentEntity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStateCategory {
    Unknown,
    Finding,
    PreActive,
    Active,
    Ending,
    End,
}

impl MachineStateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Finding => "finding",
            Self::PreActive => "pre_active",
            Self::Active => "active",
            Self::Ending => "ending",
            Self::End => "end",
        }
    }

    /// Machine reached active at some point
    pub fn has_been_active(&self) -> bool {
        matches!(self, Self::Active | Self::Ending | Self::End)
    }
}

impl fmt::Display for MachineStateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineStateCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "finding" => Ok(Self::Finding),
            "pre_active" => Ok(Self::PreActive),
            "active" => Ok(Self::Active),
            "ending" => Ok(Self::Ending),
            "end" => Ok(Self::End),
            _ => Err(format!("Invalid machine state category: {s}")),
        }
    }
}

/// Failure of an action the machine manager performed on our behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineActionFailure {
    pub action: String,
    #[serde(rename = "type")]
    pub failure_type: String,
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub job_id: JobId,
    pub id: String,
    pub state: String,
    pub state_category: MachineStateCategory,
    pub ip_addresses: Vec<String>,
    pub action_failure: Option<MachineActionFailure>,
    pub has_end_state: bool,
}

impl Machine {
    pub fn is_active(&self) -> bool {
        self.state_category == MachineStateCategory::Active
    }

    /// Address the worker runtime is reachable on
    pub fn ip_address(&self) -> Option<&str> {
        self.ip_addresses.first().map(String::as_str)
    }
}

impl ComponentEntity for Machine {
    fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn has_end_state(&self) -> bool {
        self.has_end_state || self.state_category == MachineStateCategory::End
    }
}

//! # Job Model
//!
//! A job is the unit being provisioned across the results, sources, machine
//! and worker services. Its identity is a ULID so that ids sort by creation
//! time. Everything but the per-component request states is fixed at
//! creation.

use super::remote_request::RemoteRequestEntity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Opaque, time-ordered job identifier (26-char Crockford base32 ULID)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh id for a job created now
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(|ulid| Self(ulid.to_string()))
            .map_err(|e| format!("Invalid job id {s}: {e}"))
    }
}

impl TryFrom<String> for JobId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Denormalized outcome of the creation request for one job component.
///
/// Written by the dispatcher (`Requesting`), the handlers (`Succeeded`) and the
/// failure handlers (`Failed`, `Halted`) so readiness checks can answer without
/// walking the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComponentRequestState {
    #[default]
    Unknown,
    Requesting,
    Halted,
    Failed,
    Succeeded,
}

impl fmt::Display for ComponentRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Requesting => write!(f, "requesting"),
            Self::Halted => write!(f, "halted"),
            Self::Failed => write!(f, "failed"),
            Self::Succeeded => write!(f, "succeeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: String,
    pub suite_id: String,
    pub maximum_duration_in_seconds: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub request_states: BTreeMap<RemoteRequestEntity, ComponentRequestState>,
}

impl Job {
    pub fn new(
        user_id: impl Into<String>,
        suite_id: impl Into<String>,
        maximum_duration_in_seconds: u32,
    ) -> Self {
        Self {
            id: JobId::generate(),
            user_id: user_id.into(),
            suite_id: suite_id.into(),
            maximum_duration_in_seconds,
            created_at: Utc::now(),
            request_states: BTreeMap::new(),
        }
    }

    /// Request state for a component, `Unknown` if nothing was ever requested
    pub fn request_state(&self, entity: RemoteRequestEntity) -> ComponentRequestState {
        self.request_states
            .get(&entity)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_request_state(&mut self, entity: RemoteRequestEntity, state: ComponentRequestState) {
        self.request_states.insert(entity, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_job_id_is_a_ulid() {
        let id = JobId::generate();
        assert_eq!(id.as_str().len(), 26);
        assert_eq!(id.as_str().parse::<JobId>().unwrap(), id);
    }

    #[test]
    fn test_job_id_rejects_garbage() {
        assert!("not-a-ulid".parse::<JobId>().is_err());
        assert!(serde_json::from_str::<JobId>("\"abc\"").is_err());
    }

    #[test]
    fn test_job_ids_sort_by_creation() {
        let first = JobId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = JobId::generate();
        assert!(first < second);
    }

    #[test]
    fn test_request_state_defaults_to_unknown() {
        let mut job = Job::new("user", "suite", 600);
        assert_eq!(
            job.request_state(RemoteRequestEntity::Machine),
            ComponentRequestState::Unknown
        );

        job.set_request_state(RemoteRequestEntity::Machine, ComponentRequestState::Failed);
        assert_eq!(
            job.request_state(RemoteRequestEntity::Machine),
            ComponentRequestState::Failed
        );
    }
}

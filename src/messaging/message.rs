//! # Remote Request Messages
//!
//! One message describes one remote action for one job. The payload that
//! differs per action lives in [`MessageKind`], tagged by the request type
//! string so a queued message reads as `{"type": "machine/retrieve", ...}`.

use crate::models::{JobId, RemoteRequestKey, RemoteRequestType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageKind {
    #[serde(rename = "results-job/create")]
    ResultsJobCreate,
    #[serde(rename = "results-job/retrieve")]
    ResultsJobRetrieve,
    #[serde(rename = "serialized-suite/create")]
    SerializedSuiteCreate {
        suite_id: String,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
    #[serde(rename = "serialized-suite/retrieve")]
    SerializedSuiteRetrieve { serialized_suite_id: String },
    #[serde(rename = "machine/create")]
    MachineCreate,
    #[serde(rename = "machine/retrieve")]
    MachineRetrieve { machine_id: String },
    #[serde(rename = "machine/terminate")]
    MachineTerminate { machine_id: String },
    #[serde(rename = "worker-job/create")]
    WorkerJobCreate {
        machine_ip_address: String,
        serialized_suite_id: String,
    },
    #[serde(rename = "worker-job/retrieve")]
    WorkerJobRetrieve { machine_ip_address: String },
}

impl MessageKind {
    pub fn request_type(&self) -> RemoteRequestType {
        match self {
            Self::ResultsJobCreate => RemoteRequestType::ResultsJobCreate,
            Self::ResultsJobRetrieve => RemoteRequestType::ResultsJobRetrieve,
            Self::SerializedSuiteCreate { .. } => RemoteRequestType::SerializedSuiteCreate,
            Self::SerializedSuiteRetrieve { .. } => RemoteRequestType::SerializedSuiteRetrieve,
            Self::MachineCreate => RemoteRequestType::MachineCreate,
            Self::MachineRetrieve { .. } => RemoteRequestType::MachineRetrieve,
            Self::MachineTerminate { .. } => RemoteRequestType::MachineTerminate,
            Self::WorkerJobCreate { .. } => RemoteRequestType::WorkerJobCreate,
            Self::WorkerJobRetrieve { .. } => RemoteRequestType::WorkerJobRetrieve,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRequestMessage {
    pub job_id: JobId,
    pub authentication_token: String,
    /// Ledger index, assigned by the dispatcher
    #[serde(default)]
    pub index: u32,
    /// Failed attempts that preceded this one
    #[serde(default)]
    pub retry_count: u32,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl RemoteRequestMessage {
    pub fn new(job_id: JobId, authentication_token: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            job_id,
            authentication_token: authentication_token.into(),
            index: 0,
            retry_count: 0,
            kind,
        }
    }

    pub fn request_type(&self) -> RemoteRequestType {
        self.kind.request_type()
    }

    pub fn key(&self) -> RemoteRequestKey {
        RemoteRequestKey::new(self.job_id.clone(), self.request_type(), self.index)
    }

    /// Copy of this message for the next attempt after a failure
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }
}

/// Delivery metadata attached to an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stamp {
    /// Skip the ambient per-type delay
    NonDelayed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub message: RemoteRequestMessage,
    #[serde(default)]
    pub stamps: Vec<Stamp>,
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(message: RemoteRequestMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            message,
            stamps: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_stamp(mut self, stamp: Stamp) -> Self {
        if !self.stamps.contains(&stamp) {
            self.stamps.push(stamp);
        }
        self
    }

    pub fn has_stamp(&self, stamp: Stamp) -> bool {
        self.stamps.contains(&stamp)
    }

    /// Fresh envelope id for a re-armed copy, stamps dropped
    pub fn rearmed(&self) -> Self {
        Self::new(self.message.clone())
    }
}

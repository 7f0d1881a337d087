//! # Remote Request Failure Model
//!
//! Classified failure of a remote call. Records are content addressed: the id
//! is `md5(type + code + message)`, so every attempt that hits a byte-identical
//! failure shares one row.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Network,
    Http,
    Unknown,
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Http => "http",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(Self::Network),
            "http" => Ok(Self::Http),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid failure type: {s}")),
        }
    }
}

/// Output of the failure classifier, before it is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failure_type: FailureType,
    pub code: i32,
    pub message: Option<String>,
}

impl FailureRecord {
    pub fn new(failure_type: FailureType, code: i32, message: Option<String>) -> Self {
        Self {
            failure_type,
            code,
            message,
        }
    }

    /// Content address of this failure
    pub fn content_id(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(self.failure_type.as_str().as_bytes());
        hasher.update(self.code.to_string().as_bytes());
        hasher.update(self.message.as_deref().unwrap_or_default().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRequestFailure {
    pub id: String,
    #[serde(rename = "type")]
    pub failure_type: FailureType,
    pub code: i32,
    pub message: Option<String>,
}

impl From<FailureRecord> for RemoteRequestFailure {
    fn from(record: FailureRecord) -> Self {
        Self {
            id: record.content_id(),
            failure_type: record.failure_type,
            code: record.code,
            message: record.message,
        }
    }
}

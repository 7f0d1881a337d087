//! Concrete error kinds remote clients raise.
//!
//! Client implementations return `anyhow::Error` wrapping one of these so the
//! failure classifier can recognise them by downcasting; anything else ends up
//! classified as unknown.

use thiserror::Error;

/// Transport-level failure category, with curl-compatible codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    UnresolvableHost,
    ConnectionRefused,
    Timeout,
    Tls,
    ReceiveFailure,
    Other,
}

impl NetworkErrorKind {
    pub fn code(&self) -> i32 {
        match self {
            Self::UnresolvableHost => 6,
            Self::ConnectionRefused => 7,
            Self::Timeout => 28,
            Self::Tls => 35,
            Self::ReceiveFailure => 56,
            Self::Other => 0,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Network error ({kind:?}): {message}")]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub message: String,
}

impl NetworkError {
    pub fn new(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Remote service answered with a non-success status
#[derive(Debug, Clone, Error)]
#[error("HTTP {status}: {reason}")]
pub struct HttpError {
    pub status: u16,
    pub reason: String,
}

impl HttpError {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

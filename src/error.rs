//! # Error Types
//!
//! Crate-level error for the job coordinator. Each layer keeps its own
//! `thiserror` enum (`StorageError`, `MessagingError`, `DispatchError`,
//! `HandlerError`, `ConfigurationError`); `CoordinatorError` is what the
//! public entry points on [`crate::orchestration::JobCoordinator`] return.

use crate::config::ConfigurationError;
use crate::messaging::{DispatchError, MessagingError};
use crate::models::JobId;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

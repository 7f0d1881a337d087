//! # Messaging Error Types
//!
//! Structured errors for the message bus and the dispatcher.

use crate::models::{JobId, RemoteRequestType};
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Database query error: {operation}: {message}")]
    DatabaseQuery { operation: String, message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Unknown delivery receipt: {receipt}")]
    UnknownReceipt { receipt: String },
}

impl MessagingError {
    pub fn database_query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DatabaseQuery {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn unknown_receipt(receipt: impl Into<String>) -> Self {
        Self::UnknownReceipt {
            receipt: receipt.into(),
        }
    }
}

impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => MessagingError::database_query("query", "No rows found"),
            sqlx::Error::Database(db_err) => {
                MessagingError::database_query("database", db_err.to_string())
            }
            other => MessagingError::database_query("connection", other.to_string()),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() {
            MessagingError::message_deserialization(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

/// Why a dispatch was refused or could not complete
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A live or successful attempt already exists for a non-repeatable type
    #[error("Duplicate dispatch of {request_type} for job {job_id}")]
    DuplicateDispatch {
        job_id: JobId,
        request_type: RemoteRequestType,
    },

    #[error("Storage error during dispatch: {0}")]
    Storage(#[from] StorageError),

    #[error("Messaging error during dispatch: {0}")]
    Messaging(#[from] MessagingError),
}

impl DispatchError {
    pub fn duplicate(job_id: &JobId, request_type: RemoteRequestType) -> Self {
        Self::DuplicateDispatch {
            job_id: job_id.clone(),
            request_type,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateDispatch { .. })
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;

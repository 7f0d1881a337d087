//! Errors a message handler can end with. Each variant is routed to its own
//! failure handler; handlers themselves never write failure state.

use crate::messaging::{DispatchError, RemoteRequestMessage};
use crate::models::{JobId, RemoteRequestType};
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReadyReason {
    Never,
    Eventually,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    /// The remote call itself failed
    #[error("Remote action {request_type} failed for job {job_id}: {error}")]
    RemoteActionFailed {
        job_id: JobId,
        request_type: RemoteRequestType,
        error: anyhow::Error,
        message: Box<RemoteRequestMessage>,
    },

    #[error("Remote action {request_type} for job {job_id} is not ready ({reason:?})")]
    NotReady {
        job_id: JobId,
        request_type: RemoteRequestType,
        reason: NotReadyReason,
    },

    #[error("Job {job_id} not found while handling {request_type}")]
    JobNotFound {
        job_id: JobId,
        request_type: RemoteRequestType,
    },

    #[error("{entity} not found for job {job_id} while handling {request_type}")]
    EntityNotFound {
        job_id: JobId,
        request_type: RemoteRequestType,
        entity: &'static str,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl HandlerError {
    pub fn remote(message: &RemoteRequestMessage, error: anyhow::Error) -> Self {
        Self::RemoteActionFailed {
            job_id: message.job_id.clone(),
            request_type: message.request_type(),
            error,
            message: Box::new(message.clone()),
        }
    }

    pub fn not_ready(message: &RemoteRequestMessage, reason: NotReadyReason) -> Self {
        Self::NotReady {
            job_id: message.job_id.clone(),
            request_type: message.request_type(),
            reason,
        }
    }

    pub fn job_not_found(message: &RemoteRequestMessage) -> Self {
        Self::JobNotFound {
            job_id: message.job_id.clone(),
            request_type: message.request_type(),
        }
    }

    pub fn entity_not_found(message: &RemoteRequestMessage, entity: &'static str) -> Self {
        Self::EntityNotFound {
            job_id: message.job_id.clone(),
            request_type: message.request_type(),
            entity,
        }
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

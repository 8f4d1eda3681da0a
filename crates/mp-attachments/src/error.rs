//! Pipeline error types

use mp_core::{PortalError, ValidationErrors};
use thiserror::Error;

use crate::gate::GateError;
use crate::task::TaskId;
use crate::validate::RejectionReason;

/// Errors raised while staging or queueing uploads
#[derive(Debug, Error, Clone)]
pub enum UploadError {
    #[error("An identifier is required before uploading")]
    MissingIdentifier,

    #[error("Files failed validation: {0}")]
    Invalid(ValidationErrors),

    #[error("Upload queue is closed")]
    QueueClosed,

    #[error("Task {0} is not a failed upload")]
    NotRetryable(TaskId),

    #[error(transparent)]
    Gate(#[from] GateError),
}

/// Errors that abort a reupload
#[derive(Debug, Error)]
pub enum ReuploadError {
    #[error("{file_name}: {reason}")]
    Rejected {
        file_name: String,
        reason: RejectionReason,
    },

    #[error("Failed to delete {filename}: {}", .source.user_message())]
    DeleteFailed {
        filename: String,
        #[source]
        source: PortalError,
    },

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

pub type UploadResult<T> = Result<T, UploadError>;

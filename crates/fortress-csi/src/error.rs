//! Per-request error type
//!
//! Every handler short-circuits on the first violated precondition with a
//! [`DriverError`]; the conversion into [`tonic::Status`] happens at the
//! service boundary via `?`. Messages state the precondition only.

use thiserror::Error;
use tonic::Status;

use crate::backend::{AttachError, ProvisionError};

/// Result type for request handling
pub type DriverResult<T> = Result<T, DriverError>;

/// Request handling error
#[derive(Debug, Error)]
pub enum DriverError {
    /// A required field is missing or a value is outside the advertised set
    #[error("{0}")]
    InvalidArgument(String),

    /// The RPC is part of the protocol but not backed in this deployment
    #[error("{0}")]
    Unimplemented(String),

    /// A referenced path or volume does not exist
    #[error("{0}")]
    NotFound(String),

    /// The requested capacity cannot be honored
    #[error("{0}")]
    OutOfRange(String),

    /// A bounded wait on the storage backend ran out
    #[error("{0}")]
    DeadlineExceeded(String),

    /// The plugin is not in a state to serve the request
    #[error("{0}")]
    Unavailable(String),

    /// Provisioning backend failure
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Attach/mount backend failure
    #[error(transparent)]
    Attach(#[from] AttachError),

    /// Unexpected local failure
    #[error("{0}")]
    Internal(String),
}

impl DriverError {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an unimplemented error
    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Self::Unimplemented(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<DriverError> for Status {
    fn from(err: DriverError) -> Self {
        let message = err.to_string();
        match err {
            DriverError::InvalidArgument(_) => Status::invalid_argument(message),
            DriverError::Unimplemented(_) => Status::unimplemented(message),
            DriverError::NotFound(_) => Status::not_found(message),
            DriverError::OutOfRange(_) => Status::out_of_range(message),
            DriverError::DeadlineExceeded(_) => Status::deadline_exceeded(message),
            DriverError::Unavailable(_) => Status::unavailable(message),
            DriverError::Provision(e) => match e {
                ProvisionError::AlreadyExists(_) => Status::already_exists(message),
                ProvisionError::QuotaExceeded(_) => Status::resource_exhausted(message),
                ProvisionError::Unavailable => Status::unavailable(message),
            },
            DriverError::Attach(e) => match e {
                AttachError::DeviceBusy(_) => Status::aborted(message),
                AttachError::NotFound(_) => Status::not_found(message),
                AttachError::PermissionDenied(_) => Status::permission_denied(message),
            },
            DriverError::Internal(_) => Status::internal(message),
        }
    }
}

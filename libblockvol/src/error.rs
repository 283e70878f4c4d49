//! Error types.
//!
//! Every lifecycle call reports failure through [`VolumeError`].  The variants
//! follow the failure taxonomy of the driver: bad requests, missing entities,
//! ambiguous device discovery, failed remote operations, exhausted polling
//! budgets and local tooling failures.  Like the rest of the crate's data
//! model it is [`Serialize`]/[`Deserialize`] so it can travel inside a
//! response envelope.
//!
//! [`ServiceError`] is the narrower error reported by a [`VolumeService`]
//! implementation.  It only distinguishes "not found" (which some callers
//! compensate for) from every other remote failure.
//!
//! [`VolumeService`]: crate::service::VolumeService

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for volume lifecycle operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum VolumeError {
    /// Conflicting or malformed request options.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A named volume, snapshot or local record does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Device discovery found more than one candidate.
    #[error("cannot identify the attached device: {0}")]
    Ambiguous(String),

    /// A remote call failed, or its long-running operation reported failure.
    #[error("{0}")]
    RemoteOperation(String),

    /// A long-running operation did not finish within the polling budget.
    #[error("operation {handle} did not complete after {polls} status checks")]
    Timeout {
        /// Handle of the operation being waited on.
        handle: String,
        /// Number of status checks performed.
        polls: u32,
    },

    /// Mount, unmount, formatting or filesystem I/O failed.
    #[error("{0}")]
    LocalIo(String),
}

impl VolumeError {
    /// Returns `true` for [`VolumeError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Failure reported by the remote Volume Service.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The addressed resource does not exist (HTTP 404 or equivalent).
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other API failure.
    #[error("volume service error: {0}")]
    Api(String),
}

impl ServiceError {
    /// Returns `true` for [`ServiceError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ServiceError> for VolumeError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound(_) => Self::NotFound(e.to_string()),
            ServiceError::Api(_) => Self::RemoteOperation(e.to_string()),
        }
    }
}

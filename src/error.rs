//! Error types for idresolve.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! failure class: caller mistakes, infrastructure failures, concurrent
//! writers, and corrupted cluster linkage.

use thiserror::Error;

use crate::contact::ContactId;
use crate::storage::StorageError;

/// Validation errors raised while building an observation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("At least one of email or phoneNumber is required")]
    EmptyObservation,

    #[error("Invalid email address: {value:?}")]
    InvalidEmail {
        value: String,
    },

    #[error("Invalid phone number: {value:?}")]
    InvalidPhoneNumber {
        value: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: &'static str,
        max_length: usize,
    },
}

/// Top-level error type for identity resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The caller supplied an unusable observation. No side effects occurred.
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    /// The contact repository could not serve a request.
    #[error("Repository unavailable: {message}")]
    RepositoryUnavailable {
        message: String,
    },

    /// A concurrent writer changed the cluster between read and write.
    #[error("Concurrent modification: {message}")]
    Conflict {
        message: String,
    },

    /// Stored linkage is corrupted and needs manual repair.
    #[error("Consistency violation at contact {contact_id}: {message}")]
    ConsistencyViolation {
        contact_id: ContactId,
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ResolveError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a consistency violation for `contact_id`.
    #[must_use]
    pub fn consistency(contact_id: ContactId, message: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            contact_id,
            message: message.into(),
        }
    }

    /// Returns true if the caller is at fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Returns true if re-running the same resolution may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RepositoryUnavailable { .. } | Self::Conflict { .. })
    }
}

impl From<StorageError> for ResolveError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(message) => Self::Conflict { message },
            StorageError::CorruptRecord { id, reason } => Self::ConsistencyViolation {
                contact_id: id,
                message: reason,
            },
            other => Self::RepositoryUnavailable {
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, ResolveError>;

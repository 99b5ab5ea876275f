//! Domain error types and the sync-loop error taxonomy.
//!
//! Two layers of errors exist:
//!
//! - [`DomainError`] covers validation failures raised while constructing
//!   or mutating domain values (names, payloads, versions, sizes).
//! - [`SyncError`] is the taxonomy the sync loop and the local request
//!   surface operate on. Every failure a request execution can produce maps
//!   onto one of its variants, and the retryer dispatches on
//!   [`SyncError::class`].

use thiserror::Error;

use umbra_merge::MergeError;

/// Errors raised by domain-level validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Thing name fails the `[A-Za-z0-9:_-]+` / length constraints.
    #[error("invalid thing name: {0}")]
    InvalidThingName(String),

    /// Shadow name fails the `[A-Za-z0-9:_-]*` / length constraints.
    #[error("invalid shadow name: {0}")]
    InvalidShadowName(String),

    /// Client token is too long to echo back.
    #[error("invalid client token: {0}")]
    InvalidClientToken(String),

    /// Payload shape or nesting rules violated.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A new document was updated with a version other than 1.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// An update carried a stale document version.
    #[error("version conflict: expected {expected}, got {actual}")]
    VersionConflict {
        /// The version the stored document currently has.
        expected: u64,
        /// The version the update carried.
        actual: u64,
    },

    /// The serialized document exceeds the configured size limit.
    #[error("document size {size} exceeds the maximum of {max} bytes")]
    DocumentTooLarge {
        /// Serialized size of the rejected document.
        size: usize,
        /// Configured ceiling in bytes.
        max: usize,
    },
}

impl From<MergeError> for DomainError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::TooDeep => DomainError::InvalidPayload("too many levels of nesting".into()),
            MergeError::InvalidPayload(msg) => DomainError::InvalidPayload(msg),
        }
    }
}

/// Coarse classification the retryer and strategies dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Surfaced to the caller, never retried (bad input, authorization,
    /// missing resources, capacity rejections).
    Rejected,
    /// A version disagreement that full synchronization can repair.
    Conflict,
    /// Transient; another attempt may succeed.
    Retryable,
    /// Unrecoverable for this component instance.
    Fatal,
    /// Cancellation; propagate without logging an error.
    Interrupted,
}

/// The failure taxonomy of shadow operations and sync request executions.
#[derive(Debug, Error, Clone)]
pub enum SyncError {
    /// Bad names, malformed JSON, size or depth overrun.
    #[error("invalid request: {0}")]
    InvalidArguments(String),

    /// The update's expected version mismatches the stored document.
    #[error("local version conflict: expected {expected}, got {actual}")]
    VersionConflict {
        /// Version currently stored locally.
        expected: u64,
        /// Version the request carried.
        actual: u64,
    },

    /// The cloud rejected an update because its version is stale.
    #[error("cloud version conflict: {0}")]
    CloudConflict(String),

    /// The requested shadow does not exist.
    #[error("shadow not found: {0}")]
    NotFound(String),

    /// Caller lacks permission for the requested operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Transient transport, throttling, or I/O failure.
    #[error("retryable failure: {0}")]
    Retryable(String),

    /// The disk capacity gate is tripped; local writes are refused.
    #[error("local shadow storage capacity exceeded")]
    CapacityExceeded,

    /// The sync record no longer matches either side; a full
    /// synchronization has to rebuild it.
    #[error("sync record is stale for {0}")]
    UnknownShadow(String),

    /// Store corruption, failed migration, or configuration corruption.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The operation was cancelled.
    #[error("interrupted")]
    Interrupted,
}

impl SyncError {
    /// Maps the variant onto the class the retryer dispatches on.
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::InvalidArguments(_)
            | SyncError::NotFound(_)
            | SyncError::Unauthorized(_)
            | SyncError::CapacityExceeded => ErrorClass::Rejected,
            SyncError::VersionConflict { .. }
            | SyncError::CloudConflict(_)
            | SyncError::UnknownShadow(_) => ErrorClass::Conflict,
            SyncError::Retryable(_) => ErrorClass::Retryable,
            SyncError::Fatal(_) => ErrorClass::Fatal,
            SyncError::Interrupted => ErrorClass::Interrupted,
        }
    }
}

impl From<DomainError> for SyncError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::VersionConflict { expected, actual } => {
                SyncError::VersionConflict { expected, actual }
            }
            other => SyncError::InvalidArguments(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            SyncError::InvalidArguments("x".into()).class(),
            ErrorClass::Rejected
        );
        assert_eq!(
            SyncError::VersionConflict {
                expected: 2,
                actual: 1
            }
            .class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            SyncError::CloudConflict("stale".into()).class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            SyncError::Retryable("timeout".into()).class(),
            ErrorClass::Retryable
        );
        assert_eq!(SyncError::Fatal("bad".into()).class(), ErrorClass::Fatal);
        assert_eq!(SyncError::Interrupted.class(), ErrorClass::Interrupted);
        assert_eq!(SyncError::CapacityExceeded.class(), ErrorClass::Rejected);
    }

    #[test]
    fn test_merge_error_conversion() {
        let err: DomainError = MergeError::TooDeep.into();
        assert_eq!(
            err.to_string(),
            "invalid payload: too many levels of nesting"
        );
    }

    #[test]
    fn test_domain_version_conflict_maps_to_sync_variant() {
        let err: SyncError = DomainError::VersionConflict {
            expected: 4,
            actual: 2,
        }
        .into();
        assert!(matches!(
            err,
            SyncError::VersionConflict {
                expected: 4,
                actual: 2
            }
        ));
    }
}

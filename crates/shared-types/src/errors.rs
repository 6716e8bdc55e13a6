//! # Error Taxonomy
//!
//! The platform-wide error type shared across subsystems.
//!
//! Transient-vs-terminal is an explicit property of the variant, exposed via
//! [`PlatformError::is_retryable`]; callers never infer it from a message
//! string. Transient errors are recovered locally with bounded backoff; all
//! others propagate to the coordinator that initiated the operation.

use thiserror::Error;

/// Errors that can occur anywhere in the platform.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// Input violates a stated precondition. Surfaced to the caller, never retried.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A photo, job, or blob is absent.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up.
        entity: &'static str,
        /// The identifier that missed.
        id: String,
    },

    /// A backing service (blob store, metadata store, queue, event transport)
    /// is temporarily unavailable.
    #[error("{backend} unavailable: {detail}")]
    TransientBackend {
        /// Which backend failed.
        backend: &'static str,
        /// Transport-level detail for the log line.
        detail: String,
    },

    /// Concurrent claim, duplicate key, or an illegal state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A pipeline stage declared the input unprocessable (corrupt image,
    /// unsupported format). The photo fails terminally; the job is dead-lettered.
    #[error("stage '{stage}' failed fatally: {reason}")]
    StageFatal {
        /// Name of the stage that declared the failure.
        stage: String,
        /// Stage-supplied reason, stored on the record.
        reason: String,
    },

    /// An operation exceeded its deadline. Retryable until attempts run out.
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout {
        /// What was being awaited.
        operation: String,
        /// How long it ran before the deadline fired.
        elapsed_ms: u64,
    },

    /// Cooperative cancellation reached the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Programming-level invariant breach. Logged with context; the owning
    /// job is retried once and then dead-lettered to avoid a poison loop.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    /// Whether a retry may succeed without operator intervention.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientBackend { .. } | Self::Timeout { .. } | Self::Internal(_)
        )
    }

    /// Whether the error terminally fails the photo it was processing.
    #[must_use]
    pub fn is_terminal_for_photo(&self) -> bool {
        matches!(self, Self::ValidationFailed(_) | Self::StageFatal { .. })
    }

    /// Shorthand constructor for transient backend failures.
    #[must_use]
    pub fn transient(backend: &'static str, detail: impl Into<String>) -> Self {
        Self::TransientBackend {
            backend,
            detail: detail.into(),
        }
    }

    /// Shorthand constructor for lookups that missed.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PlatformError::transient("blob-store", "connection refused").is_retryable());
        assert!(PlatformError::Timeout {
            operation: "stage thumbnails".into(),
            elapsed_ms: 5000,
        }
        .is_retryable());
        assert!(!PlatformError::ValidationFailed("empty buffer".into()).is_retryable());
        assert!(!PlatformError::Cancelled.is_retryable());
    }

    #[test]
    fn test_terminal_classification() {
        let fatal = PlatformError::StageFatal {
            stage: "validation".into(),
            reason: "not an image".into(),
        };
        assert!(fatal.is_terminal_for_photo());
        assert!(!fatal.is_retryable());
        assert!(!PlatformError::Cancelled.is_terminal_for_photo());
    }

    #[test]
    fn test_display_contains_context() {
        let err = PlatformError::not_found("photo", "abc");
        assert_eq!(err.to_string(), "photo not found: abc");
    }
}

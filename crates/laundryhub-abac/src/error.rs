//! Access control error types.
//!
//! Errors raised by the policy store, the audit sink and the evaluator
//! internals. None of them ever reach the caller of
//! [`PolicyEvaluator::evaluate`](crate::policy::PolicyEvaluator::evaluate):
//! the evaluator folds them into a denied [`Decision`](crate::policy::Decision).

/// Errors that can occur while loading policies or recording decisions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AbacError {
    /// The policy store could not be queried.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The decision audit record could not be written.
    #[error("Audit error: {message}")]
    Audit {
        /// Description of the audit failure.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AbacError {
    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Audit` error.
    #[must_use]
    pub fn audit(message: impl Into<String>) -> Self {
        Self::Audit {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the operation may succeed.
    ///
    /// Store and audit failures are usually transient transport problems;
    /// internal faults are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Audit { .. })
    }

    /// Short machine-readable code for the error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage { .. } => "store-unavailable",
            Self::Audit { .. } => "audit-write-failed",
            Self::Internal { .. } => "internal",
        }
    }
}

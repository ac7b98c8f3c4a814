//! Error types for rate limiting.

use crate::storage::StorageError;

/// Errors that can occur during rate limiting.
///
/// An exceeded limit is not an error: it is reported as [`crate::Verdict::Denied`].
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// No policy is registered under the requested category.
    #[error("No rate limit policy is registered for category '{0}'")]
    PolicyNotFound(String),

    /// A policy definition cannot be enforced.
    #[error("Misconfigured rate limit policy '{name}': {reason}")]
    MisconfiguredPolicy {
        /// Name of the offending policy.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An identifier string is neither `user:<id>` nor `ip:<address>`.
    #[error("Invalid identifier '{0}', expected 'user:<id>' or 'ip:<address>'")]
    InvalidIdentifier(String),

    /// Storage backend error, only surfaced when failing closed or from operator calls.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RateLimitError {
    pub(crate) fn misconfigured(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MisconfiguredPolicy {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

//! Controller-specific error types.
//!
//! The variants follow the reconcile error taxonomy: transient API errors
//! are retried with backoff, validation errors are retried no faster than a
//! floor interval, conflicts are retried in-place with bounded attempts.

use thiserror::Error;

/// Errors that can occur in the gateway controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error (transient unless proven otherwise)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Object failed validation; operator action required
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Infrastructure create/update rejected (quota, admission)
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// Optimistic-concurrency retries exhausted for a status write
    #[error("Status write conflict: {0}")]
    Conflict(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Object serialization failed
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Object is missing a metadata field it is guaranteed to have
    #[error("Object missing metadata field: {0}")]
    MissingObjectMeta(&'static str),
}

impl ControllerError {
    /// Validation errors requeue at the floor interval rather than with
    /// accelerating backoff; nothing external will fix them.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

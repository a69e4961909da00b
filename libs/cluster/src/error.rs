//! Control-plane error taxonomy.

use thiserror::Error;

/// Errors surfaced by control-plane access.
///
/// The split matters to callers: a rejection is an admission-time verdict on
/// the submitted configuration and will not change on retry, while a query
/// failure is transient and the readiness poller retries it transparently.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The control plane rejected a submitted document.
    #[error("control plane rejected {kind}/{name}: {reason}")]
    Rejected {
        kind: String,
        name: String,
        reason: String,
    },

    /// A read against the control plane failed.
    #[error("control plane query failed: {0}")]
    Query(#[source] anyhow::Error),
}

impl ClusterError {
    /// Wrap a transient query failure.
    pub fn query(err: impl Into<anyhow::Error>) -> Self {
        ClusterError::Query(err.into())
    }

    /// Whether this error is an admission-time rejection.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ClusterError::Rejected { .. })
    }
}

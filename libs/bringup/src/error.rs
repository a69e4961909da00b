//! Bring-up error taxonomy.
//!
//! No error is swallowed past its originating stage: every failure aborts
//! the entire run, and every variant names the stage and/or resource that
//! was being waited on. Diagnosing *where* a multi-minute bring-up stalled
//! is the primary operational need.

use std::time::Duration;

use thiserror::Error;

use quarry_cluster::ClusterError;
use quarry_topology::TopologyError;

use crate::orchestrator::Stage;

/// Result alias for bring-up operations.
pub type BringupResult<T> = Result<T, BringupError>;

/// Whole-run failure modes.
#[derive(Debug, Error)]
pub enum BringupError {
    /// Admission-time validation failure, propagated verbatim. Not
    /// retried: a malformed configuration will not become valid by
    /// retrying.
    #[error("configuration rejected: {0}")]
    RejectedConfiguration(#[source] ClusterError),

    /// A stage's deadline elapsed.
    #[error("bring-up timed out at stage {stage} after {waited:?} (waiting on {selector})")]
    StageTimedOut {
        stage: Stage,
        selector: String,
        waited: Duration,
    },

    /// A stage observed a terminal failure (e.g. a Failed pipeline).
    #[error("bring-up aborted at stage {stage}: {reason}")]
    StageFailed { stage: Stage, reason: String },

    /// A gateway address was still unassigned after the orchestrator
    /// reported success. Should be unreachable if prior stages truly
    /// succeeded, so it is not retried.
    #[error("gateway {gateway} has no assigned address")]
    GatewayUnresolved { gateway: String },

    /// The end-to-end build probe failed.
    #[error("smoke test failed: {0}")]
    SmokeTestFailed(String),

    /// The topology descriptor itself is unusable.
    #[error("invalid topology: {0}")]
    InvalidTopology(#[from] TopologyError),

    /// A non-poller control-plane read failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

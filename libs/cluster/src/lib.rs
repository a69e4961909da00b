//! Control-plane access for the bring-up orchestrator.
//!
//! The orchestrator holds only ephemeral, non-authoritative read handles on
//! cluster resources: it submits the composed configuration once, then polls.
//! Everything above this crate is written against the [`ControlPlane`] trait
//! so tests can inject a fake; the real implementation in [`kube_client`]
//! talks to a Kubernetes API server.

pub mod error;
pub mod kube_client;
pub mod resource;

pub use error::ClusterError;
pub use kube_client::KubeControlPlane;
pub use resource::{
    document_name, kinds, lookup_path, NameSelector, ResourceKind, ResourceSelector, ResourceView,
};

use async_trait::async_trait;

/// Field manager recorded against server-side applied documents.
pub const FIELD_MANAGER: &str = "quarry-bringup";

/// Read/submit access to the cluster control plane.
///
/// Submission is accepted-or-rejected only: acceptance means reconciliation
/// has been scheduled, not that anything is running. All queries are
/// read-only; after the initial submission the control plane is the sole
/// mutator of resource state.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Submit one resource document for reconciliation.
    async fn apply(&self, document: &serde_json::Value) -> Result<(), ClusterError>;

    /// Fetch the current view of all resources matching a selector.
    ///
    /// An empty result is a normal state, not an error: resources the
    /// control plane has not created yet simply do not match.
    async fn query(&self, selector: &ResourceSelector) -> Result<Vec<ResourceView>, ClusterError>;
}

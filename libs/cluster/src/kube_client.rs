//! Kubernetes-backed [`ControlPlane`] implementation.
//!
//! Uses untyped `DynamicObject` access with explicit `ApiResource`s so the
//! custom resources the bring-up waits on (GitRepository, Kustomization,
//! PipelineRun) need no generated types. Documents are submitted with
//! server-side apply under a fixed field manager.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ClusterError;
use crate::resource::{document_name, NameSelector, ResourceKind, ResourceSelector, ResourceView};
use crate::{ControlPlane, FIELD_MANAGER};

/// Control-plane client backed by a Kubernetes API server.
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
    namespace: String,
}

impl KubeControlPlane {
    /// Connect using the ambient kubeconfig or in-cluster environment.
    pub async fn connect(namespace: impl Into<String>) -> Result<Self, ClusterError> {
        let client = Client::try_default().await.map_err(ClusterError::query)?;
        Ok(KubeControlPlane {
            client,
            namespace: namespace.into(),
        })
    }

    /// Wrap an existing client (used by integration harnesses).
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        KubeControlPlane {
            client,
            namespace: namespace.into(),
        }
    }

    fn api_for(&self, kind: ResourceKind) -> Api<DynamicObject> {
        let resource = ApiResource {
            group: kind.group.to_string(),
            version: kind.version.to_string(),
            api_version: kind.api_version(),
            kind: kind.kind.to_string(),
            plural: kind.plural.to_string(),
        };
        Api::namespaced_with(self.client.clone(), &self.namespace, &resource)
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn apply(&self, document: &Value) -> Result<(), ClusterError> {
        let kind = ResourceKind::of_document(document).ok_or_else(|| ClusterError::Rejected {
            kind: document
                .get("kind")
                .and_then(Value::as_str)
                .unwrap_or("<unknown>")
                .to_string(),
            name: document_name(document).unwrap_or("<unnamed>").to_string(),
            reason: "unsupported resource kind".to_string(),
        })?;
        let name = document_name(document).ok_or_else(|| ClusterError::Rejected {
            kind: kind.kind.to_string(),
            name: "<unnamed>".to_string(),
            reason: "document has no metadata.name".to_string(),
        })?;

        let api = self.api_for(kind);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(name, &params, &Patch::Apply(document))
            .await
            .map_err(|err| map_apply_error(kind, name, err))?;

        info!(kind = %kind, name = %name, namespace = %self.namespace, "applied document");
        Ok(())
    }

    async fn query(&self, selector: &ResourceSelector) -> Result<Vec<ResourceView>, ClusterError> {
        let api = self.api_for(selector.kind);

        let objects = match &selector.name {
            NameSelector::Exact(name) => api
                .get_opt(name)
                .await
                .map_err(ClusterError::query)?
                .into_iter()
                .collect::<Vec<_>>(),
            NameSelector::Prefix(prefix) => api
                .list(&ListParams::default())
                .await
                .map_err(ClusterError::query)?
                .items
                .into_iter()
                .filter(|o| o.name_any().starts_with(prefix.as_str()))
                .collect(),
            NameSelector::Labels(labels) => api
                .list(&ListParams::default().labels(labels))
                .await
                .map_err(ClusterError::query)?
                .items,
        };

        debug!(selector = %selector, matched = objects.len(), "queried control plane");

        objects
            .into_iter()
            .map(|o| {
                let name = o.name_any();
                let object = serde_json::to_value(&o).map_err(ClusterError::query)?;
                Ok(ResourceView::new(name, object))
            })
            .collect()
    }
}

/// Admission errors are verdicts on the document and will not change on
/// retry; everything else is a transient query failure.
fn map_apply_error(kind: ResourceKind, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(ref response)
            if (400..500).contains(&response.code) && response.code != 429 =>
        {
            ClusterError::Rejected {
                kind: kind.kind.to_string(),
                name: name.to_string(),
                reason: response.message.clone(),
            }
        }
        other => ClusterError::query(other),
    }
}

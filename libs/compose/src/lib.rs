//! Manifest composition.
//!
//! Takes the topology descriptor plus an ordered list of patch operations
//! and produces one finalized, applyable configuration. Composition is a
//! pure transformation: the same inputs always produce the same output,
//! which is what makes a whole-pipeline retry reproducible.
//!
//! Patches are replacement-only. A patch whose target document or field
//! path does not exist in the base configuration fails with
//! [`ComposeError::MalformedPatch`] instead of silently creating fields.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use quarry_cluster::{document_name, kinds, ResourceKind};
use quarry_topology::{
    DeploymentUnit, GatewaySpec, Tier, Topology, TopologyError, WorkerExtras, CONFIGMAPS_LAYER,
    CORE_LAYER, SOURCE_REPOSITORY, STACK_LAYER,
};

/// One named override applied atop the base configuration.
///
/// Operations are applied in list order; later operations may overwrite
/// fields touched by earlier ones (last write wins per field path).
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOperation {
    /// Target resource kind.
    pub kind: ResourceKind,

    /// Target resource name.
    pub name: String,

    /// Dotted field path within the document. Numeric segments index
    /// arrays.
    pub path: String,

    /// Replacement value.
    pub value: Value,
}

impl PatchOperation {
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
        path: impl Into<String>,
        value: Value,
    ) -> Self {
        PatchOperation {
            kind,
            name: name.into(),
            path: path.into(),
            value,
        }
    }
}

/// The recognized invocation-time overrides, gathered from flags or the
/// environment by the caller and converted into an ordered patch list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceOverrides {
    /// Overlay selection; rewrites the core layer's configuration path.
    pub overlay: Option<String>,

    /// Source repository URL.
    pub repo_url: Option<String>,

    /// Source branch.
    pub branch: Option<String>,

    /// Source commit.
    pub commit: Option<String>,

    /// Per-tier container image overrides.
    pub images: BTreeMap<Tier, String>,
}

impl SourceOverrides {
    /// Convert to the fixed-order patch list: overlay, url, branch, commit,
    /// then per-tier images in rollout order.
    pub fn into_patches(self, topology: &Topology) -> Result<Vec<PatchOperation>, ComposeError> {
        let mut patches = Vec::new();

        if let Some(overlay) = self.overlay {
            patches.push(PatchOperation::new(
                kinds::KUSTOMIZATION,
                CORE_LAYER,
                "spec.path",
                json!(format!("./overlays/{overlay}")),
            ));
        }
        if let Some(url) = self.repo_url {
            patches.push(PatchOperation::new(
                kinds::GIT_REPOSITORY,
                SOURCE_REPOSITORY,
                "spec.url",
                json!(url),
            ));
        }
        if let Some(branch) = self.branch {
            patches.push(PatchOperation::new(
                kinds::GIT_REPOSITORY,
                SOURCE_REPOSITORY,
                "spec.ref.branch",
                json!(branch),
            ));
        }
        if let Some(commit) = self.commit {
            patches.push(PatchOperation::new(
                kinds::GIT_REPOSITORY,
                SOURCE_REPOSITORY,
                "spec.ref.commit",
                json!(commit),
            ));
        }
        for tier in Tier::ROLLOUT_ORDER {
            if let Some(image) = self.images.get(&tier) {
                let unit = topology.unit(tier)?;
                patches.push(PatchOperation::new(
                    kinds::DEPLOYMENT,
                    unit.name.clone(),
                    "spec.template.spec.containers.0.image",
                    json!(image),
                ));
            }
        }

        Ok(patches)
    }
}

/// The finalized, applyable configuration: an ordered list of resource
/// documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    resources: Vec<Value>,
}

impl Manifest {
    /// The documents, in application order.
    pub fn resources(&self) -> &[Value] {
        &self.resources
    }

    /// Look up one document by kind and name.
    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<&Value> {
        self.resources
            .iter()
            .find(|d| ResourceKind::of_document(d) == Some(kind) && document_name(d) == Some(name))
    }

    /// Content hash of the composed configuration.
    ///
    /// serde_json object keys are ordered, so serializing the document list
    /// is already canonical.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for doc in &self.resources {
            hasher.update(doc.to_string().as_bytes());
            hasher.update(b"\n");
        }
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

/// Composition errors.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("invalid topology: {0}")]
    InvalidTopology(#[from] TopologyError),

    /// A patch referenced a target or field path not present in the base
    /// configuration.
    #[error("malformed patch for {kind}/{name} at {path}: {reason}")]
    MalformedPatch {
        kind: String,
        name: String,
        path: String,
        reason: String,
    },
}

/// Compose the finalized configuration from a topology and an ordered
/// patch list.
pub fn compose(topology: &Topology, patches: &[PatchOperation]) -> Result<Manifest, ComposeError> {
    topology.validate()?;

    let mut resources = render_base(topology);

    for patch in patches {
        let doc = resources
            .iter_mut()
            .find(|d| {
                ResourceKind::of_document(d) == Some(patch.kind)
                    && document_name(d) == Some(patch.name.as_str())
            })
            .ok_or_else(|| malformed(patch, "no such resource in base configuration"))?;
        apply_patch(doc, patch)?;
    }

    Ok(Manifest { resources })
}

fn malformed(patch: &PatchOperation, reason: &str) -> ComposeError {
    ComposeError::MalformedPatch {
        kind: patch.kind.kind.to_string(),
        name: patch.name.clone(),
        path: patch.path.clone(),
        reason: reason.to_string(),
    }
}

/// Apply one replacement into an existing field path.
fn apply_patch(doc: &mut Value, patch: &PatchOperation) -> Result<(), ComposeError> {
    let segments: Vec<&str> = patch.path.split('.').collect();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| malformed(patch, "empty field path"))?;

    let mut current = &mut *doc;
    for segment in parents {
        current = match current {
            Value::Object(map) => map
                .get_mut(*segment)
                .ok_or_else(|| malformed(patch, "field path not present in base document"))?,
            Value::Array(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| malformed(patch, "non-numeric index into array"))?;
                items
                    .get_mut(index)
                    .ok_or_else(|| malformed(patch, "array index out of bounds"))?
            }
            _ => return Err(malformed(patch, "field path traverses a scalar")),
        };
    }

    match current {
        Value::Object(map) => {
            let slot = map
                .get_mut(*last)
                .ok_or_else(|| malformed(patch, "field path not present in base document"))?;
            *slot = patch.value.clone();
        }
        Value::Array(items) => {
            let index: usize = last
                .parse()
                .map_err(|_| malformed(patch, "non-numeric index into array"))?;
            let slot = items
                .get_mut(index)
                .ok_or_else(|| malformed(patch, "array index out of bounds"))?;
            *slot = patch.value.clone();
        }
        _ => return Err(malformed(patch, "field path traverses a scalar")),
    }

    Ok(())
}

/// Render the base documents in application order: the layered source and
/// reconciliation resources first, then the workloads in rollout order,
/// then the gateways.
fn render_base(topology: &Topology) -> Vec<Value> {
    let ns = topology.namespace.as_str();
    let mut docs = vec![
        git_repository(ns),
        layer(ns, CORE_LAYER, "./overlays/default"),
        layer(ns, CONFIGMAPS_LAYER, "./config"),
        layer(ns, STACK_LAYER, "./stack"),
    ];

    for unit in &topology.units {
        if let Some(extras) = &unit.worker_extras {
            docs.push(worker_config_map(ns, unit, extras));
        }
        docs.push(deployment(ns, unit));
        docs.push(service(ns, unit));
    }

    for gateway in &topology.gateways {
        docs.push(gateway_service(ns, gateway));
    }

    docs
}

fn labels(name: &str) -> Value {
    json!({
        "app.kubernetes.io/name": name,
        "app.kubernetes.io/part-of": "quarry",
    })
}

fn git_repository(ns: &str) -> Value {
    json!({
        "apiVersion": kinds::GIT_REPOSITORY.api_version(),
        "kind": kinds::GIT_REPOSITORY.kind,
        "metadata": {
            "name": SOURCE_REPOSITORY,
            "namespace": ns,
            "labels": labels(SOURCE_REPOSITORY),
        },
        "spec": {
            "interval": "1m",
            "url": "https://github.com/quarry-build/quarry-deploy",
            "ref": {
                "branch": "main",
                "commit": "",
            },
        },
    })
}

fn layer(ns: &str, name: &str, path: &str) -> Value {
    json!({
        "apiVersion": kinds::KUSTOMIZATION.api_version(),
        "kind": kinds::KUSTOMIZATION.kind,
        "metadata": {
            "name": name,
            "namespace": ns,
            "labels": labels(name),
        },
        "spec": {
            "interval": "1m",
            "path": path,
            "prune": true,
            "sourceRef": {
                "kind": kinds::GIT_REPOSITORY.kind,
                "name": SOURCE_REPOSITORY,
            },
        },
    })
}

fn worker_config_map(ns: &str, unit: &DeploymentUnit, extras: &WorkerExtras) -> Value {
    let config = json!({
        "cas_endpoint": unit.env.get("QUARRY_CAS_ENDPOINT"),
        "scheduler_endpoint": unit.env.get("QUARRY_SCHEDULER_ENDPOINT"),
        "entrypoint": format!("{}/quarry-worker", extras.staging.shared_dir),
    });
    json!({
        "apiVersion": kinds::CONFIG_MAP.api_version(),
        "kind": kinds::CONFIG_MAP.kind,
        "metadata": {
            "name": extras.config_map,
            "namespace": ns,
            "labels": labels(&unit.name),
        },
        "data": {
            "worker.json": config.to_string(),
        },
    })
}

fn deployment(ns: &str, unit: &DeploymentUnit) -> Value {
    let env: Vec<Value> = unit
        .env
        .iter()
        .map(|(k, v)| json!({"name": k, "value": v}))
        .collect();

    let container = json!({
        "name": unit.tier.short_name(),
        "image": unit.image,
        "env": env,
        "ports": [{"containerPort": unit.tier.port()}],
    });

    let mut pod_spec = json!({
        "containers": [container],
    });

    if let Some(extras) = &unit.worker_extras {
        let config_dir = extras
            .config_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("/etc/quarry");
        pod_spec["containers"][0]["volumeMounts"] = json!([
            {"name": "worker-config", "mountPath": config_dir, "readOnly": true},
            {"name": "entrypoint", "mountPath": extras.staging.shared_dir},
        ]);
        pod_spec["initContainers"] = json!([{
            "name": "stage-entrypoint",
            "image": unit.image,
            "command": ["cp", extras.staging.source_path, extras.staging.shared_dir],
            "volumeMounts": [
                {"name": "entrypoint", "mountPath": extras.staging.shared_dir},
            ],
        }]);
        pod_spec["volumes"] = json!([
            {"name": "worker-config", "configMap": {"name": extras.config_map}},
            {"name": "entrypoint", "emptyDir": {}},
        ]);
    }

    json!({
        "apiVersion": kinds::DEPLOYMENT.api_version(),
        "kind": kinds::DEPLOYMENT.kind,
        "metadata": {
            "name": unit.name,
            "namespace": ns,
            "labels": labels(&unit.name),
        },
        "spec": {
            "replicas": unit.replicas,
            "selector": {
                "matchLabels": {"app.kubernetes.io/name": unit.name},
            },
            "template": {
                "metadata": {
                    "labels": labels(&unit.name),
                },
                "spec": pod_spec,
            },
        },
    })
}

fn service(ns: &str, unit: &DeploymentUnit) -> Value {
    let mut spec = json!({
        "selector": {"app.kubernetes.io/name": unit.name},
        "ports": [{"port": unit.tier.port(), "targetPort": unit.tier.port()}],
    });
    if unit.headless_service {
        spec["clusterIP"] = json!("None");
    }
    json!({
        "apiVersion": kinds::SERVICE.api_version(),
        "kind": kinds::SERVICE.kind,
        "metadata": {
            "name": unit.name,
            "namespace": ns,
            "labels": labels(&unit.name),
        },
        "spec": spec,
    })
}

fn gateway_service(ns: &str, gateway: &GatewaySpec) -> Value {
    json!({
        "apiVersion": kinds::SERVICE.api_version(),
        "kind": kinds::SERVICE.kind,
        "metadata": {
            "name": gateway.name,
            "namespace": ns,
            "labels": labels(&gateway.name),
        },
        "spec": {
            "type": "LoadBalancer",
            "selector": {"app.kubernetes.io/name": gateway.target_service},
            "ports": [{"port": gateway.port, "targetPort": gateway.port}],
        },
    })
}

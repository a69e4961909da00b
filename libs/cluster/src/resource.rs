//! Resource kinds, selectors, and read-only views.

use serde_json::Value;

/// A Kubernetes resource kind the orchestrator touches.
///
/// Plurals are spelled out because the API path cannot be derived from the
/// kind name alone (`GitRepository` pluralizes irregularly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl ResourceKind {
    /// The `apiVersion` string for documents of this kind.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Resolve the kind of a resource document by its `apiVersion`/`kind`.
    pub fn of_document(document: &Value) -> Option<ResourceKind> {
        let api_version = document.get("apiVersion")?.as_str()?;
        let kind = document.get("kind")?.as_str()?;
        kinds::ALL
            .into_iter()
            .find(|k| k.kind == kind && k.api_version() == api_version)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind)
    }
}

/// The kinds the bring-up knows about.
pub mod kinds {
    use super::ResourceKind;

    pub const DEPLOYMENT: ResourceKind = ResourceKind {
        group: "apps",
        version: "v1",
        kind: "Deployment",
        plural: "deployments",
    };

    pub const SERVICE: ResourceKind = ResourceKind {
        group: "",
        version: "v1",
        kind: "Service",
        plural: "services",
    };

    pub const CONFIG_MAP: ResourceKind = ResourceKind {
        group: "",
        version: "v1",
        kind: "ConfigMap",
        plural: "configmaps",
    };

    pub const GIT_REPOSITORY: ResourceKind = ResourceKind {
        group: "source.toolkit.fluxcd.io",
        version: "v1",
        kind: "GitRepository",
        plural: "gitrepositories",
    };

    pub const KUSTOMIZATION: ResourceKind = ResourceKind {
        group: "kustomize.toolkit.fluxcd.io",
        version: "v1",
        kind: "Kustomization",
        plural: "kustomizations",
    };

    pub const PIPELINE_RUN: ResourceKind = ResourceKind {
        group: "tekton.dev",
        version: "v1",
        kind: "PipelineRun",
        plural: "pipelineruns",
    };

    pub const ALL: [ResourceKind; 6] = [
        DEPLOYMENT,
        SERVICE,
        CONFIG_MAP,
        GIT_REPOSITORY,
        KUSTOMIZATION,
        PIPELINE_RUN,
    ];
}

/// How resources of a kind are matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameSelector {
    /// Exactly one resource, by name.
    Exact(String),

    /// Any resource whose name starts with the prefix. Used for resources
    /// created by external processes whose exact name is not known in
    /// advance.
    Prefix(String),

    /// Any resource matching a `key=value` label selector.
    Labels(String),
}

/// A resource selector: one kind plus a name or label match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSelector {
    pub kind: ResourceKind,
    pub name: NameSelector,
}

impl ResourceSelector {
    pub fn exact(kind: ResourceKind, name: impl Into<String>) -> Self {
        ResourceSelector {
            kind,
            name: NameSelector::Exact(name.into()),
        }
    }

    pub fn prefix(kind: ResourceKind, prefix: impl Into<String>) -> Self {
        ResourceSelector {
            kind,
            name: NameSelector::Prefix(prefix.into()),
        }
    }

    pub fn labels(kind: ResourceKind, selector: impl Into<String>) -> Self {
        ResourceSelector {
            kind,
            name: NameSelector::Labels(selector.into()),
        }
    }

    /// Whether a resource with the given name and labels matches.
    pub fn matches(&self, name: &str, labels: &Value) -> bool {
        match &self.name {
            NameSelector::Exact(n) => name == n,
            NameSelector::Prefix(p) => name.starts_with(p.as_str()),
            NameSelector::Labels(sel) => match sel.split_once('=') {
                Some((key, value)) => labels.get(key).and_then(Value::as_str) == Some(value),
                None => false,
            },
        }
    }
}

impl std::fmt::Display for ResourceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            NameSelector::Exact(n) => write!(f, "{}/{}", self.kind, n),
            NameSelector::Prefix(p) => write!(f, "{} with name prefix {p}", self.kind),
            NameSelector::Labels(sel) => write!(f, "{} labeled {sel}", self.kind),
        }
    }
}

/// A non-authoritative snapshot of one cluster resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceView {
    /// Resource name.
    pub name: String,

    /// The full resource document as last observed.
    pub object: Value,
}

impl ResourceView {
    pub fn new(name: impl Into<String>, object: Value) -> Self {
        ResourceView {
            name: name.into(),
            object,
        }
    }

    /// Look up a nested field by dotted path. Numeric segments index arrays.
    pub fn path(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.object, path)
    }

    /// Status of a named `status.conditions` entry (`"True"`, `"False"`,
    /// `"Unknown"`), if present.
    pub fn condition_status(&self, condition: &str) -> Option<&str> {
        self.condition(condition)?.get("status")?.as_str()
    }

    /// Message of a named `status.conditions` entry, if present.
    pub fn condition_message(&self, condition: &str) -> Option<&str> {
        self.condition(condition)?.get("message")?.as_str()
    }

    fn condition(&self, condition: &str) -> Option<&Value> {
        self.object
            .get("status")?
            .get("conditions")?
            .as_array()?
            .iter()
            .find(|c| c.get("type").and_then(Value::as_str) == Some(condition))
    }
}

/// Dotted-path lookup into a JSON document. Numeric segments index arrays.
pub fn lookup_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.') {
        current = match current {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            Value::Object(_) => current.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Name of a resource document, if present.
pub fn document_name(document: &Value) -> Option<&str> {
    document.get("metadata")?.get("name")?.as_str()
}

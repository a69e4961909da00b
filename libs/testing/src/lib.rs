//! Fake control plane for bring-up tests.
//!
//! [`FakeControlPlane`] implements the `ControlPlane` trait in memory.
//! Resource state evolves with elapsed `tokio::time` since the first
//! submission, so tests driven under paused time (`start_paused = true`)
//! observe a cluster that "reconciles" deterministically: layers become
//! Ready after a delay, the pipeline run appears and completes (or fails)
//! after a delay, rollouts progress, and gateway addresses get assigned.
//!
//! Applied documents and every query are recorded so tests can assert
//! ordering (e.g. gateways are never queried after an aborted run).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use quarry_cluster::{
    document_name, kinds, ClusterError, ControlPlane, ResourceKind, ResourceSelector, ResourceView,
};
use quarry_topology::PIPELINE_RUN_PREFIX;

/// How the scripted image-build pipeline behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The run reaches `Succeeded=True` this long after submission.
    Succeeds { after: Duration },

    /// The run reaches `Succeeded=False` this long after submission.
    Fails { after: Duration },
}

/// Delays after submission at which the fake cluster converges.
#[derive(Debug, Clone)]
pub struct FakeTimings {
    /// Reconciliation layers (and the source repository) report Ready.
    pub reconcile_after: Duration,

    /// The pipeline run is created by the "upstream trigger". `None`
    /// means the trigger never fires.
    pub pipeline_created_after: Option<Duration>,

    /// Pipeline terminal condition.
    pub pipeline: PipelineOutcome,

    /// Deployment rollouts fully progress.
    pub rollout_after: Duration,

    /// LoadBalancer addresses are assigned. `None` means provisioning
    /// never completes.
    pub gateway_after: Option<Duration>,
}

impl Default for FakeTimings {
    fn default() -> Self {
        FakeTimings {
            reconcile_after: Duration::from_secs(30),
            pipeline_created_after: Some(Duration::from_secs(60)),
            pipeline: PipelineOutcome::Succeeds {
                after: Duration::from_secs(120),
            },
            rollout_after: Duration::from_secs(180),
            gateway_after: Some(Duration::from_secs(200)),
        }
    }
}

#[derive(Default)]
struct FakeState {
    applied: BTreeMap<(String, String), Value>,
    submitted_at: Option<Instant>,
    query_log: Vec<String>,
    queried_kinds: Vec<&'static str>,
}

/// In-memory control plane with scripted convergence.
pub struct FakeControlPlane {
    timings: FakeTimings,
    reject_reason: Option<String>,
    transient_failures: AtomicU32,
    state: Mutex<FakeState>,
}

impl FakeControlPlane {
    pub fn new(timings: FakeTimings) -> Self {
        FakeControlPlane {
            timings,
            reject_reason: None,
            transient_failures: AtomicU32::new(0),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// A cluster that converges quickly with default timings.
    pub fn responsive() -> Self {
        FakeControlPlane::new(FakeTimings::default())
    }

    /// A cluster that rejects every submission.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        FakeControlPlane {
            timings: FakeTimings::default(),
            reject_reason: Some(reason.into()),
            transient_failures: AtomicU32::new(0),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Fail the first `n` queries with a transient error.
    pub fn with_transient_failures(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Number of documents applied so far.
    pub fn applied_count(&self) -> usize {
        self.state.lock().unwrap().applied.len()
    }

    /// The applied document for a kind/name, if any.
    pub fn applied(&self, kind: ResourceKind, name: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .applied
            .get(&(kind.kind.to_string(), name.to_string()))
            .cloned()
    }

    /// Whether any query ever targeted the given kind.
    pub fn was_queried(&self, kind: ResourceKind) -> bool {
        self.state
            .lock()
            .unwrap()
            .queried_kinds
            .iter()
            .any(|k| *k == kind.kind)
    }

    /// Every query selector, in order.
    pub fn query_log(&self) -> Vec<String> {
        self.state.lock().unwrap().query_log.clone()
    }

    /// Query selectors with consecutive duplicates collapsed; the shape of
    /// the bring-up's stage sequence.
    pub fn query_stages(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for entry in self.state.lock().unwrap().query_log.iter() {
            if out.last().map(String::as_str) != Some(entry.as_str()) {
                out.push(entry.clone());
            }
        }
        out
    }

    fn elapsed(&self, state: &FakeState) -> Duration {
        state
            .submitted_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    fn pipeline_views(&self, selector: &ResourceSelector, elapsed: Duration) -> Vec<ResourceView> {
        let Some(created_after) = self.timings.pipeline_created_after else {
            return Vec::new();
        };
        if elapsed < created_after {
            return Vec::new();
        }

        let name = format!("{PIPELINE_RUN_PREFIX}fk2p9");
        let labels = json!({"quarry.dev/pipeline": "image-build"});
        if !selector.matches(&name, &labels) {
            return Vec::new();
        }

        let conditions = match self.timings.pipeline {
            PipelineOutcome::Succeeds { after } if elapsed >= after => {
                json!([{"type": "Succeeded", "status": "True", "message": "all tasks completed"}])
            }
            PipelineOutcome::Fails { after } if elapsed >= after => {
                json!([{"type": "Succeeded", "status": "False", "message": "task image-build failed"}])
            }
            _ => json!([{"type": "Succeeded", "status": "Unknown", "message": "running"}]),
        };

        vec![ResourceView::new(
            name.clone(),
            json!({
                "apiVersion": kinds::PIPELINE_RUN.api_version(),
                "kind": kinds::PIPELINE_RUN.kind,
                "metadata": {"name": name, "labels": labels},
                "status": {"conditions": conditions},
            }),
        )]
    }

    fn decorate(&self, kind: ResourceKind, doc: &Value, elapsed: Duration, lb_index: usize) -> Value {
        let mut doc = doc.clone();

        match kind.kind {
            "Kustomization" | "GitRepository" => {
                let ready = elapsed >= self.timings.reconcile_after;
                doc["status"] = json!({
                    "conditions": [{
                        "type": "Ready",
                        "status": if ready { "True" } else { "False" },
                        "message": if ready { "Applied revision" } else { "reconciliation in progress" },
                    }]
                });
            }
            "Deployment" => {
                let desired = doc["spec"]["replicas"].as_i64().unwrap_or(1);
                let rolled = elapsed >= self.timings.rollout_after;
                doc["metadata"]["generation"] = json!(1);
                doc["status"] = json!({
                    "observedGeneration": 1,
                    "updatedReplicas": desired,
                    "readyReplicas": if rolled { desired } else { 0 },
                    "availableReplicas": if rolled { desired } else { 0 },
                });
            }
            "Service" => {
                let is_lb = doc["spec"]["type"] == json!("LoadBalancer");
                if is_lb {
                    if let Some(after) = self.timings.gateway_after {
                        if elapsed >= after {
                            doc["status"] = json!({
                                "loadBalancer": {
                                    "ingress": [{"ip": format!("203.0.113.{}", 10 + lb_index)}]
                                }
                            });
                        }
                    }
                }
            }
            _ => {}
        }

        doc
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn apply(&self, document: &Value) -> Result<(), ClusterError> {
        let kind = ResourceKind::of_document(document).map(|k| k.kind).unwrap_or("<unknown>");
        let name = document_name(document).unwrap_or("<unnamed>").to_string();

        if let Some(reason) = &self.reject_reason {
            return Err(ClusterError::Rejected {
                kind: kind.to_string(),
                name,
                reason: reason.clone(),
            });
        }

        let mut state = self.state.lock().unwrap();
        if state.submitted_at.is_none() {
            state.submitted_at = Some(Instant::now());
        }
        state
            .applied
            .insert((kind.to_string(), name), document.clone());
        Ok(())
    }

    async fn query(&self, selector: &ResourceSelector) -> Result<Vec<ResourceView>, ClusterError> {
        {
            let mut state = self.state.lock().unwrap();
            state.query_log.push(selector.to_string());
            state.queried_kinds.push(selector.kind.kind);
        }

        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ClusterError::query(std::io::Error::other(
                "control plane temporarily unreachable",
            )));
        }

        let state = self.state.lock().unwrap();
        let elapsed = self.elapsed(&state);

        // Pipeline runs are created by an external trigger, never applied.
        if selector.kind == kinds::PIPELINE_RUN {
            return Ok(self.pipeline_views(selector, elapsed));
        }

        // Stable load-balancer address assignment: index among applied
        // LoadBalancer services in name order.
        let lb_names: Vec<&String> = state
            .applied
            .iter()
            .filter(|((kind, _), doc)| {
                kind.as_str() == "Service" && doc["spec"]["type"] == json!("LoadBalancer")
            })
            .map(|((_, name), _)| name)
            .collect();

        let views = state
            .applied
            .iter()
            .filter(|((kind, _), _)| kind.as_str() == selector.kind.kind)
            .filter(|((_, name), doc)| {
                selector.matches(name, doc["metadata"].get("labels").unwrap_or(&Value::Null))
            })
            .map(|((_, name), doc)| {
                let lb_index = lb_names.iter().position(|n| *n == name).unwrap_or(0);
                ResourceView::new(name.clone(), self.decorate(selector.kind, doc, elapsed, lb_index))
            })
            .collect();

        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn layers_become_ready_after_the_configured_delay() {
        let fake = FakeControlPlane::responsive();
        let doc = json!({
            "apiVersion": "kustomize.toolkit.fluxcd.io/v1",
            "kind": "Kustomization",
            "metadata": {"name": "quarry-core", "labels": {}},
            "spec": {"path": "./overlays/default"},
        });
        fake.apply(&doc).await.unwrap();

        let selector = ResourceSelector::exact(kinds::KUSTOMIZATION, "quarry-core");

        let before = fake.query(&selector).await.unwrap();
        assert_eq!(before[0].condition_status("Ready"), Some("False"));

        tokio::time::sleep(Duration::from_secs(31)).await;
        let after = fake.query(&selector).await.unwrap();
        assert_eq!(after[0].condition_status("Ready"), Some("True"));
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_appears_then_completes() {
        let fake = FakeControlPlane::responsive();
        fake.apply(&json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "seed", "labels": {}},
            "data": {},
        }))
        .await
        .unwrap();

        let by_prefix = ResourceSelector::prefix(kinds::PIPELINE_RUN, PIPELINE_RUN_PREFIX);
        assert!(fake.query(&by_prefix).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(61)).await;
        let created = fake.query(&by_prefix).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].condition_status("Succeeded"), Some("Unknown"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        let by_label =
            ResourceSelector::labels(kinds::PIPELINE_RUN, "quarry.dev/pipeline=image-build");
        let done = fake.query(&by_label).await.unwrap();
        assert_eq!(done[0].condition_status("Succeeded"), Some("True"));
    }

    #[tokio::test]
    async fn rejecting_cluster_rejects_everything() {
        let fake = FakeControlPlane::rejecting("admission webhook denied");
        let err = fake
            .apply(&json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {"name": "svc"},
            }))
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(fake.applied_count(), 0);
    }
}

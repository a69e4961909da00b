//! Readiness polling primitives.
//!
//! Every wait in the bring-up goes through [`ReadinessPoller::wait_for`]:
//! query the control plane for a selector, evaluate a condition against
//! what came back, and repeat at a fixed interval until the condition holds
//! or the deadline elapses. There is no exponential backoff: bring-up
//! waits are bounded by wall-clock deadlines, not request volume, so
//! backing off only slows detection.
//!
//! "Resource not found yet" is a normal intermediate state. So is a failed
//! control-plane query: transient hiccups are retried transparently up to
//! the same deadline. The only terminal outcomes are the condition holding,
//! the condition reporting an explicit failure, or the deadline expiring.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use quarry_cluster::{ControlPlane, ResourceSelector, ResourceView};

/// A success condition evaluated against the resources a selector matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// At least one matching resource exists.
    Exists,

    /// A named `status.conditions` entry reports `True` on some matching
    /// resource.
    ///
    /// With `fail_on_false` set, an explicit `False` is a terminal failure
    /// (pipeline completion); without it, `False` is just not-yet-ready
    /// (reconciliation conditions flap while converging).
    StatusTrue {
        condition: String,
        fail_on_false: bool,
    },

    /// A Deployment's rollout has fully progressed: the controller has
    /// observed the current generation and updated, ready, and available
    /// replicas all match the desired count.
    RolloutComplete,
}

impl Condition {
    /// Named status condition that must become `True`; `False` keeps
    /// polling.
    pub fn status_true(condition: impl Into<String>) -> Condition {
        Condition::StatusTrue {
            condition: condition.into(),
            fail_on_false: false,
        }
    }

    /// Named status condition where `False` is a terminal failure.
    pub fn terminal_status(condition: impl Into<String>) -> Condition {
        Condition::StatusTrue {
            condition: condition.into(),
            fail_on_false: true,
        }
    }

    /// Evaluate against the current resource views.
    pub fn evaluate(&self, views: &[ResourceView]) -> ConditionEval {
        match self {
            Condition::Exists => {
                if views.is_empty() {
                    ConditionEval::Pending("no matching resource yet".to_string())
                } else {
                    ConditionEval::Satisfied
                }
            }
            Condition::StatusTrue {
                condition,
                fail_on_false,
            } => {
                if views.is_empty() {
                    return ConditionEval::Pending("no matching resource yet".to_string());
                }
                for view in views {
                    match view.condition_status(condition) {
                        Some("True") => return ConditionEval::Satisfied,
                        Some("False") if *fail_on_false => {
                            let message = view
                                .condition_message(condition)
                                .unwrap_or("no message")
                                .to_string();
                            return ConditionEval::Failed(format!(
                                "{} reported {condition}=False: {message}",
                                view.name
                            ));
                        }
                        _ => {}
                    }
                }
                ConditionEval::Pending(format!("condition {condition} not yet True"))
            }
            Condition::RolloutComplete => {
                if views.is_empty() {
                    return ConditionEval::Pending("no matching resource yet".to_string());
                }
                for view in views {
                    if let Some(reason) = rollout_pending_reason(view) {
                        return ConditionEval::Pending(format!("{}: {reason}", view.name));
                    }
                }
                ConditionEval::Satisfied
            }
        }
    }
}

/// Outcome of one condition evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionEval {
    /// The condition holds; the wait is over.
    Satisfied,

    /// Not there yet; keep polling.
    Pending(String),

    /// The resource reached a terminal failure state; polling further
    /// cannot succeed.
    Failed(String),
}

/// Why a Deployment's rollout is not yet complete, if it isn't.
fn rollout_pending_reason(view: &ResourceView) -> Option<String> {
    let desired = view
        .path("spec.replicas")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(1);
    let generation = view
        .path("metadata.generation")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0);
    let observed = view
        .path("status.observedGeneration")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0);
    if observed < generation {
        return Some(format!(
            "generation {generation} not yet observed (at {observed})"
        ));
    }

    for field in ["updatedReplicas", "readyReplicas", "availableReplicas"] {
        let actual = view
            .path(&format!("status.{field}"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);
        if actual != desired {
            return Some(format!("{field} {actual}/{desired}"));
        }
    }

    None
}

/// One blocking wait: a selector, a success condition, and a deadline.
///
/// Deadlines are bounded by default; `deadline: None` is an explicit
/// opt-in to an unbounded wait and should be rare.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    pub selector: ResourceSelector,
    pub condition: Condition,
    pub deadline: Option<Duration>,
}

impl ReadinessGate {
    pub fn new(
        selector: ResourceSelector,
        condition: Condition,
        deadline: Option<Duration>,
    ) -> Self {
        ReadinessGate {
            selector,
            condition,
            deadline,
        }
    }
}

/// Terminal wait outcomes.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The deadline elapsed before the condition held.
    #[error("timed out after {waited:?} waiting for {selector}")]
    TimedOut { selector: String, waited: Duration },

    /// The condition reported a terminal failure.
    #[error("{selector} failed: {reason}")]
    Failed { selector: String, reason: String },
}

/// Fixed-interval readiness poller.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    interval: Duration,
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        ReadinessPoller {
            interval: Duration::from_secs(5),
        }
    }
}

impl ReadinessPoller {
    pub fn new(interval: Duration) -> Self {
        ReadinessPoller { interval }
    }

    /// Block until the gate's condition holds, fails, or the deadline
    /// elapses.
    ///
    /// The final poll lands exactly on the deadline, so a condition that
    /// became true strictly before it is always observed.
    pub async fn wait_for(
        &self,
        cluster: &dyn ControlPlane,
        gate: &ReadinessGate,
    ) -> Result<(), WaitError> {
        let started = tokio::time::Instant::now();
        debug!(selector = %gate.selector, deadline = ?gate.deadline, "waiting");

        loop {
            match cluster.query(&gate.selector).await {
                Ok(views) => match gate.condition.evaluate(&views) {
                    ConditionEval::Satisfied => {
                        debug!(
                            selector = %gate.selector,
                            waited = ?started.elapsed(),
                            "ready"
                        );
                        return Ok(());
                    }
                    ConditionEval::Failed(reason) => {
                        return Err(WaitError::Failed {
                            selector: gate.selector.to_string(),
                            reason,
                        });
                    }
                    ConditionEval::Pending(reason) => {
                        trace!(selector = %gate.selector, %reason, "not ready");
                    }
                },
                // Transient control-plane hiccups must not abort a
                // multi-minute bring-up; the deadline bounds them.
                Err(err) => {
                    warn!(selector = %gate.selector, error = %err, "query failed, will retry");
                }
            }

            let waited = started.elapsed();
            match gate.deadline {
                Some(deadline) if waited >= deadline => {
                    return Err(WaitError::TimedOut {
                        selector: gate.selector.to_string(),
                        waited,
                    });
                }
                Some(deadline) => {
                    tokio::time::sleep(self.interval.min(deadline - waited)).await;
                }
                None => {
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;

    use quarry_cluster::{kinds, ClusterError, ControlPlane};

    /// Control plane that replays a scripted sequence of query results,
    /// then repeats the last one forever.
    struct ScriptedCluster {
        responses: Mutex<VecDeque<Result<Vec<ResourceView>, ()>>>,
        last: Mutex<Result<Vec<ResourceView>, ()>>,
    }

    impl ScriptedCluster {
        fn new(responses: Vec<Result<Vec<ResourceView>, ()>>) -> Self {
            ScriptedCluster {
                responses: Mutex::new(responses.into()),
                last: Mutex::new(Ok(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl ControlPlane for ScriptedCluster {
        async fn apply(&self, _document: &serde_json::Value) -> Result<(), ClusterError> {
            Ok(())
        }

        async fn query(
            &self,
            _selector: &ResourceSelector,
        ) -> Result<Vec<ResourceView>, ClusterError> {
            let next = self.responses.lock().unwrap().pop_front();
            let result = match next {
                Some(r) => {
                    *self.last.lock().unwrap() = r.clone();
                    r
                }
                None => self.last.lock().unwrap().clone(),
            };
            result.map_err(|_| ClusterError::query(std::io::Error::other("control plane down")))
        }
    }

    fn ready_view(name: &str, condition: &str) -> ResourceView {
        ResourceView::new(
            name,
            json!({
                "status": {"conditions": [{"type": condition, "status": "True"}]}
            }),
        )
    }

    fn failed_view(name: &str, condition: &str) -> ResourceView {
        ResourceView::new(
            name,
            json!({
                "status": {"conditions": [
                    {"type": condition, "status": "False", "message": "step build exited 1"}
                ]}
            }),
        )
    }

    fn gate(condition: Condition, deadline: Option<Duration>) -> ReadinessGate {
        ReadinessGate::new(
            ResourceSelector::exact(kinds::KUSTOMIZATION, "quarry-core"),
            condition,
            deadline,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_then_ready_within_deadline() {
        // Five polls of nothing, then the resource appears satisfied. None
        // of the intermediate states surface as errors.
        let mut responses: Vec<Result<Vec<ResourceView>, ()>> = vec![Ok(Vec::new()); 5];
        responses.push(Ok(vec![ready_view("quarry-core", "Ready")]));
        let cluster = ScriptedCluster::new(responses);

        let poller = ReadinessPoller::new(Duration::from_secs(1));
        let result = poller
            .wait_for(
                &cluster,
                &gate(Condition::status_true("Ready"), Some(Duration::from_secs(60))),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_query_errors_are_retried() {
        let responses: Vec<Result<Vec<ResourceView>, ()>> = vec![
            Err(()),
            Err(()),
            Ok(vec![ready_view("quarry-core", "Ready")]),
        ];
        let cluster = ScriptedCluster::new(responses);

        let poller = ReadinessPoller::new(Duration::from_secs(1));
        let result = poller
            .wait_for(
                &cluster,
                &gate(Condition::status_true("Ready"), Some(Duration::from_secs(30))),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_times_out() {
        let cluster = ScriptedCluster::new(vec![Ok(Vec::new())]);

        let poller = ReadinessPoller::new(Duration::from_secs(5));
        let result = poller
            .wait_for(
                &cluster,
                &gate(Condition::Exists, Some(Duration::from_secs(17))),
            )
            .await;

        match result {
            Err(WaitError::TimedOut { waited, .. }) => {
                assert_eq!(waited, Duration::from_secs(17));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_aborts_immediately() {
        let responses = vec![
            Ok(Vec::new()),
            Ok(vec![failed_view("quarry-image-build-x", "Succeeded")]),
        ];
        let cluster = ScriptedCluster::new(responses);

        let poller = ReadinessPoller::new(Duration::from_secs(1));
        let result = poller
            .wait_for(
                &cluster,
                &gate(
                    Condition::terminal_status("Succeeded"),
                    Some(Duration::from_secs(600)),
                ),
            )
            .await;

        match result {
            Err(WaitError::Failed { reason, .. }) => {
                assert!(reason.contains("Succeeded=False"));
                assert!(reason.contains("step build exited 1"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn false_without_terminal_semantics_keeps_polling() {
        let responses = vec![
            Ok(vec![ResourceView::new(
                "quarry-core",
                json!({"status": {"conditions": [{"type": "Ready", "status": "False"}]}}),
            )]),
            Ok(vec![ready_view("quarry-core", "Ready")]),
        ];
        let cluster = ScriptedCluster::new(responses);

        let poller = ReadinessPoller::new(Duration::from_secs(1));
        let result = poller
            .wait_for(
                &cluster,
                &gate(Condition::status_true("Ready"), Some(Duration::from_secs(30))),
            )
            .await;

        assert!(result.is_ok());
    }

    /// Ready iff the condition becomes true strictly before the deadline,
    /// across interval/deadline combinations.
    #[rstest]
    #[case(1, 10, 4, true)]
    #[case(5, 10, 4, true)]
    #[case(7, 10, 9, true)]
    #[case(3, 10, 11, false)]
    #[case(1, 10, 25, false)]
    #[case(60, 10, 4, true)]
    #[tokio::test(start_paused = true)]
    async fn ready_iff_true_strictly_before_deadline(
        #[case] interval_secs: u64,
        #[case] deadline_secs: u64,
        #[case] true_after_secs: u64,
        #[case] expect_ready: bool,
    ) {
        struct TimedCluster {
            started: tokio::time::Instant,
            true_after: Duration,
        }

        #[async_trait]
        impl ControlPlane for TimedCluster {
            async fn apply(&self, _document: &serde_json::Value) -> Result<(), ClusterError> {
                Ok(())
            }

            async fn query(
                &self,
                _selector: &ResourceSelector,
            ) -> Result<Vec<ResourceView>, ClusterError> {
                if self.started.elapsed() >= self.true_after {
                    Ok(vec![ready_view("quarry-core", "Ready")])
                } else {
                    Ok(Vec::new())
                }
            }
        }

        let cluster = TimedCluster {
            started: tokio::time::Instant::now(),
            true_after: Duration::from_secs(true_after_secs),
        };

        let poller = ReadinessPoller::new(Duration::from_secs(interval_secs));
        let result = poller
            .wait_for(
                &cluster,
                &gate(
                    Condition::status_true("Ready"),
                    Some(Duration::from_secs(deadline_secs)),
                ),
            )
            .await;

        if expect_ready {
            assert!(result.is_ok(), "expected ready, got {result:?}");
        } else {
            assert!(
                matches!(result, Err(WaitError::TimedOut { .. })),
                "expected timeout, got {result:?}"
            );
        }
    }

    #[test]
    fn rollout_completion_checks_all_replica_fields() {
        let complete = ResourceView::new(
            "quarry-cas",
            json!({
                "metadata": {"generation": 2},
                "spec": {"replicas": 3},
                "status": {
                    "observedGeneration": 2,
                    "updatedReplicas": 3,
                    "readyReplicas": 3,
                    "availableReplicas": 3,
                }
            }),
        );
        assert_eq!(
            Condition::RolloutComplete.evaluate(&[complete]),
            ConditionEval::Satisfied
        );

        let lagging = ResourceView::new(
            "quarry-worker",
            json!({
                "metadata": {"generation": 2},
                "spec": {"replicas": 3},
                "status": {
                    "observedGeneration": 2,
                    "updatedReplicas": 3,
                    "readyReplicas": 2,
                    "availableReplicas": 2,
                }
            }),
        );
        assert!(matches!(
            Condition::RolloutComplete.evaluate(&[lagging]),
            ConditionEval::Pending(_)
        ));

        let stale = ResourceView::new(
            "quarry-scheduler",
            json!({
                "metadata": {"generation": 3},
                "spec": {"replicas": 1},
                "status": {
                    "observedGeneration": 2,
                    "updatedReplicas": 1,
                    "readyReplicas": 1,
                    "availableReplicas": 1,
                }
            }),
        );
        assert!(matches!(
            Condition::RolloutComplete.evaluate(&[stale]),
            ConditionEval::Pending(_)
        ));
    }
}

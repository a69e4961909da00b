//! The dependency-ordered bring-up state machine.
//!
//! One state per stage, strictly sequential, forward-only transitions. A
//! stage that times out or fails aborts the whole run; there is no
//! partial-success path, because a partially-ready cluster cannot safely
//! serve the smoke test.

use std::time::Duration;

use serde_json::json;
use tracing::info;

use quarry_cluster::{kinds, ControlPlane, ResourceSelector};
use quarry_compose::Manifest;
use quarry_readiness::{Condition, ReadinessGate, ReadinessPoller, WaitError};
use quarry_topology::{
    Tier, Topology, CONFIGMAPS_LAYER, CORE_LAYER, PIPELINE_RUN_LABEL, PIPELINE_RUN_PREFIX,
    STACK_LAYER,
};

use crate::error::{BringupError, BringupResult};

/// The bring-up stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Submit the composed configuration.
    Submit,
    /// Core resource set reconciled.
    CoreReconciled,
    /// Image-build pipeline run created by the upstream trigger.
    PipelineCreated,
    /// Pipeline run reached its terminal Succeeded condition.
    PipelineCompleted,
    /// Generated configuration reconciled.
    ConfigReconciled,
    /// Top-level application reconciled.
    StackReconciled,
    /// Storage tier rollout fully progressed.
    StorageRollout,
    /// Scheduler tier rollout fully progressed.
    SchedulerRollout,
    /// Worker tier rollout fully progressed.
    WorkerRollout,
}

impl Stage {
    /// All stages, in order.
    pub const ALL: [Stage; 9] = [
        Stage::Submit,
        Stage::CoreReconciled,
        Stage::PipelineCreated,
        Stage::PipelineCompleted,
        Stage::ConfigReconciled,
        Stage::StackReconciled,
        Stage::StorageRollout,
        Stage::SchedulerRollout,
        Stage::WorkerRollout,
    ];

    /// The next stage, if any. There are no backward transitions.
    pub fn next(self) -> Option<Stage> {
        let index = Stage::ALL.iter().position(|s| *s == self)?;
        Stage::ALL.get(index + 1).copied()
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::Submit => "submit-configuration",
            Stage::CoreReconciled => "core-reconciliation",
            Stage::PipelineCreated => "pipeline-creation",
            Stage::PipelineCompleted => "pipeline-completion",
            Stage::ConfigReconciled => "config-reconciliation",
            Stage::StackReconciled => "stack-reconciliation",
            Stage::StorageRollout => "storage-rollout",
            Stage::SchedulerRollout => "scheduler-rollout",
            Stage::WorkerRollout => "worker-rollout",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-stage deadlines plus the poll interval.
///
/// Every deadline is bounded by default. The pipeline-creation wait is the
/// only one that may be unbounded, and only by explicit opt-in
/// (`pipeline_created: None`): creation timing depends on an upstream
/// image-build trigger outside this orchestrator's control.
#[derive(Debug, Clone)]
pub struct BringupTimeouts {
    pub core: Duration,
    pub pipeline_created: Option<Duration>,
    pub pipeline_completed: Duration,
    pub config: Duration,
    pub stack: Duration,
    pub rollout: Duration,
}

impl Default for BringupTimeouts {
    fn default() -> Self {
        BringupTimeouts {
            core: Duration::from_secs(15 * 60),
            pipeline_created: Some(Duration::from_secs(10 * 60)),
            pipeline_completed: Duration::from_secs(45 * 60),
            config: Duration::from_secs(10 * 60),
            stack: Duration::from_secs(15 * 60),
            rollout: Duration::from_secs(10 * 60),
        }
    }
}

/// Wall-clock record of a completed run, stage by stage.
#[derive(Debug, Default)]
pub struct BringupReport {
    timings: Vec<(Stage, Duration)>,
}

impl BringupReport {
    fn record(&mut self, stage: Stage, elapsed: Duration) {
        self.timings.push((stage, elapsed));
    }

    /// Stages in the order they completed.
    pub fn stages(&self) -> Vec<Stage> {
        self.timings.iter().map(|(s, _)| *s).collect()
    }

    /// Stage timings in completion order.
    pub fn timings(&self) -> &[(Stage, Duration)] {
        &self.timings
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "stages": self
                .timings
                .iter()
                .map(|(stage, elapsed)| {
                    json!({
                        "stage": stage.to_string(),
                        "elapsed_secs": elapsed.as_secs_f64(),
                    })
                })
                .collect::<Vec<_>>(),
        })
    }
}

/// Drives the bring-up stages against a control plane.
pub struct Orchestrator<'a> {
    cluster: &'a dyn ControlPlane,
    topology: &'a Topology,
    poller: ReadinessPoller,
    timeouts: BringupTimeouts,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        cluster: &'a dyn ControlPlane,
        topology: &'a Topology,
        poller: ReadinessPoller,
        timeouts: BringupTimeouts,
    ) -> Self {
        Orchestrator {
            cluster,
            topology,
            poller,
            timeouts,
        }
    }

    /// Run every stage in order. Each stage must fully succeed before the
    /// next starts; the first failure aborts the run.
    pub async fn run(&self, manifest: &Manifest) -> BringupResult<BringupReport> {
        let mut report = BringupReport::default();
        let mut stage = Some(Stage::Submit);

        while let Some(current) = stage {
            let started = tokio::time::Instant::now();
            info!(stage = %current, "starting stage");
            self.run_stage(current, manifest).await?;
            let elapsed = started.elapsed();
            info!(stage = %current, elapsed = ?elapsed, "stage complete");
            report.record(current, elapsed);
            stage = current.next();
        }

        Ok(report)
    }

    async fn run_stage(&self, stage: Stage, manifest: &Manifest) -> BringupResult<()> {
        match self.gate(stage)? {
            None => self.submit(manifest).await,
            Some(gate) => self
                .poller
                .wait_for(self.cluster, &gate)
                .await
                .map_err(|err| match err {
                    WaitError::TimedOut { selector, waited } => BringupError::StageTimedOut {
                        stage,
                        selector,
                        waited,
                    },
                    WaitError::Failed { reason, .. } => BringupError::StageFailed { stage, reason },
                }),
        }
    }

    /// Submit every document of the composed configuration. Acceptance
    /// only schedules reconciliation; readiness is what the later stages
    /// wait for.
    async fn submit(&self, manifest: &Manifest) -> BringupResult<()> {
        for document in manifest.resources() {
            self.cluster
                .apply(document)
                .await
                .map_err(BringupError::RejectedConfiguration)?;
        }
        info!(documents = manifest.resources().len(), "configuration submitted");
        Ok(())
    }

    /// The readiness gate for a wait stage; `None` for the submit stage.
    fn gate(&self, stage: Stage) -> BringupResult<Option<ReadinessGate>> {
        let gate = match stage {
            Stage::Submit => return Ok(None),
            Stage::CoreReconciled => ReadinessGate::new(
                ResourceSelector::exact(kinds::KUSTOMIZATION, CORE_LAYER),
                Condition::status_true("Ready"),
                Some(self.timeouts.core),
            ),
            Stage::PipelineCreated => ReadinessGate::new(
                ResourceSelector::prefix(kinds::PIPELINE_RUN, PIPELINE_RUN_PREFIX),
                Condition::Exists,
                self.timeouts.pipeline_created,
            ),
            Stage::PipelineCompleted => ReadinessGate::new(
                ResourceSelector::labels(kinds::PIPELINE_RUN, PIPELINE_RUN_LABEL),
                Condition::terminal_status("Succeeded"),
                Some(self.timeouts.pipeline_completed),
            ),
            Stage::ConfigReconciled => ReadinessGate::new(
                ResourceSelector::exact(kinds::KUSTOMIZATION, CONFIGMAPS_LAYER),
                Condition::status_true("Ready"),
                Some(self.timeouts.config),
            ),
            Stage::StackReconciled => ReadinessGate::new(
                ResourceSelector::exact(kinds::KUSTOMIZATION, STACK_LAYER),
                Condition::status_true("Ready"),
                Some(self.timeouts.stack),
            ),
            Stage::StorageRollout => self.rollout_gate(Tier::Storage)?,
            Stage::SchedulerRollout => self.rollout_gate(Tier::Scheduler)?,
            Stage::WorkerRollout => self.rollout_gate(Tier::Worker)?,
        };
        Ok(Some(gate))
    }

    fn rollout_gate(&self, tier: Tier) -> BringupResult<ReadinessGate> {
        let unit = self.topology.unit(tier)?;
        Ok(ReadinessGate::new(
            ResourceSelector::exact(kinds::DEPLOYMENT, unit.name.clone()),
            Condition::RolloutComplete,
            Some(self.timeouts.rollout),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_advance_forward_only_and_cover_all() {
        let mut walked = vec![Stage::Submit];
        while let Some(next) = walked.last().unwrap().next() {
            walked.push(next);
        }
        assert_eq!(walked, Stage::ALL);
    }

    #[test]
    fn final_stage_has_no_successor() {
        assert_eq!(Stage::WorkerRollout.next(), None);
    }

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(Stage::Submit.to_string(), "submit-configuration");
        assert_eq!(Stage::PipelineCompleted.to_string(), "pipeline-completion");
        assert_eq!(Stage::WorkerRollout.to_string(), "worker-rollout");
    }

    #[test]
    fn default_timeouts_are_bounded() {
        let timeouts = BringupTimeouts::default();
        assert!(timeouts.pipeline_created.is_some());
        assert_eq!(timeouts.pipeline_completed, Duration::from_secs(45 * 60));
    }
}

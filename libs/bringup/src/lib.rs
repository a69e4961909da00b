//! Bring-up and validation of the quarry build grid.
//!
//! The flow is strictly linear and blocking: submit the composed
//! configuration, walk the readiness stages in dependency order, resolve
//! the gateway addresses, then drive one real build request through the
//! live system. Each step must fully succeed before the next starts, and
//! no stage is retried once its own deadline is exceeded; the whole run
//! fails instead. Cleanup is out of scope, since bring-up runs against
//! disposable clusters.

pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod smoke;

pub use error::{BringupError, BringupResult};
pub use gateway::{resolve_gateways, GatewayEndpoints};
pub use orchestrator::{BringupReport, BringupTimeouts, Orchestrator, Stage};
pub use smoke::{SmokeTest, DEFAULT_INSTANCE};

use std::time::Duration;

use quarry_cluster::ControlPlane;
use quarry_compose::Manifest;
use quarry_readiness::ReadinessPoller;
use quarry_topology::Topology;

/// Everything one run needs.
#[derive(Debug)]
pub struct BringupPlan {
    pub topology: Topology,
    pub manifest: Manifest,
    pub timeouts: BringupTimeouts,
    pub poll_interval: Duration,

    /// `None` stops after gateway resolution.
    pub smoke: Option<SmokeTest>,
}

/// What a successful run produced.
#[derive(Debug)]
pub struct BringupOutcome {
    pub report: BringupReport,
    pub endpoints: GatewayEndpoints,
}

/// Execute a full run: submit, orchestrate, resolve, smoke-test.
pub async fn execute(
    cluster: &dyn ControlPlane,
    plan: &BringupPlan,
) -> BringupResult<BringupOutcome> {
    let poller = ReadinessPoller::new(plan.poll_interval);
    let orchestrator = Orchestrator::new(cluster, &plan.topology, poller, plan.timeouts.clone());

    let report = orchestrator.run(&plan.manifest).await?;
    let endpoints = resolve_gateways(cluster, &plan.topology).await?;

    if let Some(smoke) = &plan.smoke {
        smoke.run(&endpoints).await?;
    }

    Ok(BringupOutcome { report, endpoints })
}

//! End-to-end happy path.
//!
//! Drives the complete bring-up against a fake control plane that
//! reconciles all resources within five minutes and whose image-build
//! pipeline succeeds within ten, then verifies:
//!
//! 1. The configuration is submitted in full
//! 2. All nine stages complete, in dependency order
//! 3. Both gateway addresses resolve non-empty
//! 4. The smoke probe passes
//!
//! ## Running
//!
//! ```bash
//! cargo test -p quarry-e2e --test bringup_flow
//! ```

use std::time::Duration;

use quarry_bringup::{execute, BringupPlan, BringupTimeouts, SmokeTest, Stage};
use quarry_compose::{compose, SourceOverrides};
use quarry_testing::{FakeControlPlane, FakeTimings, PipelineOutcome};
use quarry_topology::Topology;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

#[tokio::test(start_paused = true)]
async fn e2e_bringup_happy_path() {
    init_tracing();

    // Composition: standard topology, the documented override set.
    let topology = Topology::standard("quarry");
    let overrides = SourceOverrides {
        overlay: Some("lre".to_string()),
        repo_url: Some("https://github.com/quarry-build/quarry-deploy".to_string()),
        branch: Some("main".to_string()),
        commit: Some("4f2c1aa9".to_string()),
        ..Default::default()
    };
    let patches = overrides.into_patches(&topology).unwrap();
    let manifest = compose(&topology, &patches).unwrap();
    let document_count = manifest.resources().len();

    // A cluster that reconciles within 5 minutes and whose pipeline
    // succeeds within 10.
    let fake = FakeControlPlane::new(FakeTimings {
        reconcile_after: Duration::from_secs(2 * 60),
        pipeline_created_after: Some(Duration::from_secs(3 * 60)),
        pipeline: PipelineOutcome::Succeeds {
            after: Duration::from_secs(9 * 60),
        },
        rollout_after: Duration::from_secs(10 * 60),
        gateway_after: Some(Duration::from_secs(10 * 60)),
    });

    let plan = BringupPlan {
        topology,
        manifest,
        timeouts: BringupTimeouts::default(),
        poll_interval: Duration::from_secs(5),
        smoke: Some(SmokeTest {
            program: "true".to_string(),
            args: Vec::new(),
            instance: "main".to_string(),
        }),
    };

    let outcome = execute(&fake, &plan).await.expect("bring-up should succeed");

    // Every document was accepted.
    assert_eq!(fake.applied_count(), document_count);

    // All stages, in fixed order.
    assert_eq!(outcome.report.stages(), Stage::ALL.to_vec());

    // Both gateways resolved to non-empty, routable endpoints.
    assert_eq!(outcome.endpoints.cache, "grpc://203.0.113.10:50051");
    assert_eq!(outcome.endpoints.scheduler, "grpc://203.0.113.11:50052");
}

#[tokio::test(start_paused = true)]
async fn e2e_bringup_survives_transient_control_plane_errors() {
    init_tracing();

    let topology = Topology::standard("quarry");
    let manifest = compose(&topology, &[]).unwrap();

    let fake = FakeControlPlane::responsive().with_transient_failures(4);

    let plan = BringupPlan {
        topology,
        manifest,
        timeouts: BringupTimeouts::default(),
        poll_interval: Duration::from_secs(5),
        smoke: None,
    };

    let outcome = execute(&fake, &plan).await.expect("bring-up should succeed");
    assert_eq!(outcome.report.stages().len(), Stage::ALL.len());
}

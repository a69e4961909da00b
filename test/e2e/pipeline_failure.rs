//! End-to-end pipeline failure.
//!
//! Same setup as the happy path, but the image-build pipeline reaches
//! `Succeeded=False`. The run must abort at the pipeline-completion stage,
//! before the generated-configuration wait, and the gateway addresses must
//! never be queried.

use std::time::Duration;

use quarry_bringup::{execute, BringupError, BringupPlan, BringupTimeouts, SmokeTest, Stage};
use quarry_cluster::kinds;
use quarry_compose::{compose, SourceOverrides};
use quarry_testing::{FakeControlPlane, FakeTimings, PipelineOutcome};
use quarry_topology::Topology;

#[tokio::test(start_paused = true)]
async fn e2e_pipeline_failure_aborts_the_run() {
    let topology = Topology::standard("quarry");
    let overrides = SourceOverrides {
        overlay: Some("lre".to_string()),
        ..Default::default()
    };
    let patches = overrides.into_patches(&topology).unwrap();
    let manifest = compose(&topology, &patches).unwrap();

    let fake = FakeControlPlane::new(FakeTimings {
        reconcile_after: Duration::from_secs(2 * 60),
        pipeline_created_after: Some(Duration::from_secs(3 * 60)),
        pipeline: PipelineOutcome::Fails {
            after: Duration::from_secs(4 * 60),
        },
        ..FakeTimings::default()
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

    let err = execute(&fake, &plan).await.expect_err("run must abort");

    match err {
        BringupError::StageFailed { stage, reason } => {
            assert_eq!(stage, Stage::PipelineCompleted);
            assert!(reason.contains("Succeeded=False"), "reason: {reason}");
        }
        other => panic!("expected StageFailed, got {other:?}"),
    }

    // The run stopped before the generated-configuration wait...
    assert!(!fake
        .query_log()
        .iter()
        .any(|q| q == "Kustomization/quarry-configmaps"));

    // ...and the gateway addresses were never queried.
    assert!(!fake.was_queried(kinds::SERVICE));
}

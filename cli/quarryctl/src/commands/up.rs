//! Up command: the full bring-up.
//!
//! Composes the configuration, submits it, walks the readiness stages in
//! dependency order, resolves the gateways, and runs the smoke test. Exits
//! non-zero the moment any of that fails; there is no partial-success
//! path and no cleanup (bring-up targets disposable clusters).

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use serde_json::json;
use tabled::Tabled;
use tracing::info;

use quarry_bringup::{execute, BringupPlan, BringupTimeouts, SmokeTest, DEFAULT_INSTANCE};
use quarry_cluster::KubeControlPlane;

use crate::output::{print_output, print_single, print_success, OutputFormat};

use super::{CommandContext, ComposeArgs};

/// Bring up the full stack and run the smoke test.
#[derive(Debug, Args)]
pub struct UpCommand {
    #[command(flatten)]
    pub compose: ComposeArgs,

    /// Seconds between readiness polls.
    #[arg(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Deadline for core reconciliation (seconds).
    #[arg(long, default_value_t = 900)]
    pub core_timeout_secs: u64,

    /// Deadline for pipeline-run creation (seconds).
    #[arg(long, default_value_t = 600)]
    pub pipeline_create_timeout_secs: u64,

    /// Wait for pipeline-run creation with no deadline.
    ///
    /// Creation timing depends on an upstream image-build trigger; opting
    /// in means a trigger that never fires hangs the run.
    #[arg(long)]
    pub unbounded_pipeline_wait: bool,

    /// Deadline for pipeline completion (seconds).
    #[arg(long, default_value_t = 2700)]
    pub pipeline_timeout_secs: u64,

    /// Deadline for generated-configuration reconciliation (seconds).
    #[arg(long, default_value_t = 600)]
    pub config_timeout_secs: u64,

    /// Deadline for full-stack reconciliation (seconds).
    #[arg(long, default_value_t = 900)]
    pub stack_timeout_secs: u64,

    /// Deadline for each tier rollout (seconds).
    #[arg(long, default_value_t = 600)]
    pub rollout_timeout_secs: u64,

    /// Stop after gateway resolution, skipping the smoke test.
    #[arg(long)]
    pub skip_smoke: bool,

    /// Logical instance name the smoke build runs under.
    #[arg(long, default_value = DEFAULT_INSTANCE)]
    pub instance: String,

    /// Build client program for the smoke test.
    #[arg(long)]
    pub smoke_program: Option<String>,

    /// Smoke argument (repeatable; replaces the default argument list).
    ///
    /// `{cache}`, `{scheduler}`, and `{instance}` are substituted.
    #[arg(long = "smoke-arg", value_name = "ARG")]
    pub smoke_args: Vec<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct StageRow {
    stage: String,
    elapsed: String,
}

impl UpCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let (topology, manifest) = self.compose.build()?;
        info!(
            namespace = %topology.namespace,
            hash = %manifest.hash(),
            documents = manifest.resources().len(),
            "composed configuration"
        );

        let cluster = KubeControlPlane::connect(topology.namespace.clone()).await?;

        let smoke = if self.skip_smoke {
            None
        } else {
            let mut smoke = SmokeTest {
                instance: self.instance.clone(),
                ..SmokeTest::default()
            };
            if let Some(program) = &self.smoke_program {
                smoke.program = program.clone();
            }
            if !self.smoke_args.is_empty() {
                smoke.args = self.smoke_args.clone();
            }
            Some(smoke)
        };

        let plan = BringupPlan {
            topology,
            manifest,
            timeouts: self.timeouts(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            smoke,
        };

        let outcome = execute(&cluster, &plan).await?;

        match ctx.format {
            OutputFormat::Json => {
                print_single(
                    &json!({
                        "report": outcome.report.to_json(),
                        "gateways": outcome.endpoints.to_json(),
                        "smoke": if self.skip_smoke { "skipped" } else { "passed" },
                    }),
                    ctx.format,
                );
            }
            OutputFormat::Table => {
                let rows: Vec<StageRow> = outcome
                    .report
                    .timings()
                    .iter()
                    .map(|(stage, elapsed)| StageRow {
                        stage: stage.to_string(),
                        elapsed: format!("{:.1}s", elapsed.as_secs_f64()),
                    })
                    .collect();
                print_output(&rows, ctx.format);

                println!("cache gateway:     {}", outcome.endpoints.cache);
                println!("scheduler gateway: {}", outcome.endpoints.scheduler);

                if self.skip_smoke {
                    print_success("Bring-up complete (smoke test skipped)");
                } else {
                    print_success("Bring-up complete; smoke test passed");
                }
            }
        }

        Ok(())
    }

    fn timeouts(&self) -> BringupTimeouts {
        BringupTimeouts {
            core: Duration::from_secs(self.core_timeout_secs),
            pipeline_created: if self.unbounded_pipeline_wait {
                None
            } else {
                Some(Duration::from_secs(self.pipeline_create_timeout_secs))
            },
            pipeline_completed: Duration::from_secs(self.pipeline_timeout_secs),
            config: Duration::from_secs(self.config_timeout_secs),
            stack: Duration::from_secs(self.stack_timeout_secs),
            rollout: Duration::from_secs(self.rollout_timeout_secs),
        }
    }
}

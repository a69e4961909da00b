//! Smoke command: run only the end-to-end build probe.

use anyhow::Result;
use clap::Args;

use quarry_bringup::{resolve_gateways, GatewayEndpoints, SmokeTest, DEFAULT_INSTANCE};
use quarry_cluster::KubeControlPlane;
use quarry_topology::Topology;

use crate::output::print_success;

use super::CommandContext;

/// Run only the smoke test against resolved or explicit endpoints.
#[derive(Debug, Args)]
pub struct SmokeCommand {
    /// Cache gateway endpoint. Resolved from the cluster when omitted.
    #[arg(long)]
    pub cache: Option<String>,

    /// Scheduler gateway endpoint. Resolved from the cluster when omitted.
    #[arg(long)]
    pub scheduler: Option<String>,

    /// Namespace the stack is deployed into (for resolution).
    #[arg(long, env = "QUARRY_NAMESPACE", default_value = "quarry")]
    pub namespace: String,

    /// Logical instance name the smoke build runs under.
    #[arg(long, default_value = DEFAULT_INSTANCE)]
    pub instance: String,

    /// Build client program.
    #[arg(long)]
    pub program: Option<String>,

    /// Smoke argument (repeatable; replaces the default argument list).
    #[arg(long = "arg", value_name = "ARG")]
    pub args: Vec<String>,
}

impl SmokeCommand {
    pub async fn run(self, _ctx: CommandContext) -> Result<()> {
        let endpoints = match (&self.cache, &self.scheduler) {
            (Some(cache), Some(scheduler)) => GatewayEndpoints {
                cache: cache.clone(),
                scheduler: scheduler.clone(),
            },
            _ => {
                let topology = Topology::standard(&self.namespace);
                let cluster = KubeControlPlane::connect(self.namespace.clone()).await?;
                resolve_gateways(&cluster, &topology).await?
            }
        };

        let mut smoke = SmokeTest {
            instance: self.instance.clone(),
            ..SmokeTest::default()
        };
        if let Some(program) = &self.program {
            smoke.program = program.clone();
        }
        if !self.args.is_empty() {
            smoke.args = self.args.clone();
        }

        smoke.run(&endpoints).await?;
        print_success("Smoke test passed");

        Ok(())
    }
}

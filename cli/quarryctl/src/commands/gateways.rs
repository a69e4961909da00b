//! Gateways command: resolve the externally reachable endpoints.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use quarry_bringup::resolve_gateways;
use quarry_cluster::KubeControlPlane;
use quarry_topology::Topology;

use crate::output::{print_output, print_single, OutputFormat};

use super::CommandContext;

/// Resolve and print the gateway endpoints.
#[derive(Debug, Args)]
pub struct GatewaysCommand {
    /// Namespace the stack is deployed into.
    #[arg(long, env = "QUARRY_NAMESPACE", default_value = "quarry")]
    pub namespace: String,
}

#[derive(Debug, Serialize, Tabled)]
struct GatewayRow {
    gateway: String,
    endpoint: String,
}

impl GatewaysCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let topology = Topology::standard(&self.namespace);
        let cluster = KubeControlPlane::connect(self.namespace.clone()).await?;

        let endpoints = resolve_gateways(&cluster, &topology).await?;

        match ctx.format {
            OutputFormat::Json => print_single(&endpoints.to_json(), ctx.format),
            OutputFormat::Table => {
                let rows = vec![
                    GatewayRow {
                        gateway: "cache".to_string(),
                        endpoint: endpoints.cache.clone(),
                    },
                    GatewayRow {
                        gateway: "scheduler".to_string(),
                        endpoint: endpoints.scheduler.clone(),
                    },
                ];
                print_output(&rows, ctx.format);
            }
        }

        Ok(())
    }
}

//! Gateway address resolution.
//!
//! The two externally reachable gateways are LoadBalancer services whose
//! address field is populated asynchronously by the control plane's own
//! provisioning. By the time the orchestrator has reported success all
//! declared dependencies are supposed to be satisfied, so a still-empty
//! address is an environment misconfiguration, not something to retry.

use serde_json::{json, Value};
use tracing::info;

use quarry_cluster::{kinds, ControlPlane, ResourceSelector};
use quarry_topology::{GatewaySpec, Topology};

use crate::error::{BringupError, BringupResult};

/// The resolved gateway endpoints the smoke test routes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoints {
    /// Storage-cache gateway.
    pub cache: String,

    /// Scheduler gateway.
    pub scheduler: String,
}

impl GatewayEndpoints {
    pub fn to_json(&self) -> Value {
        json!({
            "cache": self.cache,
            "scheduler": self.scheduler,
        })
    }
}

/// Resolve both gateway addresses.
pub async fn resolve_gateways(
    cluster: &dyn ControlPlane,
    topology: &Topology,
) -> BringupResult<GatewayEndpoints> {
    let cache_spec = topology
        .cache_gateway()
        .ok_or_else(|| BringupError::GatewayUnresolved {
            gateway: "cache".to_string(),
        })?;
    let scheduler_spec =
        topology
            .scheduler_gateway()
            .ok_or_else(|| BringupError::GatewayUnresolved {
                gateway: "scheduler".to_string(),
            })?;

    let cache = resolve_one(cluster, cache_spec).await?;
    let scheduler = resolve_one(cluster, scheduler_spec).await?;

    info!(cache = %cache, scheduler = %scheduler, "gateways resolved");
    Ok(GatewayEndpoints { cache, scheduler })
}

async fn resolve_one(cluster: &dyn ControlPlane, gateway: &GatewaySpec) -> BringupResult<String> {
    let selector = ResourceSelector::exact(kinds::SERVICE, gateway.name.clone());
    let views = cluster.query(&selector).await?;

    let unresolved = || BringupError::GatewayUnresolved {
        gateway: gateway.name.clone(),
    };

    let view = views.first().ok_or_else(unresolved)?;
    let host = view
        .path("status.loadBalancer.ingress.0.ip")
        .and_then(Value::as_str)
        .or_else(|| {
            view.path("status.loadBalancer.ingress.0.hostname")
                .and_then(Value::as_str)
        })
        .filter(|h| !h.is_empty())
        .ok_or_else(unresolved)?;

    Ok(format!("grpc://{host}:{}", gateway.port))
}

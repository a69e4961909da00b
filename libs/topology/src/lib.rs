//! Topology descriptor for the quarry build grid.
//!
//! Declares the three deployable tiers (content-addressable storage,
//! scheduler, worker pool), their peer wiring, and the two externally
//! reachable gateways. This is the static input to the manifest composer;
//! nothing in this crate talks to a cluster.
//!
//! # Invariants
//!
//! - Peer addressing is by stable in-cluster service name, never by pod
//!   address: pods are rescheduled, service names are not.
//! - The worker tier uses a headless service, since individual worker
//!   identity rather than load-balanced access is required.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the source repository resource in the composed manifest.
pub const SOURCE_REPOSITORY: &str = "quarry-source";

/// The three reconciliation layers the bring-up waits on, in order.
pub const CORE_LAYER: &str = "quarry-core";
pub const CONFIGMAPS_LAYER: &str = "quarry-configmaps";
pub const STACK_LAYER: &str = "quarry-stack";

/// Name prefix of the image-build pipeline run. The run is created by an
/// upstream trigger, so only the prefix is known in advance.
pub const PIPELINE_RUN_PREFIX: &str = "quarry-image-build-";

/// Label selector that identifies the image-build pipeline run.
pub const PIPELINE_RUN_LABEL: &str = "quarry.dev/pipeline=image-build";

/// ConfigMap holding the worker configuration file.
pub const WORKER_CONFIG_MAP: &str = "quarry-worker-config";

/// Fixed path the worker configuration file is mounted at.
pub const WORKER_CONFIG_PATH: &str = "/etc/quarry/worker.json";

/// Shared ephemeral directory the worker entrypoint is staged into.
pub const ENTRYPOINT_DIR: &str = "/entrypoint";

/// A deployable tier of the build grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Content-addressable storage service.
    Storage,
    /// Build scheduler service.
    Scheduler,
    /// Worker pool executing scheduled actions.
    Worker,
}

impl Tier {
    /// Tiers in rollout order. Later tiers depend on earlier ones being
    /// addressable.
    pub const ROLLOUT_ORDER: [Tier; 3] = [Tier::Storage, Tier::Scheduler, Tier::Worker];

    /// Short tier name used in CLI flags and patch targets.
    pub fn short_name(&self) -> &'static str {
        match self {
            Tier::Storage => "cas",
            Tier::Scheduler => "scheduler",
            Tier::Worker => "worker",
        }
    }

    /// Stable in-cluster service (and deployment) name for this tier.
    pub fn service_name(&self) -> &'static str {
        match self {
            Tier::Storage => "quarry-cas",
            Tier::Scheduler => "quarry-scheduler",
            Tier::Worker => "quarry-worker",
        }
    }

    /// gRPC listen port for this tier.
    pub fn port(&self) -> u16 {
        match self {
            Tier::Storage => 50051,
            Tier::Scheduler => 50052,
            Tier::Worker => 50061,
        }
    }

    /// Parse a tier from its short name.
    pub fn from_short_name(name: &str) -> Option<Tier> {
        Tier::ROLLOUT_ORDER
            .into_iter()
            .find(|t| t.short_name() == name)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Entrypoint staging performed by an init step before the main worker
/// process starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingSpec {
    /// Path of the executable inside the unit image.
    pub source_path: String,

    /// Shared ephemeral directory the executable is copied into.
    pub shared_dir: String,
}

/// Worker-only deployment surface: a configuration file mounted at a fixed
/// path and an entrypoint staged into a shared pod-local directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerExtras {
    /// ConfigMap the worker configuration file is rendered from.
    pub config_map: String,

    /// Mount path of the configuration file.
    pub config_path: String,

    /// Entrypoint staging step.
    pub staging: StagingSpec,
}

/// One deployable unit of the stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    /// Deployment and service name.
    pub name: String,

    /// Which tier this unit implements.
    pub tier: Tier,

    /// Desired replica count.
    pub replicas: i32,

    /// Container image reference.
    pub image: String,

    /// Environment bindings, including peer-service DNS names.
    pub env: BTreeMap<String, String>,

    /// Whether the unit's service is headless (no virtual IP).
    pub headless_service: bool,

    /// Worker-only extras.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_extras: Option<WorkerExtras>,
}

/// An externally reachable gateway whose address is assigned dynamically by
/// the control plane's load-balancer provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySpec {
    /// Gateway service name.
    pub name: String,

    /// In-cluster service the gateway fronts.
    pub target_service: String,

    /// Exposed port.
    pub port: u16,
}

/// Static declaration of the full deployable stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Namespace everything is deployed into.
    pub namespace: String,

    /// The deployable units, in rollout order.
    pub units: Vec<DeploymentUnit>,

    /// The externally reachable gateways.
    pub gateways: Vec<GatewaySpec>,
}

/// Topology validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// A unit is missing from the descriptor.
    #[error("missing unit for tier {0}")]
    MissingUnit(Tier),

    /// The worker is not wired to a required peer service.
    #[error("unit {unit} has no env binding referencing peer service {peer}")]
    MissingPeerBinding { unit: String, peer: String },

    /// A peer binding points at a pod-level address instead of a stable
    /// service name.
    #[error("unit {unit} binds peer by pod address ({value}); use the service name")]
    PodAddressBinding { unit: String, value: String },
}

impl Topology {
    /// The canonical three-tier stack in the given namespace.
    pub fn standard(namespace: impl Into<String>) -> Topology {
        let storage = DeploymentUnit {
            name: Tier::Storage.service_name().to_string(),
            tier: Tier::Storage,
            replicas: 1,
            image: "ghcr.io/quarry-build/quarry-cas:latest".to_string(),
            env: BTreeMap::from([(
                "QUARRY_CAS_LISTEN".to_string(),
                format!("0.0.0.0:{}", Tier::Storage.port()),
            )]),
            headless_service: false,
            worker_extras: None,
        };

        let scheduler = DeploymentUnit {
            name: Tier::Scheduler.service_name().to_string(),
            tier: Tier::Scheduler,
            replicas: 1,
            image: "ghcr.io/quarry-build/quarry-scheduler:latest".to_string(),
            env: BTreeMap::from([
                (
                    "QUARRY_SCHEDULER_LISTEN".to_string(),
                    format!("0.0.0.0:{}", Tier::Scheduler.port()),
                ),
                (
                    "QUARRY_CAS_ENDPOINT".to_string(),
                    peer_endpoint(Tier::Storage),
                ),
            ]),
            headless_service: false,
            worker_extras: None,
        };

        let worker = DeploymentUnit {
            name: Tier::Worker.service_name().to_string(),
            tier: Tier::Worker,
            replicas: 3,
            image: "ghcr.io/quarry-build/quarry-worker:latest".to_string(),
            env: BTreeMap::from([
                (
                    "QUARRY_CAS_ENDPOINT".to_string(),
                    peer_endpoint(Tier::Storage),
                ),
                (
                    "QUARRY_SCHEDULER_ENDPOINT".to_string(),
                    peer_endpoint(Tier::Scheduler),
                ),
                (
                    "QUARRY_WORKER_CONFIG".to_string(),
                    WORKER_CONFIG_PATH.to_string(),
                ),
            ]),
            headless_service: true,
            worker_extras: Some(WorkerExtras {
                config_map: WORKER_CONFIG_MAP.to_string(),
                config_path: WORKER_CONFIG_PATH.to_string(),
                staging: StagingSpec {
                    source_path: "/usr/local/bin/quarry-worker".to_string(),
                    shared_dir: ENTRYPOINT_DIR.to_string(),
                },
            }),
        };

        let gateways = vec![
            GatewaySpec {
                name: "quarry-cas-gateway".to_string(),
                target_service: Tier::Storage.service_name().to_string(),
                port: Tier::Storage.port(),
            },
            GatewaySpec {
                name: "quarry-scheduler-gateway".to_string(),
                target_service: Tier::Scheduler.service_name().to_string(),
                port: Tier::Scheduler.port(),
            },
        ];

        Topology {
            namespace: namespace.into(),
            units: vec![storage, scheduler, worker],
            gateways,
        }
    }

    /// Look up the unit for a tier.
    pub fn unit(&self, tier: Tier) -> Result<&DeploymentUnit, TopologyError> {
        self.units
            .iter()
            .find(|u| u.tier == tier)
            .ok_or(TopologyError::MissingUnit(tier))
    }

    /// The cache gateway (fronting the storage tier).
    pub fn cache_gateway(&self) -> Option<&GatewaySpec> {
        self.gateways
            .iter()
            .find(|g| g.target_service == Tier::Storage.service_name())
    }

    /// The scheduler gateway.
    pub fn scheduler_gateway(&self) -> Option<&GatewaySpec> {
        self.gateways
            .iter()
            .find(|g| g.target_service == Tier::Scheduler.service_name())
    }

    /// Validate the descriptor.
    ///
    /// All three tiers must be present, and the worker must reference the
    /// storage and scheduler tiers by stable service name.
    pub fn validate(&self) -> Result<(), TopologyError> {
        for tier in Tier::ROLLOUT_ORDER {
            self.unit(tier)?;
        }

        let worker = self.unit(Tier::Worker)?;
        for peer in [Tier::Storage, Tier::Scheduler] {
            let peer_name = peer.service_name();
            let binding = worker
                .env
                .values()
                .find(|v| endpoint_host(v) == Some(peer_name));
            if binding.is_none() {
                // A binding that names the peer but by pod address is the
                // more specific failure.
                if let Some(bad) = worker.env.values().find(|v| is_pod_address(v)) {
                    return Err(TopologyError::PodAddressBinding {
                        unit: worker.name.clone(),
                        value: bad.to_string(),
                    });
                }
                return Err(TopologyError::MissingPeerBinding {
                    unit: worker.name.clone(),
                    peer: peer_name.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// gRPC endpoint for a peer tier, addressed by service name.
pub fn peer_endpoint(tier: Tier) -> String {
    format!("grpc://{}:{}", tier.service_name(), tier.port())
}

/// Extract the host portion of an endpoint-shaped value, if any.
fn endpoint_host(value: &str) -> Option<&str> {
    let rest = value.split_once("://").map(|(_, r)| r).unwrap_or(value);
    let host = rest.split(['/', ':']).next()?;
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Whether an endpoint-shaped value addresses a pod directly (IP literal).
fn is_pod_address(value: &str) -> bool {
    endpoint_host(value)
        .map(|h| h.parse::<std::net::IpAddr>().is_ok() && h != "0.0.0.0")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_topology_validates() {
        let topology = Topology::standard("quarry");
        assert!(topology.validate().is_ok());
        assert_eq!(topology.units.len(), 3);
        assert_eq!(topology.gateways.len(), 2);
        assert!(topology.cache_gateway().is_some());
        assert!(topology.scheduler_gateway().is_some());
    }

    #[test]
    fn worker_missing_scheduler_binding_is_rejected() {
        let mut topology = Topology::standard("quarry");
        let worker = topology
            .units
            .iter_mut()
            .find(|u| u.tier == Tier::Worker)
            .unwrap();
        worker.env.remove("QUARRY_SCHEDULER_ENDPOINT");

        assert_eq!(
            topology.validate(),
            Err(TopologyError::MissingPeerBinding {
                unit: "quarry-worker".to_string(),
                peer: "quarry-scheduler".to_string(),
            })
        );
    }

    #[test]
    fn worker_pod_address_binding_is_rejected() {
        let mut topology = Topology::standard("quarry");
        let worker = topology
            .units
            .iter_mut()
            .find(|u| u.tier == Tier::Worker)
            .unwrap();
        worker.env.insert(
            "QUARRY_CAS_ENDPOINT".to_string(),
            "grpc://10.42.0.17:50051".to_string(),
        );

        assert!(matches!(
            topology.validate(),
            Err(TopologyError::PodAddressBinding { .. })
        ));
    }

    #[test]
    fn peer_endpoints_use_service_names() {
        assert_eq!(peer_endpoint(Tier::Storage), "grpc://quarry-cas:50051");
        assert_eq!(
            peer_endpoint(Tier::Scheduler),
            "grpc://quarry-scheduler:50052"
        );
    }

    #[test]
    fn tier_short_names_round_trip() {
        for tier in Tier::ROLLOUT_ORDER {
            assert_eq!(Tier::from_short_name(tier.short_name()), Some(tier));
        }
        assert_eq!(Tier::from_short_name("db"), None);
    }
}

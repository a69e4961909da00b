//! Local topology manifest (quarry.toml).
//!
//! Optional per-invocation overrides for the standard topology:
//!
//! ```toml
//! namespace = "quarry-dev"
//!
//! [units.worker]
//! replicas = 8
//! image = "ghcr.io/quarry-build/quarry-worker:nightly"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use quarry_topology::{Tier, Topology};

/// Parsed topology manifest.
#[derive(Debug, Default, Deserialize)]
pub struct TopologyManifest {
    /// Namespace override.
    pub namespace: Option<String>,

    /// Per-tier unit overrides, keyed by tier short name.
    #[serde(default)]
    pub units: BTreeMap<String, UnitOverride>,
}

/// Overridable fields of one deployment unit.
#[derive(Debug, Default, Deserialize)]
pub struct UnitOverride {
    pub replicas: Option<i32>,
    pub image: Option<String>,
}

/// Load a topology manifest from disk.
pub fn load(path: &Path) -> Result<TopologyManifest> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read topology manifest {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse topology manifest {}", path.display()))
}

impl TopologyManifest {
    /// Apply the overrides onto a topology.
    pub fn apply(&self, topology: &mut Topology) -> Result<()> {
        if let Some(namespace) = &self.namespace {
            topology.namespace = namespace.clone();
        }

        for (tier_name, unit_override) in &self.units {
            let Some(tier) = Tier::from_short_name(tier_name) else {
                anyhow::bail!(
                    "unknown tier '{tier_name}' in topology manifest (expected cas, scheduler, or worker)"
                );
            };
            let unit = topology
                .units
                .iter_mut()
                .find(|u| u.tier == tier)
                .with_context(|| format!("topology has no unit for tier {tier}"))?;

            if let Some(replicas) = unit_override.replicas {
                unit.replicas = replicas;
            }
            if let Some(image) = &unit_override.image {
                unit.image = image.clone();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_to_the_named_tier() {
        let manifest: TopologyManifest = toml::from_str(
            r#"
            namespace = "quarry-dev"

            [units.worker]
            replicas = 8
            image = "ghcr.io/quarry-build/quarry-worker:nightly"
            "#,
        )
        .unwrap();

        let mut topology = Topology::standard("quarry");
        manifest.apply(&mut topology).unwrap();

        assert_eq!(topology.namespace, "quarry-dev");
        let worker = topology.unit(Tier::Worker).unwrap();
        assert_eq!(worker.replicas, 8);
        assert_eq!(worker.image, "ghcr.io/quarry-build/quarry-worker:nightly");

        // Untouched tiers keep their defaults.
        assert_eq!(topology.unit(Tier::Storage).unwrap().replicas, 1);
    }

    #[test]
    fn unknown_tier_is_rejected() {
        let manifest: TopologyManifest = toml::from_str(
            r#"
            [units.db]
            replicas = 2
            "#,
        )
        .unwrap();

        let mut topology = Topology::standard("quarry");
        let err = manifest.apply(&mut topology).unwrap_err();
        assert!(err.to_string().contains("unknown tier 'db'"));
    }

    #[test]
    fn load_reports_the_path_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarry.toml");
        std::fs::write(&path, "units = 3").unwrap();

        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("quarry.toml"));
    }
}

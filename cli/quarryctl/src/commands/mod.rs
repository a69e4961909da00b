//! CLI commands.

mod gateways;
mod render;
mod smoke;
mod up;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use quarry_compose::{compose, Manifest, SourceOverrides};
use quarry_topology::{Tier, Topology};

use crate::output::OutputFormat;

/// quarry CLI - bring up and validate the build grid.
#[derive(Debug, Parser)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Bring up the full stack and run the smoke test.
    Up(up::UpCommand),

    /// Compose and print the finalized configuration without applying it.
    Render(render::RenderCommand),

    /// Resolve and print the gateway endpoints.
    Gateways(gateways::GatewaysCommand),

    /// Run only the smoke test against resolved or explicit endpoints.
    Smoke(smoke::SmokeCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = match self.format.as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        };

        let ctx = CommandContext { format };

        match self.command {
            Commands::Up(cmd) => cmd.run(ctx).await,
            Commands::Render(cmd) => cmd.run(ctx).await,
            Commands::Gateways(cmd) => cmd.run(ctx).await,
            Commands::Smoke(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("quarry {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub format: OutputFormat,
}

/// Flags shared by every command that composes the configuration. Each
/// override has an environment fallback so CI systems can parameterize a
/// run without rewriting the invocation.
#[derive(Debug, Args)]
pub struct ComposeArgs {
    /// Namespace to deploy into.
    #[arg(long, env = "QUARRY_NAMESPACE", default_value = "quarry")]
    pub namespace: String,

    /// Overlay variant; rewrites the core layer's configuration path.
    #[arg(long, env = "QUARRY_OVERLAY")]
    pub overlay: Option<String>,

    /// Source repository URL.
    #[arg(long, env = "QUARRY_REPO_URL")]
    pub repo_url: Option<String>,

    /// Source branch.
    #[arg(long, env = "QUARRY_BRANCH")]
    pub branch: Option<String>,

    /// Source commit.
    #[arg(long, env = "QUARRY_COMMIT")]
    pub commit: Option<String>,

    /// Per-tier image override (tier=ref, repeatable).
    #[arg(long = "image", value_name = "TIER=REF")]
    pub images: Vec<String>,

    /// Local topology manifest (TOML) with unit overrides.
    #[arg(long, value_name = "PATH")]
    pub topology: Option<PathBuf>,
}

impl ComposeArgs {
    /// Build the topology and compose the finalized configuration.
    pub fn build(&self) -> Result<(Topology, Manifest)> {
        let mut topology = Topology::standard(&self.namespace);
        if let Some(path) = &self.topology {
            let overrides = crate::manifest::load(path)?;
            overrides.apply(&mut topology)?;
        }

        let overrides = SourceOverrides {
            overlay: self.overlay.clone(),
            repo_url: self.repo_url.clone(),
            branch: self.branch.clone(),
            commit: self.commit.clone(),
            images: parse_images(&self.images)?,
        };
        let patches = overrides.into_patches(&topology)?;
        let manifest = compose(&topology, &patches)?;

        Ok((topology, manifest))
    }
}

/// Parse repeatable `tier=ref` image overrides.
fn parse_images(specs: &[String]) -> Result<BTreeMap<Tier, String>> {
    let mut images = BTreeMap::new();
    for spec in specs {
        let Some((tier_name, image)) = spec.split_once('=') else {
            anyhow::bail!("invalid --image '{spec}': expected tier=ref");
        };
        let Some(tier) = Tier::from_short_name(tier_name.trim()) else {
            anyhow::bail!(
                "unknown tier '{tier_name}' in --image (expected cas, scheduler, or worker)"
            );
        };
        let image = image.trim();
        if image.is_empty() {
            anyhow::bail!("empty image reference in --image '{spec}'");
        }
        images.insert(tier, image.to_string());
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_specs_parse_by_tier() {
        let images = parse_images(&[
            "cas=ghcr.io/quarry-build/quarry-cas:abc".to_string(),
            "worker=ghcr.io/quarry-build/quarry-worker:abc".to_string(),
        ])
        .unwrap();

        assert_eq!(images.len(), 2);
        assert!(images.contains_key(&Tier::Storage));
        assert!(images.contains_key(&Tier::Worker));
    }

    #[test]
    fn unknown_tier_is_rejected() {
        let err = parse_images(&["db=postgres:16".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown tier"));
    }

    #[test]
    fn missing_separator_is_rejected() {
        assert!(parse_images(&["cas".to_string()]).is_err());
    }
}

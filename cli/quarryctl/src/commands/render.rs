//! Render command: compose without applying.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use crate::output::{print_info, print_single, OutputFormat};

use super::{CommandContext, ComposeArgs};

/// Compose and print the finalized configuration.
#[derive(Debug, Args)]
pub struct RenderCommand {
    #[command(flatten)]
    pub compose: ComposeArgs,
}

impl RenderCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let (_, manifest) = self.compose.build()?;

        match ctx.format {
            OutputFormat::Json => {
                print_single(
                    &json!({
                        "hash": manifest.hash(),
                        "resources": manifest.resources(),
                    }),
                    ctx.format,
                );
            }
            OutputFormat::Table => {
                print_info(&format!("Manifest hash: {}", manifest.hash()));
                println!(
                    "{}",
                    serde_json::to_string_pretty(manifest.resources())
                        .unwrap_or_else(|_| "[]".to_string())
                );
            }
        }

        Ok(())
    }
}

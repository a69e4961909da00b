//! Smoke-test runner.
//!
//! One real build request through the resolved gateways is the single
//! end-to-end correctness signal for the whole bring-up: it transitively
//! exercises job submission, caching, and scheduler-to-worker dispatch
//! without this orchestrator needing visibility into any of them. The
//! request is issued by an external build client, addressed at the
//! resolved endpoints.

use std::process::Stdio;

use tracing::info;

use crate::error::{BringupError, BringupResult};
use crate::gateway::GatewayEndpoints;

/// Default logical instance the smoke build runs under.
pub const DEFAULT_INSTANCE: &str = "main";

/// Placeholders substituted into the smoke command line.
const CACHE_PLACEHOLDER: &str = "{cache}";
const SCHEDULER_PLACEHOLDER: &str = "{scheduler}";
const INSTANCE_PLACEHOLDER: &str = "{instance}";

/// The synthetic build request configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeTest {
    /// Build client to invoke.
    pub program: String,

    /// Arguments, with `{cache}`, `{scheduler}`, and `{instance}`
    /// placeholders.
    pub args: Vec<String>,

    /// Logical instance identifier the request runs under.
    pub instance: String,
}

impl Default for SmokeTest {
    fn default() -> Self {
        SmokeTest {
            program: "bazel".to_string(),
            args: vec![
                "build".to_string(),
                format!("--remote_cache={CACHE_PLACEHOLDER}"),
                format!("--remote_executor={SCHEDULER_PLACEHOLDER}"),
                format!("--remote_instance_name={INSTANCE_PLACEHOLDER}"),
                "//:smoke_test".to_string(),
            ],
            instance: DEFAULT_INSTANCE.to_string(),
        }
    }
}

impl SmokeTest {
    /// The argument list with endpoints and instance substituted.
    pub fn rendered_args(&self, endpoints: &GatewayEndpoints) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace(CACHE_PLACEHOLDER, &endpoints.cache)
                    .replace(SCHEDULER_PLACEHOLDER, &endpoints.scheduler)
                    .replace(INSTANCE_PLACEHOLDER, &self.instance)
            })
            .collect()
    }

    /// Issue the build request and require a clean exit.
    pub async fn run(&self, endpoints: &GatewayEndpoints) -> BringupResult<()> {
        let args = self.rendered_args(endpoints);
        info!(program = %self.program, args = ?args, "running smoke test");

        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| {
                BringupError::SmokeTestFailed(format!("failed to launch {}: {err}", self.program))
            })?;

        if output.status.success() {
            info!("smoke test passed");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(BringupError::SmokeTestFailed(format!(
            "{} exited with {}: {}",
            self.program,
            output.status,
            tail(&stderr, 800)
        )))
    }
}

/// Last `limit` bytes of diagnostic output, on a char boundary.
fn tail(text: &str, limit: usize) -> &str {
    let trimmed = text.trim_end();
    if trimmed.len() <= limit {
        return trimmed;
    }
    let mut start = trimmed.len() - limit;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> GatewayEndpoints {
        GatewayEndpoints {
            cache: "grpc://203.0.113.10:50051".to_string(),
            scheduler: "grpc://203.0.113.11:50052".to_string(),
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        let smoke = SmokeTest::default();
        let args = smoke.rendered_args(&endpoints());

        assert_eq!(args[1], "--remote_cache=grpc://203.0.113.10:50051");
        assert_eq!(args[2], "--remote_executor=grpc://203.0.113.11:50052");
        assert_eq!(args[3], "--remote_instance_name=main");
    }

    #[tokio::test]
    async fn clean_exit_passes() {
        let smoke = SmokeTest {
            program: "true".to_string(),
            args: Vec::new(),
            instance: DEFAULT_INSTANCE.to_string(),
        };
        assert!(smoke.run(&endpoints()).await.is_ok());
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let smoke = SmokeTest {
            program: "false".to_string(),
            args: Vec::new(),
            instance: DEFAULT_INSTANCE.to_string(),
        };
        assert!(matches!(
            smoke.run(&endpoints()).await,
            Err(BringupError::SmokeTestFailed(_))
        ));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        let text = "αβγδε";
        let t = tail(text, 3);
        assert!(text.ends_with(t));
        assert!(t.len() <= 3);
    }
}

//! Error display for the CLI.

use colored::Colorize;

use quarry_bringup::BringupError;

/// Print an error in a user-friendly format, with a hint where one helps.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(bringup) = err.downcast_ref::<BringupError>() {
        match bringup {
            BringupError::RejectedConfiguration(_) => {
                hint("The control plane rejected the configuration at admission; retrying will not help. Inspect the composed manifest with `quarry render`.");
            }
            BringupError::StageTimedOut { stage, .. } => {
                hint(&format!(
                    "Stage {stage} did not converge before its deadline. Inspect the named resource on the cluster; the run never retries a timed-out stage."
                ));
            }
            BringupError::StageFailed { .. } => {
                hint("The pipeline reached a terminal failure. Check the pipeline run's task logs before starting a new run.");
            }
            BringupError::GatewayUnresolved { .. } => {
                hint("All bring-up stages succeeded but a load-balancer address is still unassigned. Check the cluster's load-balancer provisioning.");
            }
            BringupError::SmokeTestFailed(_) => {
                hint("The deployed stack did not serve a real build. Re-run the probe alone with `quarry smoke` once the cause is fixed.");
            }
            _ => {}
        }
    }
}

fn hint(message: &str) {
    eprintln!("\n{}", format!("Hint: {message}").yellow());
}

//! Command handlers
//!
//! Each handler wires one CLI command to the library: load the deployment,
//! probe the host, run the controller, render the result. Handlers return
//! process exit codes and log errors instead of propagating them; everything
//! below this layer uses typed errors.

use indicatif::ProgressBar;
use std::time::Duration;
use tracing::error;

use crate::cli::commands::OutputFormatArg;
use crate::cli::menu::{stdin_is_terminal, TerminalConfirmation};
use crate::config::DockhandConfig;
use crate::definition::{self, Deployment};
use crate::health::HealthMonitor;
use crate::lifecycle::{
    AssumeYes, Controller, LifecycleAction, NonInteractiveDeny, OperatorConfirmation, Verdict,
};
use crate::probe::{self, CapabilityReport, HostPortAuthority};
use crate::runtime::DockerCli;

const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_DEGRADED: i32 = 2;

/// Handles `dockhand probe`.
pub async fn handle_probe(format: OutputFormatArg, config: &DockhandConfig) -> i32 {
    let deployment = match load_deployment(config) {
        Ok(deployment) => deployment,
        Err(code) => return code,
    };

    let report = probe_host(&deployment, format).await;
    match render_json_or(format, &report, |report| print!("{}", report)) {
        Ok(()) => EXIT_OK,
        Err(code) => code,
    }
}

/// Handles every action subcommand and the menu selection.
pub async fn handle_action(
    action: LifecycleAction,
    format: OutputFormatArg,
    config: &DockhandConfig,
    assume_yes: bool,
) -> i32 {
    if action == LifecycleAction::Cancel {
        println!("Cancelled.");
        return EXIT_OK;
    }

    let deployment = match load_deployment(config) {
        Ok(deployment) => deployment,
        Err(code) => return code,
    };
    let report = probe_host(&deployment, format).await;

    let runtime = match DockerCli::connect(config.command_timeout()) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{}", e);
            return EXIT_ERROR;
        }
    };
    let monitor = HealthMonitor::new(config.health_ceiling());
    let confirm: Box<dyn OperatorConfirmation> = if assume_yes {
        Box::new(AssumeYes)
    } else if stdin_is_terminal() {
        Box::new(TerminalConfirmation)
    } else {
        Box::new(NonInteractiveDeny)
    };
    let ports = HostPortAuthority;

    let controller = Controller::new(&runtime, &monitor, confirm.as_ref(), &ports, config);
    match controller.apply(action, &deployment, &report).await {
        Ok(result) => {
            let rendered = render_json_or(format, &result, |result| println!("{}", result));
            if let Err(code) = rendered {
                return code;
            }
            match result.verdict {
                Verdict::Success | Verdict::Cancelled => EXIT_OK,
                Verdict::Degraded => EXIT_DEGRADED,
                Verdict::Failed => EXIT_ERROR,
            }
        }
        Err(e) => {
            error!("{}", e);
            EXIT_ERROR
        }
    }
}

fn load_deployment(config: &DockhandConfig) -> Result<Deployment, i32> {
    definition::load(&config.definition_file).map_err(|e| {
        error!("{}", e);
        EXIT_ERROR
    })
}

/// Probes the host, with a spinner when a human is watching.
async fn probe_host(deployment: &Deployment, format: OutputFormatArg) -> CapabilityReport {
    let interactive = format == OutputFormatArg::Human && atty::is(atty::Stream::Stderr);
    if !interactive {
        return probe::probe(&deployment.host_ports()).await;
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("probing host capabilities");
    spinner.enable_steady_tick(Duration::from_millis(120));
    let report = probe::probe(&deployment.host_ports()).await;
    spinner.finish_and_clear();
    report
}

/// Prints `value` as pretty JSON, or defers to `human` for terminal output.
fn render_json_or<T, F>(format: OutputFormatArg, value: &T, human: F) -> Result<(), i32>
where
    T: serde::Serialize,
    F: FnOnce(&T),
{
    match format {
        OutputFormatArg::Human => {
            human(value);
            Ok(())
        }
        OutputFormatArg::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => {
                println!("{}", json);
                Ok(())
            }
            Err(e) => {
                error!("failed to serialize output: {}", e);
                Err(EXIT_ERROR)
            }
        },
    }
}

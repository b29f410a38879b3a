//! Lifecycle controller
//!
//! Executes one [`LifecycleAction`] against a deployment: stopping in reverse
//! dependency order, resolving port conflicts through the operator
//! confirmation seam, rebuilding or pulling images, and launching in
//! dependency order with each service gated on its dependencies' health.
//!
//! Every step is an explicit `Result`; a failing runtime command aborts the
//! remaining chain and is surfaced with the originating service's identity.
//! Services already started by the same invocation are left running, and the
//! execution result says so; there is no rollback.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

use super::action::LifecycleAction;
use super::confirm::OperatorConfirmation;
use crate::config::DockhandConfig;
use crate::definition::types::env_reference;
use crate::definition::{Deployment, ServiceDefinition};
use crate::health::{HealthMonitor, HealthState};
use crate::probe::ports::PortError;
use crate::probe::{CapabilityReport, PortAuthority};
use crate::runtime::{ContainerRuntime, RuntimeError};

/// Errors that abort an invocation before or outside the launch chain.
///
/// Failures inside the launch chain are not errors at this level; they are
/// recorded per service in the [`ExecutionResult`] because the partial state
/// they leave behind must be reported, not discarded.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A fatal precondition (container runtime, required environment
    /// variable) is absent. Raised before any mutation.
    #[error("precondition missing: {0}")]
    PreconditionMissing(String),

    /// Declared host ports are held by foreign processes and the operator
    /// did not approve terminating them.
    #[error("host ports held by foreign processes: {}", format_ports(.ports))]
    PortConflict { ports: Vec<u16> },

    /// The operator approved termination but the port could not be freed.
    #[error("failed to free port {port}: {source}")]
    PortTermination {
        port: u16,
        #[source]
        source: PortError,
    },

    /// A runtime query outside the launch chain failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn format_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// What happened to one service during the invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Gracefully stopped and removed.
    Stopped,

    /// Launched; `health` is the state the monitor settled on.
    Started { health: HealthState },

    /// Never attempted, with the reason why.
    Skipped { reason: String },

    /// A runtime command for this service failed.
    Failed {
        error: String,
        exit_code: Option<i32>,
    },
}

/// One per-service event in execution order. A service that is stopped and
/// then relaunched appears twice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceOutcome {
    pub service: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Overall result of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    /// Everything ran, but some service is unhealthy or was skipped.
    Degraded,
    /// A runtime command failed; the remaining chain was aborted.
    Failed,
    Cancelled,
}

/// Full record of what an invocation did, per service and overall.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub action: LifecycleAction,
    pub outcomes: Vec<ServiceOutcome>,
    pub verdict: Verdict,
    /// Dangling images removed, when the action prunes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruned_images: Option<usize>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    fn finish(
        action: LifecycleAction,
        outcomes: Vec<ServiceOutcome>,
        pruned_images: Option<usize>,
    ) -> Self {
        let verdict = verdict_of(&outcomes);
        Self {
            action,
            outcomes,
            verdict,
            pruned_images,
            finished_at: Utc::now(),
        }
    }

    fn cancelled() -> Self {
        Self {
            action: LifecycleAction::Cancel,
            outcomes: vec![],
            verdict: Verdict::Cancelled,
            pruned_images: None,
            finished_at: Utc::now(),
        }
    }

    /// Health the named service settled on, if it was started.
    pub fn health_of(&self, service: &str) -> Option<HealthState> {
        self.outcomes.iter().rev().find_map(|o| {
            if o.service == service {
                match &o.outcome {
                    Outcome::Started { health } => Some(*health),
                    _ => None,
                }
            } else {
                None
            }
        })
    }
}

fn verdict_of(outcomes: &[ServiceOutcome]) -> Verdict {
    let mut verdict = Verdict::Success;
    for entry in outcomes {
        match &entry.outcome {
            Outcome::Failed { .. } => return Verdict::Failed,
            Outcome::Skipped { .. } => verdict = Verdict::Degraded,
            Outcome::Started { health } if *health != HealthState::Healthy => {
                verdict = Verdict::Degraded
            }
            _ => {}
        }
    }
    verdict
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Action: {}", self.action)?;
        for entry in &self.outcomes {
            match &entry.outcome {
                Outcome::Stopped => writeln!(f, "  {}: stopped", entry.service)?,
                Outcome::Started { health } => {
                    writeln!(f, "  {}: started ({})", entry.service, health)?
                }
                Outcome::Skipped { reason } => {
                    writeln!(f, "  {}: skipped ({})", entry.service, reason)?
                }
                Outcome::Failed { error, .. } => {
                    writeln!(f, "  {}: FAILED: {}", entry.service, error)?
                }
            }
        }
        if let Some(pruned) = self.pruned_images {
            writeln!(f, "Pruned dangling images: {}", pruned)?;
        }
        write!(f, "Verdict: {:?}", self.verdict)
    }
}

/// Whether images are rebuilt before launching.
#[derive(Clone, Copy)]
enum BuildMode {
    /// Use cached images as they are.
    CachedImages,
    /// Rebuild with the layer cache disabled; `pull_base` re-pulls bases.
    ForceBuild { pull_base: bool },
}

/// Drives one lifecycle action to completion.
pub struct Controller<'a> {
    runtime: &'a dyn ContainerRuntime,
    monitor: &'a HealthMonitor,
    confirm: &'a dyn OperatorConfirmation,
    ports: &'a dyn PortAuthority,
    config: &'a DockhandConfig,
}

impl<'a> Controller<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        monitor: &'a HealthMonitor,
        confirm: &'a dyn OperatorConfirmation,
        ports: &'a dyn PortAuthority,
        config: &'a DockhandConfig,
    ) -> Self {
        Self {
            runtime,
            monitor,
            confirm,
            ports,
            config,
        }
    }

    /// Applies one action to the deployment.
    ///
    /// # Errors
    ///
    /// Errors are only returned for conditions that abort before the launch
    /// chain mutates anything it cannot report: missing preconditions,
    /// unresolved port conflicts, and runtime query failures. Mid-chain
    /// failures come back inside the `ExecutionResult`.
    pub async fn apply(
        &self,
        action: LifecycleAction,
        deployment: &Deployment,
        report: &CapabilityReport,
    ) -> Result<ExecutionResult, LifecycleError> {
        info!(%action, services = deployment.len(), "applying lifecycle action");

        match action {
            LifecycleAction::Cancel => Ok(ExecutionResult::cancelled()),
            LifecycleAction::ShowLogs => self.show_logs(deployment, report).await,
            LifecycleAction::Stop => {
                self.ensure_runtime(report)?;
                let (outcomes, _) = self.stop_phase(deployment).await?;
                Ok(ExecutionResult::finish(action, outcomes, None))
            }
            LifecycleAction::Restart => {
                self.relaunch(action, deployment, report, BuildMode::CachedImages, false)
                    .await
            }
            LifecycleAction::Rebuild => {
                self.relaunch(
                    action,
                    deployment,
                    report,
                    BuildMode::ForceBuild { pull_base: false },
                    false,
                )
                .await
            }
            LifecycleAction::CleanRebuild => {
                self.relaunch(
                    action,
                    deployment,
                    report,
                    BuildMode::ForceBuild { pull_base: true },
                    true,
                )
                .await
            }
        }
    }

    async fn show_logs(
        &self,
        deployment: &Deployment,
        report: &CapabilityReport,
    ) -> Result<ExecutionResult, LifecycleError> {
        self.ensure_runtime(report)?;

        let running = self.runtime.running_services().await?;
        let targets: Vec<String> = deployment
            .names()
            .into_iter()
            .filter(|name| running.contains(name))
            .collect();
        if targets.is_empty() {
            info!("no managed services are running, nothing to stream");
            return Ok(ExecutionResult::finish(
                LifecycleAction::ShowLogs,
                vec![],
                None,
            ));
        }

        self.runtime.stream_logs(&targets).await?;
        Ok(ExecutionResult::finish(
            LifecycleAction::ShowLogs,
            vec![],
            None,
        ))
    }

    async fn relaunch(
        &self,
        action: LifecycleAction,
        deployment: &Deployment,
        report: &CapabilityReport,
        build: BuildMode,
        prune_first: bool,
    ) -> Result<ExecutionResult, LifecycleError> {
        self.ensure_runtime(report)?;
        let resolved_env = self.resolve_env(deployment)?;
        self.warn_gpu_gaps(deployment, report);

        let (mut outcomes, stop_failed) = self.stop_phase(deployment).await?;
        if stop_failed {
            return Ok(ExecutionResult::finish(action, outcomes, None));
        }

        self.resolve_port_conflicts(deployment, report).await?;

        let pruned = if prune_first {
            Some(self.runtime.prune_dangling_images().await?)
        } else {
            None
        };

        self.launch_phase(deployment, build, &resolved_env, &mut outcomes)
            .await;

        Ok(ExecutionResult::finish(action, outcomes, pruned))
    }

    /// A missing container runtime is the one probe finding that is fatal.
    fn ensure_runtime(&self, report: &CapabilityReport) -> Result<(), LifecycleError> {
        if report.runtime_present {
            Ok(())
        } else {
            Err(LifecycleError::PreconditionMissing(
                "container runtime is not available; install Docker and ensure the daemon is running".to_string(),
            ))
        }
    }

    /// Resolves `${VAR}` environment references against the host environment.
    ///
    /// A missing variable aborts before any mutation. Values are passed
    /// through opaquely and are never logged or inspected here.
    fn resolve_env(
        &self,
        deployment: &Deployment,
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>, LifecycleError> {
        let mut resolved = BTreeMap::new();
        for service in deployment.ordered() {
            let mut env = BTreeMap::new();
            for (key, value) in &service.env {
                let value = match env_reference(value) {
                    Some(var) => std::env::var(var).map_err(|_| {
                        LifecycleError::PreconditionMissing(format!(
                            "environment variable {} is required by service {} but not set",
                            var, service.name
                        ))
                    })?,
                    None => value.clone(),
                };
                env.insert(key.clone(), value);
            }
            resolved.insert(service.name.clone(), env);
        }
        Ok(resolved)
    }

    fn warn_gpu_gaps(&self, deployment: &Deployment, report: &CapabilityReport) {
        if report.gpu_present {
            return;
        }
        for service in deployment.ordered().filter(|s| s.gpu) {
            warn!(
                service = %service.name,
                "service requests GPU access but no GPU was detected; the launch may fail"
            );
        }
    }

    /// Stops every running managed service in reverse dependency order.
    ///
    /// Returns the recorded outcomes and whether a stop failed; a failure
    /// aborts the remaining chain with the failing service surfaced.
    async fn stop_phase(
        &self,
        deployment: &Deployment,
    ) -> Result<(Vec<ServiceOutcome>, bool), LifecycleError> {
        let running = self.runtime.running_services().await?;
        let mut outcomes = Vec::new();

        for service in deployment.reverse_ordered() {
            if !running.contains(&service.name) {
                continue;
            }
            match self
                .runtime
                .stop_service(&service.name, self.config.stop_grace())
                .await
            {
                Ok(()) => outcomes.push(ServiceOutcome {
                    service: service.name.clone(),
                    outcome: Outcome::Stopped,
                }),
                Err(e) => {
                    warn!(service = %service.name, error = %e, "stop failed, aborting");
                    let exit_code = e.exit_code();
                    outcomes.push(ServiceOutcome {
                        service: service.name.clone(),
                        outcome: Outcome::Failed {
                            error: e.to_string(),
                            exit_code,
                        },
                    });
                    return Ok((outcomes, true));
                }
            }
        }

        Ok((outcomes, false))
    }

    /// Ports still held after managed containers stopped belong to foreign
    /// processes. Terminating them is gated on a synchronous operator
    /// confirmation; anything but an explicit yes aborts.
    async fn resolve_port_conflicts(
        &self,
        deployment: &Deployment,
        report: &CapabilityReport,
    ) -> Result<(), LifecycleError> {
        let still_held: Vec<u16> = deployment
            .host_ports()
            .into_iter()
            .filter(|port| report.port_conflicts.contains(port))
            .filter(|&port| !self.ports.is_free(port))
            .collect();
        if still_held.is_empty() {
            return Ok(());
        }

        let prompt = format!(
            "Host ports {} are held by processes outside dockhand. Terminate them?",
            format_ports(&still_held)
        );
        if !self.confirm.confirm(&prompt) {
            return Err(LifecycleError::PortConflict { ports: still_held });
        }

        for &port in &still_held {
            self.ports
                .terminate_listener(port)
                .await
                .map_err(|source| LifecycleError::PortTermination { port, source })?;
        }

        // Give listeners a moment to shut down, then verify.
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        let stubborn: Vec<u16> = still_held
            .into_iter()
            .filter(|&port| !self.ports.is_free(port))
            .collect();
        if !stubborn.is_empty() {
            return Err(LifecycleError::PortConflict { ports: stubborn });
        }
        Ok(())
    }

    /// Launches services in dependency order, gating each on the health of
    /// its dependencies. Failures abort the rest of the chain; services
    /// already launched stay up and are reported as such.
    async fn launch_phase(
        &self,
        deployment: &Deployment,
        build: BuildMode,
        resolved_env: &BTreeMap<String, BTreeMap<String, String>>,
        outcomes: &mut Vec<ServiceOutcome>,
    ) {
        let mut health: BTreeMap<String, HealthState> = BTreeMap::new();
        let mut abort_after: Option<String> = None;

        for service in deployment.ordered() {
            if let Some(failed) = &abort_after {
                outcomes.push(ServiceOutcome {
                    service: service.name.clone(),
                    outcome: Outcome::Skipped {
                        reason: format!("aborted after failure of {}", failed),
                    },
                });
                continue;
            }

            if let Some(unready) = service
                .depends_on
                .iter()
                .find(|dep| health.get(*dep) != Some(&HealthState::Healthy))
            {
                outcomes.push(ServiceOutcome {
                    service: service.name.clone(),
                    outcome: Outcome::Skipped {
                        reason: format!("dependency {} is not healthy", unready),
                    },
                });
                continue;
            }

            if let Err(e) = self.prepare_image(service, build).await {
                let exit_code = e.exit_code();
                outcomes.push(ServiceOutcome {
                    service: service.name.clone(),
                    outcome: Outcome::Failed {
                        error: e.to_string(),
                        exit_code,
                    },
                });
                abort_after = Some(service.name.clone());
                continue;
            }

            let env = resolved_env
                .get(&service.name)
                .cloned()
                .unwrap_or_default();
            if let Err(e) = self.runtime.start_service(service, &env).await {
                let exit_code = e.exit_code();
                outcomes.push(ServiceOutcome {
                    service: service.name.clone(),
                    outcome: Outcome::Failed {
                        error: e.to_string(),
                        exit_code,
                    },
                });
                abort_after = Some(service.name.clone());
                continue;
            }

            let state = self.monitor.wait_for_health(self.runtime, service).await;
            if state != HealthState::Healthy {
                warn!(
                    service = %service.name,
                    "service started but did not become healthy; it remains running, inspect `dockhand logs`"
                );
            }
            health.insert(service.name.clone(), state);
            outcomes.push(ServiceOutcome {
                service: service.name.clone(),
                outcome: Outcome::Started { health: state },
            });
        }
    }

    async fn prepare_image(
        &self,
        service: &ServiceDefinition,
        build: BuildMode,
    ) -> Result<(), RuntimeError> {
        match build {
            BuildMode::CachedImages => Ok(()),
            BuildMode::ForceBuild { pull_base } => {
                if service.build.is_some() {
                    self.runtime.build_image(service, pull_base).await
                } else {
                    self.runtime.pull_image(&service.image).await
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(service: &str, outcome: Outcome) -> ServiceOutcome {
        ServiceOutcome {
            service: service.to_string(),
            outcome,
        }
    }

    #[test]
    fn test_verdict_all_healthy_is_success() {
        let outcomes = vec![
            outcome("db", Outcome::Stopped),
            outcome(
                "db",
                Outcome::Started {
                    health: HealthState::Healthy,
                },
            ),
        ];
        assert_eq!(verdict_of(&outcomes), Verdict::Success);
    }

    #[test]
    fn test_verdict_unhealthy_is_degraded() {
        let outcomes = vec![outcome(
            "web",
            Outcome::Started {
                health: HealthState::Unhealthy,
            },
        )];
        assert_eq!(verdict_of(&outcomes), Verdict::Degraded);
    }

    #[test]
    fn test_verdict_failure_wins_over_degraded() {
        let outcomes = vec![
            outcome(
                "db",
                Outcome::Started {
                    health: HealthState::Unhealthy,
                },
            ),
            outcome(
                "web",
                Outcome::Failed {
                    error: "docker run web failed".to_string(),
                    exit_code: Some(125),
                },
            ),
        ];
        assert_eq!(verdict_of(&outcomes), Verdict::Failed);
    }

    #[test]
    fn test_result_display_lists_events() {
        let result = ExecutionResult::finish(
            LifecycleAction::Restart,
            vec![
                outcome("web", Outcome::Stopped),
                outcome(
                    "web",
                    Outcome::Started {
                        health: HealthState::Healthy,
                    },
                ),
            ],
            None,
        );

        let text = result.to_string();
        assert!(text.contains("web: stopped"));
        assert!(text.contains("web: started (healthy)"));
        assert!(text.contains("Verdict: Success"));
    }

    #[test]
    fn test_health_of_reads_latest_start() {
        let result = ExecutionResult::finish(
            LifecycleAction::Restart,
            vec![
                outcome("web", Outcome::Stopped),
                outcome(
                    "web",
                    Outcome::Started {
                        health: HealthState::Healthy,
                    },
                ),
            ],
            None,
        );

        assert_eq!(result.health_of("web"), Some(HealthState::Healthy));
        assert_eq!(result.health_of("db"), None);
    }

    #[test]
    fn test_format_ports() {
        assert_eq!(format_ports(&[5000, 5433]), "5000, 5433");
    }
}

//! Health monitoring with a bounded retry budget
//!
//! After a service starts, [`HealthMonitor::wait_for_health`] polls its
//! declared probe on a fixed interval until the first success, until the
//! retry budget is spent, or until the overall ceiling elapses. The budget is
//! a hard cap; the monitor never retries indefinitely.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::definition::{HealthProbe, ServiceDefinition};
use crate::runtime::ContainerRuntime;

/// Readiness of a service as observed by the monitor.
///
/// Transitions only happen inside the poll loop and are terminal for an
/// invocation: once a service is `Healthy` or the budget is exhausted, the
/// state does not change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "unknown"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Polls service health probes.
pub struct HealthMonitor {
    http: reqwest::Client,

    /// Wall-clock ceiling across all attempts for one service, on top of the
    /// per-check retry budget.
    ceiling: Duration,
}

impl HealthMonitor {
    pub fn new(ceiling: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            ceiling,
        }
    }

    /// Waits until the service's probe succeeds or its budget is exhausted.
    ///
    /// Honors the check's `start_period` before the first attempt, then polls
    /// every `interval`. Returns `Healthy` only on an observed success;
    /// probe errors of any kind count as failed attempts, not hard errors.
    pub async fn wait_for_health(
        &self,
        runtime: &dyn ContainerRuntime,
        service: &ServiceDefinition,
    ) -> HealthState {
        let check = &service.health_check;
        if !check.start_period.is_zero() {
            debug!(
                service = %service.name,
                secs = check.start_period.as_secs(),
                "waiting start period"
            );
            tokio::time::sleep(check.start_period).await;
        }

        let started = tokio::time::Instant::now();
        let mut failures = 0u32;
        loop {
            if self.check_once(runtime, service).await {
                debug!(service = %service.name, failures, "health check passed");
                return HealthState::Healthy;
            }

            failures += 1;
            if failures >= check.retries {
                warn!(
                    service = %service.name,
                    retries = check.retries,
                    "health retry budget exhausted"
                );
                return HealthState::Unhealthy;
            }
            if started.elapsed() >= self.ceiling {
                warn!(
                    service = %service.name,
                    ceiling_secs = self.ceiling.as_secs(),
                    "health wait ceiling elapsed"
                );
                return HealthState::Unhealthy;
            }

            tokio::time::sleep(check.interval).await;
        }
    }

    async fn check_once(
        &self,
        runtime: &dyn ContainerRuntime,
        service: &ServiceDefinition,
    ) -> bool {
        match &service.health_check.probe {
            HealthProbe::Command(argv) => {
                // An attempt still running past the check's timeout is a
                // failed attempt, not an open-ended wait.
                let attempt = runtime.exec_health_command(&service.name, argv);
                match tokio::time::timeout(service.health_check.timeout, attempt).await {
                    Ok(Ok(passed)) => passed,
                    Ok(Err(e)) => {
                        debug!(service = %service.name, error = %e, "health command errored");
                        false
                    }
                    Err(_) => {
                        debug!(
                            service = %service.name,
                            timeout_secs = service.health_check.timeout.as_secs(),
                            "health command still running past its timeout"
                        );
                        false
                    }
                }
            }
            HealthProbe::Http { path, port } => {
                let url = format!("http://127.0.0.1:{}{}", port, path);
                let request = self
                    .http
                    .get(&url)
                    .timeout(service.health_check.timeout)
                    .send()
                    .await;
                match request {
                    Ok(response) => response.status().is_success(),
                    Err(e) => {
                        debug!(service = %service.name, url = %url, error = %e, "health probe failed");
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::definition::{HealthCheck, HealthProbe};
    use crate::runtime::RuntimeError;

    /// Runtime whose health command fails a fixed number of times before
    /// succeeding. Only `exec_health_command` is exercised by the monitor.
    struct ScriptedRuntime {
        fail_first: u32,
        attempts: AtomicU32,
        wedged: bool,
    }

    impl ScriptedRuntime {
        fn failing_first(fail_first: u32) -> Self {
            Self {
                fail_first,
                attempts: AtomicU32::new(0),
                wedged: false,
            }
        }

        /// Health command that never completes; the monitor's per-attempt
        /// timeout is all that bounds it.
        fn wedged() -> Self {
            Self {
                wedged: true,
                ..Self::failing_first(u32::MAX)
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContainerRuntime for ScriptedRuntime {
        async fn build_image(
            &self,
            _service: &ServiceDefinition,
            _pull_base: bool,
        ) -> Result<(), RuntimeError> {
            unreachable!("monitor never builds")
        }

        async fn pull_image(&self, _image: &str) -> Result<(), RuntimeError> {
            unreachable!("monitor never pulls")
        }

        async fn start_service(
            &self,
            _service: &ServiceDefinition,
            _env: &BTreeMap<String, String>,
        ) -> Result<(), RuntimeError> {
            unreachable!("monitor never starts")
        }

        async fn stop_service(&self, _name: &str, _grace: Duration) -> Result<(), RuntimeError> {
            unreachable!("monitor never stops")
        }

        async fn running_services(&self) -> Result<Vec<String>, RuntimeError> {
            Ok(vec![])
        }

        async fn exec_health_command(
            &self,
            _service: &str,
            _argv: &[String],
        ) -> Result<bool, RuntimeError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.wedged {
                std::future::pending::<()>().await;
            }
            Ok(attempt >= self.fail_first)
        }

        async fn stream_logs(&self, _services: &[String]) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn prune_dangling_images(&self) -> Result<usize, RuntimeError> {
            Ok(0)
        }

        async fn image_digest(&self, _image: &str) -> Result<Option<String>, RuntimeError> {
            Ok(None)
        }
    }

    fn service_with_retries(retries: u32) -> ServiceDefinition {
        ServiceDefinition {
            name: "web".to_string(),
            image: "web:latest".to_string(),
            build: None,
            ports: vec![],
            volumes: vec![],
            env: BTreeMap::new(),
            gpu: false,
            depends_on: vec![],
            health_check: HealthCheck {
                probe: HealthProbe::Command(vec!["check".to_string()]),
                interval: Duration::from_secs(1),
                timeout: Duration::from_secs(1),
                retries,
                start_period: Duration::ZERO,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_succeeding_check_observes_exact_budget() {
        let runtime = ScriptedRuntime::failing_first(u32::MAX);
        let monitor = HealthMonitor::new(Duration::from_secs(600));
        let service = service_with_retries(3);

        let started = tokio::time::Instant::now();
        let state = monitor.wait_for_health(&runtime, &service).await;

        assert_eq!(state, HealthState::Unhealthy);
        assert_eq!(runtime.attempts(), 3);
        // Three attempts with two one-second pauses between them.
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wedged_check_counts_timeouts_as_failed_attempts() {
        let runtime = ScriptedRuntime::wedged();
        let monitor = HealthMonitor::new(Duration::from_secs(600));
        let service = service_with_retries(3);

        let started = tokio::time::Instant::now();
        let state = monitor.wait_for_health(&runtime, &service).await;

        assert_eq!(state, HealthState::Unhealthy);
        assert_eq!(runtime.attempts(), 3);
        // Three one-second attempt timeouts with two one-second pauses
        // between them.
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let runtime = ScriptedRuntime::failing_first(0);
        let monitor = HealthMonitor::new(Duration::from_secs(600));
        let service = service_with_retries(3);

        let state = monitor.wait_for_health(&runtime, &service).await;

        assert_eq!(state, HealthState::Healthy);
        assert_eq!(runtime.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_once_then_succeed() {
        let runtime = ScriptedRuntime::failing_first(1);
        let monitor = HealthMonitor::new(Duration::from_secs(600));
        let service = service_with_retries(3);

        let state = monitor.wait_for_health(&runtime, &service).await;

        assert_eq!(state, HealthState::Healthy);
        assert_eq!(runtime.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_cuts_polling_short() {
        let runtime = ScriptedRuntime::failing_first(u32::MAX);
        // Budget would allow 100 attempts; the ceiling stops it far earlier.
        let monitor = HealthMonitor::new(Duration::from_secs(3));
        let service = service_with_retries(100);

        let state = monitor.wait_for_health(&runtime, &service).await;

        assert_eq!(state, HealthState::Unhealthy);
        assert!(runtime.attempts() <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_period_delays_first_attempt() {
        let runtime = ScriptedRuntime::failing_first(0);
        let monitor = HealthMonitor::new(Duration::from_secs(600));
        let mut service = service_with_retries(3);
        service.health_check.start_period = Duration::from_secs(30);

        let started = tokio::time::Instant::now();
        let state = monitor.wait_for_health(&runtime, &service).await;

        assert_eq!(state, HealthState::Healthy);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }
}

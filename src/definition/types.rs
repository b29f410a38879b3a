//! Data model for declarative service deployments
//!
//! A [`Deployment`] is an ordered set of [`ServiceDefinition`]s loaded from a
//! compose-style YAML file. Definitions are immutable once loaded; the loader
//! validates all invariants (unique names, unique host ports, resolvable
//! dependencies) before any of these types reach the lifecycle layer.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// One deployable unit: a named container with its image, wiring and health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDefinition {
    /// Service name, unique within a deployment. Doubles as the container name.
    pub name: String,

    /// Image to run. For services with a build section this is the tag the
    /// build produces.
    pub image: String,

    /// Optional build section. Services without one are pulled, never built.
    pub build: Option<BuildSpec>,

    /// Host-to-container port mappings, in declaration order.
    pub ports: Vec<PortMapping>,

    /// Bind mounts, in declaration order.
    pub volumes: Vec<VolumeMount>,

    /// Environment passed to the container. Values of the form `${VAR}` are
    /// kept verbatim and resolved from the host environment at launch time,
    /// so secrets never appear in a loaded definition.
    pub env: BTreeMap<String, String>,

    /// Whether the container needs GPU access (`docker run --gpus all`).
    pub gpu: bool,

    /// Names of services that must be healthy before this one starts.
    pub depends_on: Vec<String>,

    /// Readiness probe. Required for every service.
    pub health_check: HealthCheck,
}

impl ServiceDefinition {
    /// Host ports this service claims, in declaration order.
    pub fn host_ports(&self) -> Vec<u16> {
        self.ports.iter().map(|p| p.host).collect()
    }

    /// Environment variable names referenced as `${VAR}` values.
    ///
    /// These must be present in the host environment before launch; the
    /// values themselves are never read here.
    pub fn env_references(&self) -> Vec<String> {
        self.env
            .values()
            .filter_map(|v| env_reference(v))
            .map(str::to_string)
            .collect()
    }
}

/// Returns the variable name if `value` is a `${VAR}` reference.
pub(crate) fn env_reference(value: &str) -> Option<&str> {
    value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}

/// Build section of a service: where to find the Dockerfile and its context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildSpec {
    pub context: PathBuf,
    pub dockerfile: Option<PathBuf>,
}

/// A `host:container` TCP port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// Access mode of a bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    ReadOnly,
    ReadWrite,
}

impl VolumeMode {
    pub fn as_flag(&self) -> &'static str {
        match self {
            VolumeMode::ReadOnly => "ro",
            VolumeMode::ReadWrite => "rw",
        }
    }
}

/// A `host_path:container_path:mode` bind mount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub mode: VolumeMode,
}

/// How a service's readiness is probed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum HealthProbe {
    /// Argv executed inside the running container; non-zero exit is a failure.
    Command(Vec<String>),

    /// GET against a loopback endpoint; any non-2xx or transport error is a
    /// failure. `port` is the host side of a declared mapping.
    Http { path: String, port: u16 },
}

/// Readiness check with its polling budget.
///
/// The budget is a hard cap: polling stops at the first success, after
/// `retries` distinct failures, or once the monitor's overall ceiling elapses,
/// whichever comes first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub probe: HealthProbe,

    /// Wall-clock pause between attempts.
    pub interval: Duration,

    /// Per-attempt cap; an attempt still running after this long counts as a
    /// failure.
    pub timeout: Duration,

    /// Maximum number of failed attempts before the service is declared
    /// unhealthy.
    pub retries: u32,

    /// Grace before the first attempt, for services that need warm-up.
    pub start_period: Duration,
}

pub(crate) const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_HEALTH_RETRIES: u32 = 5;
pub(crate) const DEFAULT_HEALTH_START_PERIOD: Duration = Duration::ZERO;

/// An ordered set of service definitions forming one deployment.
///
/// Construction goes through the loader, which guarantees the invariants:
/// non-empty, unique names, unique host ports, dependencies resolvable and
/// acyclic. `order` holds indices into `services` in dependency order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deployment {
    services: Vec<ServiceDefinition>,
    order: Vec<usize>,
}

impl Deployment {
    /// Used by the loader after validation; not part of the public API surface
    /// beyond tests within this crate.
    pub(crate) fn from_validated(services: Vec<ServiceDefinition>, order: Vec<usize>) -> Self {
        debug_assert_eq!(services.len(), order.len());
        Self { services, order }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Services in dependency order: every service appears after all of its
    /// `depends_on` targets.
    pub fn ordered(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.order.iter().map(|&i| &self.services[i])
    }

    /// Services in reverse dependency order, the order used for stopping.
    pub fn reverse_ordered(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.order.iter().rev().map(|&i| &self.services[i])
    }

    /// All declared service names, in dependency order.
    pub fn names(&self) -> Vec<String> {
        self.ordered().map(|s| s.name.clone()).collect()
    }

    /// Every host port claimed by the deployment, in dependency order.
    pub fn host_ports(&self) -> Vec<u16> {
        self.ordered().flat_map(|s| s.host_ports()).collect()
    }

    /// Every `${VAR}` environment reference in the deployment, deduplicated.
    pub fn env_references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .services
            .iter()
            .flat_map(|s| s.env_references())
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }
}

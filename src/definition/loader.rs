//! Compose-style deployment file parsing and validation
//!
//! The loader turns a declarative YAML file into a validated [`Deployment`].
//! It performs no I/O against the container runtime; every invariant violation
//! is caught here, before any lifecycle action can run.
//!
//! Accepted shape (a subset of the compose format):
//!
//! ```yaml
//! services:
//!   db:
//!     image: postgres:16
//!     ports: ["5433:5432"]
//!     volumes: ["./data/db:/var/lib/postgresql/data:rw"]
//!     environment:
//!       POSTGRES_PASSWORD: ${DB_PASSWORD}
//!     healthcheck:
//!       test: ["CMD", "pg_isready", "-U", "postgres"]
//!       interval: 5s
//!       retries: 5
//!   web:
//!     image: whisperx-web:latest
//!     build:
//!       context: .
//!       dockerfile: Dockerfile
//!     gpus: true
//!     depends_on: [db]
//!     ports: ["5000:5000"]
//!     healthcheck:
//!       http: /health
//!       port: 5000
//!       start_period: 30s
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::types::{
    BuildSpec, Deployment, HealthCheck, HealthProbe, PortMapping, ServiceDefinition, VolumeMode,
    VolumeMount, DEFAULT_HEALTH_INTERVAL, DEFAULT_HEALTH_RETRIES, DEFAULT_HEALTH_START_PERIOD,
    DEFAULT_HEALTH_TIMEOUT,
};

/// Errors raised while loading or validating a deployment file.
///
/// All of these are fatal at load time: nothing has touched the container
/// runtime when one of them is returned.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Covers syntax errors and duplicate service names, which the YAML
    /// parser rejects as duplicate mapping keys.
    #[error("malformed deployment file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("deployment declares no services")]
    EmptyDeployment,

    #[error("service {0}: image is required")]
    MissingImage(String),

    #[error("service {0}: a health check is required")]
    MissingHealthCheck(String),

    #[error("service {service}: invalid health check: {reason}")]
    InvalidHealthCheck { service: String, reason: String },

    #[error("service {service}: http health check references undeclared host port {port}")]
    UnknownHealthPort { service: String, port: u16 },

    #[error("host port {port} claimed by both {first} and {second}")]
    DuplicateHostPort {
        port: u16,
        first: String,
        second: String,
    },

    #[error("service {service}: invalid port mapping {value:?}")]
    InvalidPort { service: String, value: String },

    #[error("service {service}: invalid volume {value:?}")]
    InvalidVolume { service: String, value: String },

    #[error("service {service}: invalid duration {value:?}")]
    InvalidDuration { service: String, value: String },

    #[error("service {service} depends on unknown service {dependency}")]
    UnknownDependency {
        service: String,
        dependency: String,
    },

    #[error("dependency cycle involving services: {0}")]
    DependencyCycle(String),
}

#[derive(Debug, Deserialize)]
struct RawDeployment {
    /// Kept as a raw mapping so file order survives; it becomes the tie-break
    /// order among services with no dependency relation.
    services: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    image: Option<String>,
    build: Option<RawBuild>,
    #[serde(default)]
    ports: Vec<String>,
    #[serde(default)]
    volumes: Vec<String>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    gpus: bool,
    #[serde(default)]
    depends_on: Vec<String>,
    healthcheck: Option<RawHealthCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBuild {
    Context(String),
    Full {
        context: String,
        dockerfile: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHealthCheck {
    /// Compose-style command probe, optionally prefixed with "CMD".
    test: Option<Vec<String>>,
    /// Loopback HTTP probe: path plus the host port to hit.
    http: Option<String>,
    port: Option<u16>,
    interval: Option<String>,
    timeout: Option<String>,
    retries: Option<u32>,
    start_period: Option<String>,
}

/// Loads and validates a deployment from a file on disk.
pub fn load(path: &Path) -> Result<Deployment, DefinitionError> {
    let text = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loading deployment file");
    parse(&text)
}

/// Parses and validates a deployment from YAML text.
pub fn parse(text: &str) -> Result<Deployment, DefinitionError> {
    let raw: RawDeployment = serde_yaml::from_str(text)?;

    let mut services = Vec::with_capacity(raw.services.len());
    for (key, value) in raw.services {
        let name = key
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", key));
        let raw_service: RawService = serde_yaml::from_value(value)?;
        services.push(convert_service(name, raw_service)?);
    }

    validate(&services)?;
    let order = dependency_order(&services)?;

    Ok(Deployment::from_validated(services, order))
}

fn convert_service(name: String, raw: RawService) -> Result<ServiceDefinition, DefinitionError> {
    let image = raw
        .image
        .filter(|i| !i.trim().is_empty())
        .ok_or_else(|| DefinitionError::MissingImage(name.clone()))?;

    let build = raw.build.map(|b| match b {
        RawBuild::Context(context) => BuildSpec {
            context: PathBuf::from(context),
            dockerfile: None,
        },
        RawBuild::Full {
            context,
            dockerfile,
        } => BuildSpec {
            context: PathBuf::from(context),
            dockerfile: dockerfile.map(PathBuf::from),
        },
    });

    let mut ports = Vec::with_capacity(raw.ports.len());
    for value in &raw.ports {
        ports.push(parse_port(&name, value)?);
    }

    let mut volumes = Vec::with_capacity(raw.volumes.len());
    for value in &raw.volumes {
        volumes.push(parse_volume(&name, value)?);
    }

    let raw_health = raw
        .healthcheck
        .ok_or_else(|| DefinitionError::MissingHealthCheck(name.clone()))?;
    let health_check = convert_health_check(&name, raw_health, &ports)?;

    Ok(ServiceDefinition {
        name,
        image,
        build,
        ports,
        volumes,
        env: raw.environment,
        gpu: raw.gpus,
        depends_on: raw.depends_on,
        health_check,
    })
}

fn convert_health_check(
    service: &str,
    raw: RawHealthCheck,
    ports: &[PortMapping],
) -> Result<HealthCheck, DefinitionError> {
    let probe = match (raw.test, raw.http) {
        (Some(_), Some(_)) => {
            return Err(DefinitionError::InvalidHealthCheck {
                service: service.to_string(),
                reason: "declare either `test` or `http`, not both".to_string(),
            })
        }
        (Some(mut argv), None) => {
            // Compose allows ["CMD", ...]; the marker is not part of the argv.
            if argv.first().map(String::as_str) == Some("CMD") {
                argv.remove(0);
            }
            if argv.is_empty() {
                return Err(DefinitionError::InvalidHealthCheck {
                    service: service.to_string(),
                    reason: "`test` must contain a command".to_string(),
                });
            }
            HealthProbe::Command(argv)
        }
        (None, Some(path)) => {
            let port = match (raw.port, ports) {
                (Some(port), _) => port,
                (None, [single]) => single.host,
                (None, _) => {
                    return Err(DefinitionError::InvalidHealthCheck {
                        service: service.to_string(),
                        reason: "`http` needs a `port` when multiple ports are declared"
                            .to_string(),
                    })
                }
            };
            if !ports.iter().any(|p| p.host == port) {
                return Err(DefinitionError::UnknownHealthPort {
                    service: service.to_string(),
                    port,
                });
            }
            let path = if path.starts_with('/') {
                path
            } else {
                format!("/{}", path)
            };
            HealthProbe::Http { path, port }
        }
        (None, None) => {
            return Err(DefinitionError::InvalidHealthCheck {
                service: service.to_string(),
                reason: "declare a `test` command or an `http` path".to_string(),
            })
        }
    };

    Ok(HealthCheck {
        probe,
        interval: parse_optional_duration(service, raw.interval, DEFAULT_HEALTH_INTERVAL)?,
        timeout: parse_optional_duration(service, raw.timeout, DEFAULT_HEALTH_TIMEOUT)?,
        retries: raw.retries.unwrap_or(DEFAULT_HEALTH_RETRIES),
        start_period: parse_optional_duration(
            service,
            raw.start_period,
            DEFAULT_HEALTH_START_PERIOD,
        )?,
    })
}

fn parse_port(service: &str, value: &str) -> Result<PortMapping, DefinitionError> {
    let invalid = || DefinitionError::InvalidPort {
        service: service.to_string(),
        value: value.to_string(),
    };

    match value.split_once(':') {
        Some((host, container)) => {
            let host = host.parse().map_err(|_| invalid())?;
            let container = container.parse().map_err(|_| invalid())?;
            Ok(PortMapping { host, container })
        }
        None => {
            let port = value.parse().map_err(|_| invalid())?;
            Ok(PortMapping {
                host: port,
                container: port,
            })
        }
    }
}

fn parse_volume(service: &str, value: &str) -> Result<VolumeMount, DefinitionError> {
    let invalid = || DefinitionError::InvalidVolume {
        service: service.to_string(),
        value: value.to_string(),
    };

    let parts: Vec<&str> = value.split(':').collect();
    let (host_path, container_path, mode) = match parts.as_slice() {
        [host, container] => (*host, *container, VolumeMode::ReadWrite),
        [host, container, "ro"] => (*host, *container, VolumeMode::ReadOnly),
        [host, container, "rw"] => (*host, *container, VolumeMode::ReadWrite),
        _ => return Err(invalid()),
    };
    if host_path.is_empty() || container_path.is_empty() {
        return Err(invalid());
    }

    Ok(VolumeMount {
        host_path: host_path.to_string(),
        container_path: container_path.to_string(),
        mode,
    })
}

fn parse_optional_duration(
    service: &str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, DefinitionError> {
    match value {
        None => Ok(default),
        Some(text) => parse_duration(&text).ok_or_else(|| DefinitionError::InvalidDuration {
            service: service.to_string(),
            value: text,
        }),
    }
}

/// Parses `250ms`, `5s`, `2m` or a bare integer (seconds).
fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if let Some(ms) = text.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    if let Some(s) = text.strip_suffix('s') {
        return s.parse().ok().map(Duration::from_secs);
    }
    if let Some(m) = text.strip_suffix('m') {
        return m.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    text.parse().ok().map(Duration::from_secs)
}

fn validate(services: &[ServiceDefinition]) -> Result<(), DefinitionError> {
    if services.is_empty() {
        return Err(DefinitionError::EmptyDeployment);
    }

    // No two services may claim the same host port.
    let mut claimed: BTreeMap<u16, &str> = BTreeMap::new();
    for service in services {
        for port in service.host_ports() {
            if let Some(first) = claimed.insert(port, &service.name) {
                return Err(DefinitionError::DuplicateHostPort {
                    port,
                    first: first.to_string(),
                    second: service.name.clone(),
                });
            }
        }
    }

    // Every dependency must name a service in this deployment.
    for service in services {
        for dependency in &service.depends_on {
            if !services.iter().any(|s| &s.name == dependency) {
                return Err(DefinitionError::UnknownDependency {
                    service: service.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Stable topological sort: dependencies first, file order among peers.
fn dependency_order(services: &[ServiceDefinition]) -> Result<Vec<usize>, DefinitionError> {
    let index_of = |name: &str| services.iter().position(|s| s.name == name);

    let mut remaining_deps: Vec<Vec<usize>> = services
        .iter()
        .map(|s| {
            s.depends_on
                .iter()
                .filter_map(|d| index_of(d))
                .collect::<Vec<_>>()
        })
        .collect();

    let mut order = Vec::with_capacity(services.len());
    let mut emitted = vec![false; services.len()];

    while order.len() < services.len() {
        let next = (0..services.len()).find(|&i| {
            !emitted[i] && remaining_deps[i].iter().all(|&d| emitted[d])
        });

        match next {
            Some(i) => {
                emitted[i] = true;
                remaining_deps[i].clear();
                order.push(i);
            }
            None => {
                let stuck: Vec<&str> = services
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !emitted[*i])
                    .map(|(_, s)| s.name.as_str())
                    .collect();
                return Err(DefinitionError::DependencyCycle(stuck.join(", ")));
            }
        }
    }

    Ok(order)
}

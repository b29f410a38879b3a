//! Host capability probing
//!
//! Inspects the host before any lifecycle action: GPU presence, container
//! runtime availability, and whether the deployment's declared host ports are
//! already bound. Probing is read-only and fails softly; absent capabilities
//! land in the report instead of raising errors. The lifecycle layer decides
//! what is fatal (a missing container runtime is).

pub mod ports;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::net::TcpListener;
use std::time::Duration;
use tracing::debug;

use crate::runtime::CommandRunner;

pub use ports::{HostPortAuthority, PortAuthority};

const NVIDIA_SMI_TIMEOUT: Duration = Duration::from_secs(10);

/// Snapshot of host facilities used to gate lifecycle actions.
///
/// Produced fresh on every invocation and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    pub gpu_present: bool,
    pub gpu_name: Option<String>,
    pub runtime_present: bool,
    pub runtime_version: Option<String>,
    /// Declared host ports that are already bound by some process.
    pub port_conflicts: BTreeSet<u16>,
    pub probed_at: DateTime<Utc>,
}

impl fmt::Display for CapabilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.gpu_name {
            Some(name) => writeln!(f, "GPU:               {}", name)?,
            None => writeln!(f, "GPU:               not detected")?,
        }
        match &self.runtime_version {
            Some(version) => writeln!(f, "Container runtime: docker {}", version)?,
            None => writeln!(f, "Container runtime: not available")?,
        }
        if self.port_conflicts.is_empty() {
            writeln!(f, "Host ports:        all free")?;
        } else {
            let ports: Vec<String> = self.port_conflicts.iter().map(u16::to_string).collect();
            writeln!(f, "Host ports:        in use: {}", ports.join(", "))?;
        }
        Ok(())
    }
}

/// Probes the host and reports its capabilities.
///
/// `host_ports` is the set of ports the deployment intends to claim; each is
/// tested with a loopback bind. Read-only apart from those transient binds.
pub async fn probe(host_ports: &[u16]) -> CapabilityReport {
    let gpu_name = probe_gpu().await;
    let runtime_version = probe_docker().await;
    let port_conflicts = probe_ports(host_ports);

    CapabilityReport {
        gpu_present: gpu_name.is_some(),
        gpu_name,
        runtime_present: runtime_version.is_some(),
        runtime_version,
        port_conflicts,
        probed_at: Utc::now(),
    }
}

/// Queries the NVIDIA driver for the first GPU's name. Absence of the driver
/// or of a device is not an error.
async fn probe_gpu() -> Option<String> {
    let runner = CommandRunner::new(NVIDIA_SMI_TIMEOUT);
    let output = runner
        .run_captured(
            "nvidia-smi",
            &[
                "--query-gpu=name".to_string(),
                "--format=csv,noheader".to_string(),
            ],
            "nvidia-smi",
        )
        .await;

    match output {
        Ok(output) if output.status.success() => {
            let name = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string);
            debug!(?name, "gpu probe");
            name
        }
        Ok(_) | Err(_) => {
            debug!("nvidia-smi not usable, recording gpu as absent");
            None
        }
    }
}

/// Asks the Docker daemon for its version over the local socket.
async fn probe_docker() -> Option<String> {
    let docker = match bollard::Docker::connect_with_local_defaults() {
        Ok(docker) => docker,
        Err(e) => {
            debug!(error = %e, "docker daemon not reachable");
            return None;
        }
    };

    match docker.version().await {
        Ok(version) => {
            let version = version.version.unwrap_or_else(|| "unknown".to_string());
            debug!(%version, "docker daemon responding");
            Some(version)
        }
        Err(e) => {
            debug!(error = %e, "docker version query failed");
            None
        }
    }
}

/// Checks each declared host port with a loopback bind; ports refusing the
/// bind are reported as conflicts.
fn probe_ports(host_ports: &[u16]) -> BTreeSet<u16> {
    host_ports
        .iter()
        .copied()
        .filter(|&port| TcpListener::bind(("127.0.0.1", port)).is_err())
        .collect()
}

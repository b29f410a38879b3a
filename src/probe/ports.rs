//! Host port inspection and foreign-listener termination
//!
//! When a declared host port is held by a process outside this tool's
//! control, the lifecycle controller may, after explicit operator
//! confirmation, ask for that listener to be terminated. The seam is a trait
//! so controller tests never touch real processes.

use async_trait::async_trait;
use std::net::TcpListener;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::runtime::{CommandRunner, RuntimeError};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PortError {
    #[error("no process found listening on port {0}")]
    NoListener(u16),

    #[error(transparent)]
    Command(#[from] RuntimeError),
}

/// Host port queries and, after confirmation, foreign listener termination.
#[async_trait]
pub trait PortAuthority: Send + Sync {
    /// Whether the port accepts a loopback bind right now.
    fn is_free(&self, port: u16) -> bool;

    /// Sends SIGTERM to the process listening on the port. SIGKILL is never
    /// sent; a stubborn listener remains a reported conflict.
    async fn terminate_listener(&self, port: u16) -> Result<(), PortError>;
}

/// Real implementation backed by `lsof` and `kill`.
pub struct HostPortAuthority;

impl HostPortAuthority {
    async fn listener_pids(&self, port: u16) -> Result<Vec<u32>, PortError> {
        let runner = CommandRunner::new(LOOKUP_TIMEOUT);
        let output = runner
            .run_captured(
                "lsof",
                &[
                    "-t".to_string(),
                    "-i".to_string(),
                    format!("tcp:{}", port),
                    "-s".to_string(),
                    "TCP:LISTEN".to_string(),
                ],
                &format!("lsof port {}", port),
            )
            .await?;

        // lsof exits non-zero when nothing matches; that is not an error here.
        let pids: Vec<u32> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|l| l.trim().parse().ok())
            .collect();
        Ok(pids)
    }
}

#[async_trait]
impl PortAuthority for HostPortAuthority {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).is_ok()
    }

    async fn terminate_listener(&self, port: u16) -> Result<(), PortError> {
        let pids = self.listener_pids(port).await?;
        if pids.is_empty() {
            warn!(port, "no listener found to terminate");
            return Err(PortError::NoListener(port));
        }

        let runner = CommandRunner::new(LOOKUP_TIMEOUT);
        for pid in pids {
            info!(port, pid, "terminating foreign listener");
            let output = runner
                .run_captured(
                    "kill",
                    &["-TERM".to_string(), pid.to_string()],
                    &format!("kill pid {}", pid),
                )
                .await?;
            if !output.status.success() {
                return Err(PortError::Command(RuntimeError::CommandFailed {
                    command: format!("kill pid {}", pid),
                    code: output.status.code(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                }));
            }
        }
        Ok(())
    }
}

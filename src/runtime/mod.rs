//! Container runtime abstraction
//!
//! The lifecycle controller and health monitor talk to the container runtime
//! exclusively through the [`ContainerRuntime`] trait. The production
//! implementation is [`DockerCli`]; tests substitute an in-memory fake so
//! lifecycle semantics can be exercised without a daemon.

pub mod docker;
pub mod runner;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::definition::ServiceDefinition;

pub use docker::DockerCli;
pub use runner::CommandRunner;

/// Errors from container runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime daemon cannot be reached at all.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// A runtime command ran and exited unsuccessfully.
    #[error("{command} failed with {}: {stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A runtime command exceeded its allotted time and was killed.
    #[error("{command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    /// The command binary could not be spawned or awaited.
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An error from the runtime's HTTP API.
    #[error("runtime api error: {0}")]
    Api(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

impl RuntimeError {
    /// Exit code of the failing command, when one exists.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RuntimeError::CommandFailed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Operations the lifecycle layer needs from a container runtime.
///
/// One invocation issues these strictly sequentially; implementations do not
/// need to support concurrent mutation.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Builds the service's image from its build section with the layer cache
    /// disabled. `pull_base` additionally re-pulls base images.
    async fn build_image(
        &self,
        service: &ServiceDefinition,
        pull_base: bool,
    ) -> Result<(), RuntimeError>;

    /// Pulls an image from its registry.
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Creates and starts a container for the service. `env` holds the fully
    /// resolved environment; implementations must never log its values.
    async fn start_service(
        &self,
        service: &ServiceDefinition,
        env: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError>;

    /// Gracefully stops a managed container, then removes it. The grace
    /// period bounds how long the runtime waits before killing.
    async fn stop_service(&self, name: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Names of currently running containers managed by this tool.
    async fn running_services(&self) -> Result<Vec<String>, RuntimeError>;

    /// Runs a health-check argv inside the service's container. Returns
    /// whether it exited successfully; spawn failures are errors.
    async fn exec_health_command(
        &self,
        service: &str,
        argv: &[String],
    ) -> Result<bool, RuntimeError>;

    /// Streams existing container output for the given services until they
    /// exit or the invocation is interrupted. Read-only.
    async fn stream_logs(&self, services: &[String]) -> Result<(), RuntimeError>;

    /// Removes dangling images and returns how many were deleted.
    async fn prune_dangling_images(&self) -> Result<usize, RuntimeError>;

    /// Content digest of a local image, or `None` if the image is absent.
    async fn image_digest(&self, image: &str) -> Result<Option<String>, RuntimeError>;
}

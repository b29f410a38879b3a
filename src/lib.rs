//! dockhand - container lifecycle manager for single-node GPU services
//!
//! This library manages the lifecycle of a small, ordered set of Docker
//! services on one host, typified by a GPU speech-transcription web service
//! and its data store. One invocation probes the host, loads a declarative
//! deployment file, applies exactly one lifecycle action, and gates dependent
//! services on health checks with a bounded retry budget.
//!
//! # Core Concepts
//!
//! - **Capability report**: a fresh snapshot of host facilities (GPU,
//!   container runtime, declared ports) taken before every action
//! - **Deployment**: an immutable, validated, dependency-ordered set of
//!   service definitions loaded from compose-style YAML
//! - **Lifecycle action**: one of a fixed set of operations (rebuild,
//!   restart, stop, show logs, clean rebuild, cancel) chosen per invocation
//! - **Health gating**: a service starts only after everything it depends on
//!   has been observed healthy
//!
//! # Example Usage
//!
//! ```ignore
//! use dockhand::config::DockhandConfig;
//! use dockhand::health::HealthMonitor;
//! use dockhand::lifecycle::{AssumeYes, Controller, LifecycleAction};
//! use dockhand::probe::HostPortAuthority;
//! use dockhand::runtime::DockerCli;
//!
//! async fn restart_everything(config: &DockhandConfig) -> anyhow::Result<()> {
//!     let deployment = dockhand::definition::load(&config.definition_file)?;
//!     let report = dockhand::probe::probe(&deployment.host_ports()).await;
//!
//!     let runtime = DockerCli::connect(config.command_timeout())?;
//!     let monitor = HealthMonitor::new(config.health_ceiling());
//!     let controller = Controller::new(&runtime, &monitor, &AssumeYes, &HostPortAuthority, config);
//!
//!     let result = controller
//!         .apply(LifecycleAction::Restart, &deployment, &report)
//!         .await?;
//!     println!("{}", result);
//!     Ok(())
//! }
//! ```

// Public modules
pub mod cli;
pub mod config;
pub mod definition;
pub mod health;
pub mod lifecycle;
pub mod probe;
pub mod runtime;
pub mod util;

// Re-export key types for convenient access
pub use config::{ConfigError, DockhandConfig};
pub use definition::{DefinitionError, Deployment, ServiceDefinition};
pub use health::{HealthMonitor, HealthState};
pub use lifecycle::{
    Controller, ExecutionResult, LifecycleAction, LifecycleError, OperatorConfirmation, Verdict,
};
pub use probe::{CapabilityReport, PortAuthority};
pub use runtime::{ContainerRuntime, DockerCli, RuntimeError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

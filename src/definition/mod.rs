//! Declarative service definitions: data model and loader.

pub mod loader;
pub mod types;

pub use loader::{load, parse, DefinitionError};
pub use types::{
    BuildSpec, Deployment, HealthCheck, HealthProbe, PortMapping, ServiceDefinition, VolumeMode,
    VolumeMount,
};

//! Configuration management for dockhand
//!
//! One [`DockhandConfig`] is constructed per invocation and passed explicitly
//! into every component; there is no global mutable state. Settings load from
//! environment variables with sensible defaults and may be overridden by CLI
//! flags before validation.
//!
//! # Environment Variables
//!
//! - `DOCKHAND_FILE`: deployment file path - default: "dockhand.yaml"
//! - `DOCKHAND_STOP_GRACE`: graceful-stop period in seconds - default: "20"
//! - `DOCKHAND_COMMAND_TIMEOUT`: runtime command timeout in seconds - default: "1800"
//! - `DOCKHAND_HEALTH_CEILING`: overall health-wait ceiling in seconds - default: "300"
//! - `DOCKHAND_LOG_LEVEL`: logging level - default: "info"

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_FILE: &str = "dockhand.yaml";
const DEFAULT_STOP_GRACE_SECS: u64 = 20;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_HEALTH_CEILING_SECS: u64 = 300;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Invocation-wide context for dockhand.
#[derive(Debug, Clone)]
pub struct DockhandConfig {
    /// Path of the deployment definition file.
    pub definition_file: PathBuf,

    /// Seconds a container gets to stop gracefully before the runtime kills it.
    pub stop_grace_secs: u64,

    /// Seconds any single runtime command (build, pull, run) may take.
    pub command_timeout_secs: u64,

    /// Overall wall-clock ceiling for one service's health wait, in seconds.
    pub health_ceiling_secs: u64,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for DockhandConfig {
    /// Loads from `DOCKHAND_*` environment variables, falling back to
    /// defaults for anything unset.
    fn default() -> Self {
        let definition_file = env::var("DOCKHAND_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_FILE));

        let stop_grace_secs = env::var("DOCKHAND_STOP_GRACE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_STOP_GRACE_SECS);

        let command_timeout_secs = env::var("DOCKHAND_COMMAND_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);

        let health_ceiling_secs = env::var("DOCKHAND_HEALTH_CEILING")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HEALTH_CEILING_SECS);

        let log_level = env::var("DOCKHAND_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            definition_file,
            stop_grace_secs,
            command_timeout_secs,
            health_ceiling_secs,
            log_level,
        }
    }
}

impl DockhandConfig {
    /// Validates ranges and the log level.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stop_grace_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "Stop grace period cannot exceed 10 minutes".to_string(),
            ));
        }

        if self.command_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Command timeout must be at least 1 second".to_string(),
            ));
        }
        if self.command_timeout_secs > 86_400 {
            return Err(ConfigError::ValidationFailed(
                "Command timeout cannot exceed 24 hours".to_string(),
            ));
        }

        if self.health_ceiling_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Health ceiling must be at least 1 second".to_string(),
            ));
        }
        if self.health_ceiling_secs > 3600 {
            return Err(ConfigError::ValidationFailed(
                "Health ceiling cannot exceed 1 hour".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn health_ceiling(&self) -> Duration {
        Duration::from_secs(self.health_ceiling_secs)
    }
}

impl fmt::Display for DockhandConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dockhand Configuration:")?;
        writeln!(f, "  Definition File: {}", self.definition_file.display())?;
        writeln!(f, "  Stop Grace: {}s", self.stop_grace_secs)?;
        writeln!(f, "  Command Timeout: {}s", self.command_timeout_secs)?;
        writeln!(f, "  Health Ceiling: {}s", self.health_ceiling_secs)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_configuration() {
        for key in [
            "DOCKHAND_FILE",
            "DOCKHAND_STOP_GRACE",
            "DOCKHAND_COMMAND_TIMEOUT",
            "DOCKHAND_HEALTH_CEILING",
            "DOCKHAND_LOG_LEVEL",
        ] {
            env::remove_var(key);
        }

        let config = DockhandConfig::default();

        assert_eq!(config.definition_file, PathBuf::from(DEFAULT_FILE));
        assert_eq!(config.stop_grace_secs, DEFAULT_STOP_GRACE_SECS);
        assert_eq!(config.command_timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
        assert_eq!(config.health_ceiling_secs, DEFAULT_HEALTH_CEILING_SECS);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let _guards = vec![
            EnvGuard::set("DOCKHAND_FILE", "/srv/deploy.yaml"),
            EnvGuard::set("DOCKHAND_STOP_GRACE", "5"),
            EnvGuard::set("DOCKHAND_COMMAND_TIMEOUT", "600"),
            EnvGuard::set("DOCKHAND_HEALTH_CEILING", "120"),
            EnvGuard::set("DOCKHAND_LOG_LEVEL", "DEBUG"),
        ];

        let config = DockhandConfig::default();

        assert_eq!(config.definition_file, PathBuf::from("/srv/deploy.yaml"));
        assert_eq!(config.stop_grace_secs, 5);
        assert_eq!(config.command_timeout_secs, 600);
        assert_eq!(config.health_ceiling_secs, 120);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let config = DockhandConfig {
            command_timeout_secs: 0,
            ..base_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_excessive_grace() {
        let config = DockhandConfig {
            stop_grace_secs: 601,
            ..base_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_log_level() {
        let config = DockhandConfig {
            log_level: "loud".to_string(),
            ..base_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_duration_accessors() {
        let config = base_config();
        assert_eq!(config.stop_grace(), Duration::from_secs(20));
        assert_eq!(config.command_timeout(), Duration::from_secs(1800));
        assert_eq!(config.health_ceiling(), Duration::from_secs(300));
    }

    fn base_config() -> DockhandConfig {
        DockhandConfig {
            definition_file: PathBuf::from(DEFAULT_FILE),
            stop_grace_secs: DEFAULT_STOP_GRACE_SECS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            health_ceiling_secs: DEFAULT_HEALTH_CEILING_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

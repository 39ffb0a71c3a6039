//! Run Configuration
//!
//! This module provides configuration management for the verifier,
//! supporting YAML configuration files with sensible defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use log::{info, warn};

use crate::error::ConfigError;
use crate::registry::NodeId;
use crate::remote::session::SessionPolicy;
use crate::report::ReportFormat;
use crate::retry::RetryPolicy;
use crate::storage::config::StorageBackend;

pub const DEFAULT_CONFIG_PATH: &str = "verifier.yaml";

/// How the coordinator picks the source node of each trial
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceSelection {
    #[default]
    RoundRobin,
    Random,
    /// Always `run.source_node`
    Fixed,
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

/// Main verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VerifierConfig {
    /// Trial scheduling configuration
    pub run: RunConfig,
    /// Read retry policy
    pub retry: RetryPolicy,
    /// Storage adapter configuration
    pub storage: StorageConfig,
    /// Remote session configuration
    pub session: SessionConfig,
    /// Report output configuration
    pub report: ReportConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Trial scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Path to the node registry (credentials) file
    pub registry_path: String,
    /// Number of trials; one per registered node when unset
    pub trial_count: Option<usize>,
    /// Payload size in bytes
    pub payload_size: usize,
    /// Seed for deterministic payloads; random payloads when unset
    pub payload_seed: Option<u64>,
    /// Global budget of concurrent remote operations
    pub concurrency: usize,
    /// Maximum number of trials in flight
    pub max_concurrent_trials: usize,
    /// Trial-wide timeout in seconds
    pub trial_timeout_secs: u64,
    /// Run-wide deadline in seconds
    pub global_timeout_secs: Option<u64>,
    /// Delete test objects once a trial is resolved
    pub cleanup: bool,
    pub source_selection: SourceSelection,
    /// Source node for `fixed` selection
    pub source_node: Option<NodeId>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            registry_path: "swift_nodes_credentials.json".to_string(),
            trial_count: None,
            payload_size: 512 * 2048, // 1MB
            payload_seed: None,
            concurrency: 8,
            max_concurrent_trials: 4,
            trial_timeout_secs: 300,
            global_timeout_secs: Some(1800),
            cleanup: true,
            source_selection: SourceSelection::RoundRobin,
            source_node: None,
        }
    }
}

impl RunConfig {
    pub fn trial_timeout(&self) -> Duration {
        Duration::from_secs(self.trial_timeout_secs)
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        self.global_timeout_secs.map(Duration::from_secs)
    }
}

/// Swift CLI settings used by the remote storage adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwiftConfig {
    /// Auth endpoint template; `{address}` is replaced by the node address
    pub auth_url: String,
    pub user: String,
    pub key: String,
    /// Container that receives the test objects
    pub container: String,
    /// Path of the swift binary on the nodes
    pub binary: String,
}

impl Default for SwiftConfig {
    fn default() -> Self {
        Self {
            auth_url: "http://{address}:8080/auth/v1.0".to_string(),
            user: "admin:admin".to_string(),
            key: "admin".to_string(),
            container: "replication-check".to_string(),
            binary: "swift".to_string(),
        }
    }
}

/// Storage adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackend,
    pub swift: SwiftConfig,
}

/// Remote session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub policy: SessionPolicy,
    pub ssh_binary: String,
    /// Used for nodes that carry a password
    pub sshpass_binary: String,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: SessionPolicy::Serialized,
            ssh_binary: "ssh".to_string(),
            sshpass_binary: "sshpass".to_string(),
            connect_timeout_secs: 10,
            command_timeout_secs: 60,
        }
    }
}

/// Report output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReportConfig {
    pub format: ReportFormat,
    /// Output file; stdout when unset
    pub output: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log4rs configuration file
    pub config_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "verifier_log.yaml".to_string(),
        }
    }
}

impl VerifierConfig {
    /// Load configuration from the default file, use defaults if not found
    pub fn load() -> Result<Self, ConfigError> {
        let (config, source) = Self::load_or_defaults(DEFAULT_CONFIG_PATH, false)?;
        if source == ConfigSource::Defaults {
            warn!("Config file not found, using defaults");
        }
        Ok(config)
    }

    /// Load `path`, or fall back to defaults when it is missing and not `required`.
    /// Logs nothing, so it can run before logging is set up.
    pub fn load_or_defaults(path: impl AsRef<Path>, required: bool) -> Result<(Self, ConfigSource), ConfigError> {
        let path = path.as_ref();
        if required || path.exists() {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let mut config: VerifierConfig = serde_yaml::from_str(&content)?;
            config.apply_env();
            config.validate()?;
            Ok((config, ConfigSource::File(path.to_path_buf())))
        } else {
            let mut config = Self::default();
            config.apply_env();
            config.validate()?;
            Ok((config, ConfigSource::Defaults))
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let (config, source) = Self::load_or_defaults(path, true)?;
        if let ConfigSource::File(path) = source {
            info!("Loaded configuration from {}", path.display());
        }
        Ok(config)
    }

    /// Environment overrides applied on top of the file
    fn apply_env(&mut self) {
        if let Some(backend) = StorageBackend::from_env() {
            self.storage.backend = backend;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.run.payload_size == 0 {
            return Err(ConfigError::Invalid {
                field: "run.payload_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.run.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "run.concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.run.max_concurrent_trials == 0 {
            return Err(ConfigError::Invalid {
                field: "run.max_concurrent_trials",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.run.trial_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "run.trial_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.run.source_selection == SourceSelection::Fixed && self.run.source_node.is_none() {
            return Err(ConfigError::Invalid {
                field: "run.source_node",
                reason: "required when source_selection is fixed".to_string(),
            });
        }
        if self.run.trial_count == Some(0) {
            return Err(ConfigError::Invalid {
                field: "run.trial_count",
                reason: "must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = VerifierConfig::default();
        assert_eq!(config.run.payload_size, 1024 * 1024);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.run.global_timeout(), Some(Duration::from_secs(1800)));
        assert_eq!(config.storage.backend, StorageBackend::SwiftCli);
        assert_eq!(config.session.policy, SessionPolicy::Serialized);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "run:\n  trial_count: 12\n  payload_seed: 7\n  source_selection: fixed\n  source_node: r1\nretry:\n  max_attempts: 3\nstorage:\n  backend: mock\nreport:\n  format: text"
        )
        .unwrap();
        let config = VerifierConfig::load_from(file.path()).unwrap();
        assert_eq!(config.run.trial_count, Some(12));
        assert_eq!(config.run.payload_seed, Some(7));
        assert_eq!(config.run.source_selection, SourceSelection::Fixed);
        assert_eq!(config.run.source_node.as_deref(), Some("r1"));
        assert_eq!(config.run.concurrency, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.storage.backend, StorageBackend::Mock);
        assert_eq!(config.storage.swift.container, "replication-check");
        assert_eq!(config.report.format, ReportFormat::Text);
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "run:\n  concurrency: 0").unwrap();
        assert!(matches!(
            VerifierConfig::load_from(file.path()),
            Err(ConfigError::Invalid { field: "run.concurrency", .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "run: [1, 2").unwrap();
        assert!(matches!(VerifierConfig::load_from(file.path()), Err(ConfigError::Malformed(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides_backend() {
        std::env::set_var("VERIFIER_STORAGE_BACKEND", "mock");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "storage:\n  backend: swift_cli").unwrap();
        let config = VerifierConfig::load_from(file.path()).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Mock);
        std::env::remove_var("VERIFIER_STORAGE_BACKEND");
    }

    #[test]
    #[serial]
    fn test_load_or_defaults_reports_source() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("verifier.yaml");

        let (config, source) = VerifierConfig::load_or_defaults(&missing, false).unwrap();
        assert_eq!(source, ConfigSource::Defaults);
        assert_eq!(config.run.concurrency, 8);

        assert!(matches!(
            VerifierConfig::load_or_defaults(&missing, true),
            Err(ConfigError::Read { .. })
        ));

        std::fs::write(&missing, "run:\n  concurrency: 3\n").unwrap();
        let (config, source) = VerifierConfig::load_or_defaults(&missing, false).unwrap();
        assert_eq!(source, ConfigSource::File(missing.clone()));
        assert_eq!(config.run.concurrency, 3);
    }
}

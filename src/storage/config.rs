//! Configuration for storage backends

use crate::config::StorageConfig;
use crate::remote::RemoteExecutor;
use crate::storage::{StorageClient, mock_store::MockStorage, swift_cli::SwiftCliStorage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::env;
use log::{info, warn};

const BACKEND_ENV: &str = "VERIFIER_STORAGE_BACKEND";

/// Available storage backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    SwiftCli,
    Mock,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "swift_cli" | "swift-cli" | "swift" | "cli" => Ok(StorageBackend::SwiftCli),
            "mock" => Ok(StorageBackend::Mock),
            _ => Err(format!("Unknown storage backend: {}", s))
        }
    }
}

impl StorageBackend {
    /// Backend override from the environment, if one is set and valid
    pub fn from_env() -> Option<Self> {
        match env::var(BACKEND_ENV) {
            Ok(backend_str) => match backend_str.parse::<StorageBackend>() {
                Ok(backend) => {
                    info!("Using storage backend from environment: {:?}", backend);
                    Some(backend)
                }
                Err(e) => {
                    warn!("Invalid storage backend in environment: {}. Keeping configured backend.", e);
                    None
                }
            },
            Err(_) => None,
        }
    }
}

impl StorageConfig {
    /// Create a storage client based on the configuration
    pub fn create_store(&self, executor: Arc<dyn RemoteExecutor>) -> Arc<dyn StorageClient> {
        match self.backend {
            StorageBackend::SwiftCli => {
                info!("Using swift CLI storage backend, container: {}", self.swift.container);
                Arc::new(SwiftCliStorage::new(self.swift.clone(), executor))
            }
            StorageBackend::Mock => {
                info!("Using mock storage backend");
                Arc::new(MockStorage::new())
            }
        }
    }
}

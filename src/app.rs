//! Application wiring
//!
//! Builds the registry, the remote session layer and the storage adapter
//! from a `VerifierConfig` and hands them to the coordinator.

use log::info;
use std::sync::Arc;

use crate::config::VerifierConfig;
use crate::coordinator::Coordinator;
use crate::error::{ConfigError, RunError};
use crate::registry::NodeRegistry;
use crate::remote::session::SessionPool;
use crate::remote::ssh::SshExecutor;
use crate::storage::config::StorageBackend;
use crate::storage::mock_store::MockStorage;
use crate::storage::StorageClient;
use crate::summary::RunReport;

/// Everything a run needs, wired together.
#[derive(Clone)]
pub struct Verifier {
    pub registry: Arc<NodeRegistry>,
    pub storage: Arc<dyn StorageClient>,
    pub config: VerifierConfig,
}

impl Verifier {
    /// Load the registry named in `config` and wire the configured backend.
    pub fn from_config(config: VerifierConfig) -> Result<Self, ConfigError> {
        let registry = Arc::new(NodeRegistry::load(&config.run.registry_path)?);
        Ok(Self::with_registry(config, registry))
    }

    pub fn with_registry(config: VerifierConfig, registry: Arc<NodeRegistry>) -> Self {
        info!(
            "Initializing verifier: {} nodes, {:?} backend, {:?} sessions",
            registry.len(),
            config.storage.backend,
            config.session.policy
        );
        let pool = Arc::new(SessionPool::new(&registry, config.session.policy));
        let executor = Arc::new(SshExecutor::new(config.session.clone(), pool));
        let storage = config.storage.create_store(executor);
        Self { registry, storage, config }
    }

    /// Verifier over an in-memory store, for tests and dry runs.
    pub fn new_for_testing(mut config: VerifierConfig, registry: Arc<NodeRegistry>, storage: Arc<MockStorage>) -> Self {
        config.storage.backend = StorageBackend::Mock;
        Self { registry, storage, config }
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(self.registry.clone(), self.storage.clone(), &self.config)
    }

    pub async fn run(&self) -> Result<RunReport, RunError> {
        self.coordinator().run().await
    }
}

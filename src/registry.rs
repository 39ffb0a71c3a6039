//! Node Registry
//!
//! Holds the region endpoints under test. The registry is read once at
//! startup and shared read-only for the lifetime of the run.
//!
//! The accepted document is the cluster credentials file:
//!
//! ```json
//! {"hosts": [
//!     {"address": "10.0.0.1", "username": "root", "password": "secret"},
//!     {"address": "10.0.0.2", "username": "root", "role": "eu-west"}
//! ]}
//! ```

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// Node identifier type
pub type NodeId = String;

/// Login credentials for a node's remote shell.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A region endpoint participating in replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub address: String,
    pub port: Option<u16>,
    pub credentials: Credentials,
    /// Optional region tag
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    hosts: Vec<HostEntry>,
}

#[derive(Debug, Deserialize)]
struct HostEntry {
    id: Option<String>,
    address: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    #[serde(alias = "region")]
    role: Option<String>,
}

fn required(value: Option<String>, index: usize, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::MissingField { index, field }),
    }
}

/// Immutable set of nodes, in file order.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
}

impl NodeRegistry {
    /// Load the registry from a JSON or YAML file (chosen by extension, JSON otherwise).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            _ => Self::from_json_str(&content)?,
        };
        info!("Loaded {} nodes from {}", registry.len(), path.display());
        Ok(registry)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let doc: RegistryDocument = serde_json::from_str(content)?;
        Self::from_document(doc)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let doc: RegistryDocument = serde_yaml::from_str(content)?;
        Self::from_document(doc)
    }

    /// Build a registry from already-constructed nodes, applying the same validation.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self, ConfigError> {
        if nodes.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }
        let mut addresses = HashSet::new();
        let mut ids = HashSet::new();
        for node in &nodes {
            let endpoint = format!("{}:{}", node.address.to_lowercase(), node.port.unwrap_or(22));
            if !addresses.insert(endpoint) {
                return Err(ConfigError::DuplicateAddress(node.address.clone()));
            }
            if !ids.insert(node.id.clone()) {
                return Err(ConfigError::DuplicateId(node.id.clone()));
            }
        }
        Ok(Self { nodes })
    }

    fn from_document(doc: RegistryDocument) -> Result<Self, ConfigError> {
        let mut nodes = Vec::with_capacity(doc.hosts.len());
        for (index, entry) in doc.hosts.into_iter().enumerate() {
            let address = required(entry.address, index, "address")?;
            let username = required(entry.username, index, "username")?;
            let id = match entry.id {
                Some(id) if !id.trim().is_empty() => id.trim().to_string(),
                _ => address.clone(),
            };
            debug!("Registry entry {}: id={}, address={}", index, id, address);
            nodes.push(Node {
                id,
                address,
                port: entry.port,
                credentials: Credentials { username, password: entry.password },
                role: entry.role,
            });
        }
        Self::from_nodes(nodes)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Every node except `source`, in registry order.
    pub fn others<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.iter().filter(move |n| n.id != source)
    }
}

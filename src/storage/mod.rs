//! Storage Client Layer Abstraction
//!
//! This module provides an abstraction over the object-storage cluster,
//! allowing the verification engine to exercise different backends (the
//! swift CLI reached over ssh, an in-memory simulated cluster, etc.)
//! without depending on transport details.

pub mod config;
pub mod mock_store;
pub mod swift_cli;

#[cfg(test)]
mod comprehensive_test;

use async_trait::async_trait;
use bytes::Bytes;

use crate::checksum::Checksum;
use crate::error::StorageError;
use crate::registry::Node;

/// Trait defining the storage cluster interface, as seen through one node
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Store `payload` under `key` through `node`'s gateway
    async fn upload(&self, node: &Node, key: &str, payload: Bytes) -> Result<(), StorageError>;

    /// Fetch the object stored under `key` through `node`'s gateway
    async fn download(&self, node: &Node, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove a test object
    async fn delete(&self, node: &Node, key: &str) -> Result<(), StorageError>;

    /// Check that the node and its gateway answer at all
    async fn probe(&self, node: &Node) -> Result<(), StorageError>;

    /// Content digest used to compare replicas
    fn checksum(&self, data: &[u8]) -> Checksum {
        Checksum::compute(data)
    }
}

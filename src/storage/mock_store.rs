//! Mock implementation of StorageClient for testing and dry runs
//!
//! Simulates a replicated cluster in memory. An upload lands on every node
//! at once unless a node is given a behavior: replication lag (a number of
//! reads that still miss the object), a replica that never converges, a
//! corrupted replica, transient transport errors, failing uploads, a node
//! that never answers, or an unreachable node.

use crate::error::StorageError;
use crate::registry::{Node, NodeId};
use crate::storage::StorageClient;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use log::info;

/// Scripted behavior of one simulated node
#[derive(Debug, Clone, Default)]
pub struct NodeBehavior {
    /// Reads of a new object that still miss it
    pub lag_reads: u32,
    pub never_replicates: bool,
    pub corrupt: bool,
    /// Reads that fail with a transport error before anything else happens
    pub transport_errors: u32,
    pub fail_uploads: bool,
    /// Operations never complete
    pub hang: bool,
    pub unreachable: bool,
    /// Added to every operation on the node
    pub latency: Duration,
}

struct StoredObject {
    source: NodeId,
    data: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    objects: HashMap<String, StoredObject>,
    reads: HashMap<(NodeId, String), u32>,
    behaviors: HashMap<NodeId, NodeBehavior>,
}

pub struct MockStorage {
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Counts one operation as in flight until dropped, including on cancellation.
struct InFlight<'a> {
    gauge: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = gauge.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { gauge }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

enum ReadOutcome {
    Data(Vec<u8>),
    Fail(StorageError),
}

impl MockStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn update(self, node: &str, f: impl FnOnce(&mut NodeBehavior)) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            f(state.behaviors.entry(node.to_string()).or_default());
        }
        self
    }

    /// The object becomes visible on `node` after `reads` missed reads
    pub fn with_lag(self, node: &str, reads: u32) -> Self {
        self.update(node, |b| b.lag_reads = reads)
    }

    pub fn never_replicate_to(self, node: &str) -> Self {
        self.update(node, |b| b.never_replicates = true)
    }

    pub fn corrupt_on(self, node: &str) -> Self {
        self.update(node, |b| b.corrupt = true)
    }

    pub fn transport_errors_on(self, node: &str, reads: u32) -> Self {
        self.update(node, |b| b.transport_errors = reads)
    }

    pub fn fail_uploads_on(self, node: &str) -> Self {
        self.update(node, |b| b.fail_uploads = true)
    }

    pub fn hang_on(self, node: &str) -> Self {
        self.update(node, |b| b.hang = true)
    }

    pub fn unreachable(self, node: &str) -> Self {
        self.update(node, |b| b.unreachable = true)
    }

    pub fn with_latency(self, node: &str, latency: Duration) -> Self {
        self.update(node, |b| b.latency = latency)
    }

    /// Get the number of objects in the simulated cluster
    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    pub fn object_exists(&self, key: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(key)
    }

    /// Number of downloads of `key` attempted through `node`
    pub fn read_count(&self, node: &str, key: &str) -> u32 {
        let state = self.state.lock().unwrap();
        state
            .reads
            .get(&(node.to_string(), key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Clear all objects and read counters, keeping behaviors
    /// Operations currently in progress, across all nodes.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of operations ever in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.objects.clear();
        state.reads.clear();
    }

    fn behavior(&self, node: &str) -> NodeBehavior {
        self.state
            .lock()
            .unwrap()
            .behaviors
            .get(node)
            .cloned()
            .unwrap_or_default()
    }

    /// Simulated latency, hanging and reachability shared by all operations.
    async fn enter(&self, node: &Node) -> Result<NodeBehavior, StorageError> {
        let behavior = self.behavior(&node.id);
        if behavior.hang {
            futures::future::pending::<()>().await;
        }
        if !behavior.latency.is_zero() {
            tokio::time::sleep(behavior.latency).await;
        }
        if behavior.unreachable {
            return Err(StorageError::Transport(format!("connection to {} refused", node.id)));
        }
        Ok(behavior)
    }

    fn read(&self, node: &Node, key: &str, behavior: &NodeBehavior) -> ReadOutcome {
        let mut state = self.state.lock().unwrap();
        let count = state.reads.entry((node.id.clone(), key.to_string())).or_insert(0);
        *count += 1;
        let n = *count;

        if n <= behavior.transport_errors {
            return ReadOutcome::Fail(StorageError::Transport(format!("connection to {} reset by peer", node.id)));
        }
        let not_found = || StorageError::NotFound { node: node.id.clone(), key: key.to_string() };
        let object = match state.objects.get(key) {
            Some(object) => object,
            None => return ReadOutcome::Fail(not_found()),
        };
        if object.source != node.id {
            if behavior.never_replicates || n <= behavior.transport_errors + behavior.lag_reads {
                return ReadOutcome::Fail(not_found());
            }
            if behavior.corrupt {
                let mut data = object.data.clone();
                match data.first_mut() {
                    Some(byte) => *byte ^= 0xff,
                    None => data.push(0),
                }
                return ReadOutcome::Data(data);
            }
        }
        ReadOutcome::Data(object.data.clone())
    }
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageClient for MockStorage {
    async fn upload(&self, node: &Node, key: &str, payload: Bytes) -> Result<(), StorageError> {
        let _op = InFlight::enter(&self.in_flight, &self.max_in_flight);
        let behavior = self.enter(node).await?;
        if behavior.fail_uploads {
            return Err(StorageError::Upload {
                node: node.id.clone(),
                status: 1,
                stderr: "Object PUT failed: 503 Service Unavailable".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.objects.insert(
            key.to_string(),
            StoredObject { source: node.id.clone(), data: payload.to_vec() },
        );
        info!("Mock: Uploaded {} ({} bytes) via {}", key, payload.len(), node.id);
        Ok(())
    }

    async fn download(&self, node: &Node, key: &str) -> Result<Vec<u8>, StorageError> {
        let _op = InFlight::enter(&self.in_flight, &self.max_in_flight);
        let behavior = self.enter(node).await?;
        match self.read(node, key, &behavior) {
            ReadOutcome::Data(data) => Ok(data),
            ReadOutcome::Fail(e) => Err(e),
        }
    }

    async fn delete(&self, node: &Node, key: &str) -> Result<(), StorageError> {
        let _op = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.enter(node).await?;
        let mut state = self.state.lock().unwrap();
        match state.objects.remove(key) {
            Some(_) => {
                info!("Mock: Deleted {} via {}", key, node.id);
                Ok(())
            }
            None => Err(StorageError::NotFound { node: node.id.clone(), key: key.to_string() }),
        }
    }

    async fn probe(&self, node: &Node) -> Result<(), StorageError> {
        let _op = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.enter(node).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use crate::registry::NodeRegistry;

    fn registry() -> NodeRegistry {
        NodeRegistry::from_json_str(
            r#"{"hosts": [{"id": "a", "address": "10.0.0.1", "username": "root"},
                          {"id": "b", "address": "10.0.0.2", "username": "root"}]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_mock_storage_basic_operations() {
        let registry = registry();
        let (a, b) = (registry.get("a").unwrap(), registry.get("b").unwrap());
        let store = MockStorage::new();
        let data = Bytes::from_static(b"Hello, Mock Storage!");

        assert_eq!(store.object_count(), 0);
        store.upload(a, "obj", data.clone()).await.unwrap();
        assert!(store.object_exists("obj"));

        let replica = store.download(b, "obj").await.unwrap();
        assert_eq!(store.checksum(&replica), Checksum::compute(&data));
        assert_eq!(store.read_count("b", "obj"), 1);

        store.delete(a, "obj").await.unwrap();
        assert!(matches!(store.download(b, "obj").await, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_mock_storage_lag_and_transport_errors() {
        let registry = registry();
        let (a, b) = (registry.get("a").unwrap(), registry.get("b").unwrap());
        let store = MockStorage::new().with_lag("b", 1).transport_errors_on("b", 1);
        store.upload(a, "obj", Bytes::from_static(b"x")).await.unwrap();

        assert!(matches!(store.download(b, "obj").await, Err(StorageError::Transport(_))));
        assert!(matches!(store.download(b, "obj").await, Err(StorageError::NotFound { .. })));
        assert_eq!(store.download(b, "obj").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_mock_storage_corruption_and_failures() {
        let registry = registry();
        let (a, b) = (registry.get("a").unwrap(), registry.get("b").unwrap());
        let store = MockStorage::new().corrupt_on("b").fail_uploads_on("b").unreachable("c");
        store.upload(a, "obj", Bytes::from_static(b"abc")).await.unwrap();
        assert_ne!(store.download(b, "obj").await.unwrap(), b"abc");
        // the source itself always serves the original
        assert_eq!(store.download(a, "obj").await.unwrap(), b"abc");
        assert!(matches!(
            store.upload(b, "other", Bytes::from_static(b"abc")).await,
            Err(StorageError::Upload { .. })
        ));
        assert!(store.probe(a).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_storage_clear() {
        let registry = registry();
        let a = registry.get("a").unwrap();
        let store = MockStorage::new();
        store.upload(a, "obj", Bytes::from_static(b"abc")).await.unwrap();
        store.download(a, "obj").await.unwrap();
        store.clear();
        assert_eq!(store.object_count(), 0);
        assert_eq!(store.read_count("a", "obj"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_storage_tracks_concurrent_operations() {
        let registry = registry();
        let (a, b) = (registry.get("a").unwrap(), registry.get("b").unwrap());
        let store = MockStorage::new()
            .with_latency("a", Duration::from_millis(50))
            .hang_on("b");

        let (_, _, _) = tokio::join!(store.probe(a), store.probe(a), store.probe(a));
        assert_eq!(store.max_in_flight(), 3);
        assert_eq!(store.in_flight(), 0);

        // a cancelled operation leaves the gauge
        let hung = tokio::time::timeout(Duration::from_secs(1), store.probe(b)).await;
        assert!(hung.is_err());
        assert_eq!(store.in_flight(), 0);
    }
}

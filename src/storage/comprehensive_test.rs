//! Comprehensive tests for the storage adapter layer

#[cfg(test)]
mod integration_tests {
    use crate::config::{StorageConfig, SwiftConfig};
    use crate::error::{ExecError, StorageError};
    use crate::registry::{Node, NodeRegistry};
    use crate::remote::{CommandOutput, RemoteExecutor};
    use crate::storage::config::StorageBackend;
    use crate::storage::swift_cli::SwiftCliStorage;
    use crate::storage::StorageClient;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    /// Records every command and answers with a canned output.
    struct ScriptedExecutor {
        calls: Mutex<Vec<(String, String, Option<Bytes>)>>,
        respond: Box<dyn Fn(&str) -> Result<CommandOutput, ExecError> + Send + Sync>,
    }

    impl ScriptedExecutor {
        fn new(respond: impl Fn(&str) -> Result<CommandOutput, ExecError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self { calls: Mutex::new(Vec::new()), respond: Box::new(respond) })
        }

        fn calls(&self) -> Vec<(String, String, Option<Bytes>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn execute(&self, node: &Node, command: &str, stdin: Option<Bytes>) -> Result<CommandOutput, ExecError> {
            self.calls.lock().unwrap().push((node.id.clone(), command.to_string(), stdin));
            (self.respond)(command)
        }
    }

    fn output(status: i32, stdout: &[u8], stderr: &str) -> CommandOutput {
        CommandOutput { stdout: stdout.to_vec(), stderr: stderr.as_bytes().to_vec(), exit_status: status }
    }

    fn registry() -> NodeRegistry {
        NodeRegistry::from_json_str(
            r#"{"hosts": [{"id": "east", "address": "10.1.0.1", "username": "root", "password": "pw"},
                          {"id": "west", "address": "10.2.0.1", "username": "root", "password": "pw"}]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_upload_pipes_payload_through_local_gateway() {
        let registry = registry();
        let exec = ScriptedExecutor::new(|_| Ok(output(0, b"", "")));
        let store = SwiftCliStorage::new(SwiftConfig::default(), exec.clone());

        store
            .upload(registry.get("east").unwrap(), "k-1", Bytes::from_static(b"payload"))
            .await
            .expect("Upload failed");

        let calls = exec.calls();
        assert_eq!(calls.len(), 1);
        let (node, command, stdin) = &calls[0];
        assert_eq!(node, "east");
        assert!(command.contains("-A http://10.1.0.1:8080/auth/v1.0"));
        assert!(command.contains("-U admin:admin -K admin"));
        assert!(command.contains("upload --object-name k-1 replication-check"));
        assert_eq!(stdin.as_deref(), Some(&b"payload"[..]));
    }

    #[tokio::test]
    async fn test_download_uses_target_gateway_and_returns_stdout() {
        let registry = registry();
        let exec = ScriptedExecutor::new(|_| Ok(output(0, b"replica bytes", "")));
        let store = SwiftCliStorage::new(SwiftConfig::default(), exec.clone());

        let data = store.download(registry.get("west").unwrap(), "k-1").await.expect("Download failed");
        assert_eq!(data, b"replica bytes");
        let (_, command, stdin) = &exec.calls()[0];
        assert!(command.contains("http://10.2.0.1:8080/auth/v1.0"));
        assert!(command.ends_with("download replication-check k-1 -o -"));
        assert!(stdin.is_none());
    }

    #[tokio::test]
    async fn test_download_error_classification() {
        let registry = registry();
        let west = registry.get("west").unwrap();

        let missing = SwiftCliStorage::new(
            SwiftConfig::default(),
            ScriptedExecutor::new(|_| Ok(output(1, b"", "Error downloading object 'replication-check/k': 404 Not Found"))),
        );
        assert!(matches!(missing.download(west, "k").await, Err(StorageError::NotFound { .. })));

        let unreachable = SwiftCliStorage::new(
            SwiftConfig::default(),
            ScriptedExecutor::new(|_| Ok(output(255, b"", "ssh: connect to host 10.2.0.1 port 22: Connection refused"))),
        );
        assert!(matches!(unreachable.download(west, "k").await, Err(StorageError::Transport(_))));

        let broken = SwiftCliStorage::new(
            SwiftConfig::default(),
            ScriptedExecutor::new(|_| Ok(output(1, b"", "Auth GET failed: 401 Unauthorized"))),
        );
        assert!(matches!(broken.download(west, "k").await, Err(StorageError::Download { status: 1, .. })));

        let timed_out = SwiftCliStorage::new(
            SwiftConfig::default(),
            ScriptedExecutor::new(|_| Err(ExecError::Timeout { node: "west".into(), secs: 60 })),
        );
        assert!(matches!(timed_out.download(west, "k").await, Err(StorageError::Transport(_))));
    }

    #[tokio::test]
    async fn test_upload_non_zero_exit_is_upload_error() {
        let registry = registry();
        let store = SwiftCliStorage::new(
            SwiftConfig::default(),
            ScriptedExecutor::new(|_| Ok(output(1, b"", "Object PUT failed: 503"))),
        );
        match store.upload(registry.get("east").unwrap(), "k", Bytes::from_static(b"x")).await {
            Err(StorageError::Upload { node, status, stderr }) => {
                assert_eq!(node, "east");
                assert_eq!(status, 1);
                assert!(stderr.contains("503"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_custom_swift_settings_are_quoted() {
        let registry = registry();
        let exec = ScriptedExecutor::new(|_| Ok(output(0, b"", "")));
        let config = SwiftConfig {
            auth_url: "https://{address}/auth/v1.0".to_string(),
            user: "test:tester".to_string(),
            key: "s3cr3t key".to_string(),
            container: "qa bucket".to_string(),
            binary: "/usr/bin/swift".to_string(),
        };
        let store = SwiftCliStorage::new(config, exec.clone());
        store.delete(registry.get("east").unwrap(), "k").await.unwrap();
        store.probe(registry.get("west").unwrap()).await.unwrap();

        let calls = exec.calls();
        assert_eq!(
            calls[0].1,
            "/usr/bin/swift -A https://10.1.0.1/auth/v1.0 -U test:tester -K 's3cr3t key' delete 'qa bucket' k"
        );
        assert!(calls[1].1.ends_with(" stat"));
    }

    #[tokio::test]
    async fn test_create_store_from_config() {
        let registry = registry();
        let exec = ScriptedExecutor::new(|_| Ok(output(0, b"", "")));
        let config = StorageConfig { backend: StorageBackend::Mock, ..Default::default() };
        let store = config.create_store(exec.clone());

        let east = registry.get("east").unwrap();
        store.upload(east, "k", Bytes::from_static(b"data")).await.unwrap();
        assert_eq!(store.download(registry.get("west").unwrap(), "k").await.unwrap(), b"data");
        // the mock backend never touches the executor
        assert!(exec.calls().is_empty());

        let config = StorageConfig { backend: StorageBackend::SwiftCli, ..Default::default() };
        let store = config.create_store(exec.clone());
        store.probe(east).await.unwrap();
        assert_eq!(exec.calls().len(), 1);
    }
}

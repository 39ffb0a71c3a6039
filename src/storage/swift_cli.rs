//! Storage adapter driving the `swift` command-line client on each node
//!
//! Every node talks to the cluster through its own gateway: the auth URL
//! template is expanded with the address of the node the command runs on.

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use std::sync::Arc;

use crate::config::SwiftConfig;
use crate::error::StorageError;
use crate::registry::Node;
use crate::remote::ssh::SSH_CONNECTION_FAILURE;
use crate::remote::{shell_quote, CommandOutput, RemoteExecutor};
use crate::storage::StorageClient;

pub struct SwiftCliStorage {
    config: SwiftConfig,
    executor: Arc<dyn RemoteExecutor>,
}

impl SwiftCliStorage {
    pub fn new(config: SwiftConfig, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { config, executor }
    }

    fn auth_url(&self, node: &Node) -> String {
        self.config.auth_url.replace("{address}", &node.address)
    }

    /// `swift -A <url> -U <user> -K <key>` for `node`
    fn base_command(&self, node: &Node) -> String {
        format!(
            "{} -A {} -U {} -K {}",
            shell_quote(&self.config.binary),
            shell_quote(&self.auth_url(node)),
            shell_quote(&self.config.user),
            shell_quote(&self.config.key),
        )
    }

    pub fn upload_command(&self, node: &Node, key: &str) -> String {
        format!(
            "f=$(mktemp) && trap 'rm -f \"$f\"' EXIT && cat > \"$f\" && {} upload --object-name {} {} \"$f\"",
            self.base_command(node),
            shell_quote(key),
            shell_quote(&self.config.container),
        )
    }

    pub fn download_command(&self, node: &Node, key: &str) -> String {
        format!(
            "{} download {} {} -o -",
            self.base_command(node),
            shell_quote(&self.config.container),
            shell_quote(key),
        )
    }

    pub fn delete_command(&self, node: &Node, key: &str) -> String {
        format!(
            "{} delete {} {}",
            self.base_command(node),
            shell_quote(&self.config.container),
            shell_quote(key),
        )
    }

    pub fn stat_command(&self, node: &Node) -> String {
        format!("{} stat", self.base_command(node))
    }
}

fn is_connection_failure(output: &CommandOutput) -> bool {
    output.exit_status == SSH_CONNECTION_FAILURE || output.exit_status < 0
}

fn is_not_found(output: &CommandOutput) -> bool {
    let stderr = output.stderr_lossy().to_lowercase();
    stderr.contains("404") || stderr.contains("not found")
}

fn transport(node: &Node, output: &CommandOutput) -> StorageError {
    StorageError::Transport(format!(
        "{} exited with status {}: {}",
        node.id,
        output.exit_status,
        output.stderr_lossy()
    ))
}

#[async_trait]
impl StorageClient for SwiftCliStorage {
    async fn upload(&self, node: &Node, key: &str, payload: Bytes) -> Result<(), StorageError> {
        let command = self.upload_command(node, key);
        let output = self.executor.execute(node, &command, Some(payload)).await?;
        if output.success() {
            debug!("Uploaded {} via {}", key, node.id);
            return Ok(());
        }
        Err(StorageError::Upload {
            node: node.id.clone(),
            status: output.exit_status,
            stderr: output.stderr_lossy(),
        })
    }

    async fn download(&self, node: &Node, key: &str) -> Result<Vec<u8>, StorageError> {
        let command = self.download_command(node, key);
        let output = self.executor.execute(node, &command, None).await?;
        if output.success() {
            return Ok(output.stdout);
        }
        if is_connection_failure(&output) {
            return Err(transport(node, &output));
        }
        if is_not_found(&output) {
            return Err(StorageError::NotFound {
                node: node.id.clone(),
                key: key.to_string(),
            });
        }
        Err(StorageError::Download {
            node: node.id.clone(),
            status: output.exit_status,
            stderr: output.stderr_lossy(),
        })
    }

    async fn delete(&self, node: &Node, key: &str) -> Result<(), StorageError> {
        let command = self.delete_command(node, key);
        let output = self.executor.execute(node, &command, None).await?;
        if output.success() {
            Ok(())
        } else {
            Err(transport(node, &output))
        }
    }

    async fn probe(&self, node: &Node) -> Result<(), StorageError> {
        let output = self.executor.execute(node, &self.stat_command(node), None).await?;
        if output.success() {
            Ok(())
        } else {
            Err(transport(node, &output))
        }
    }
}

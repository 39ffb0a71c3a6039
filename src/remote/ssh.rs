//! Remote execution through the system OpenSSH client
//!
//! Host name, port, user and ProxyCommand resolution are left to `ssh`
//! itself, so the operator's `~/.ssh/config` applies unchanged. Nodes that
//! carry a password go through `sshpass -e`; the password travels in the
//! child's environment, never on the command line.

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::SessionConfig;
use crate::error::ExecError;
use crate::registry::Node;
use crate::remote::session::SessionPool;
use crate::remote::{redact_secrets, CommandOutput, RemoteExecutor};

/// Exit status ssh reserves for its own (connection) failures
pub const SSH_CONNECTION_FAILURE: i32 = 255;

pub struct SshExecutor {
    config: SessionConfig,
    pool: Arc<SessionPool>,
}

impl SshExecutor {
    pub fn new(config: SessionConfig, pool: Arc<SessionPool>) -> Self {
        Self { config, pool }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Program and arguments for running `command` on `node`.
    pub fn command_line(&self, node: &Node, command: &str) -> (String, Vec<String>) {
        let mut args = Vec::new();
        let program = if node.credentials.password.is_some() {
            args.push("-e".to_string());
            args.push(self.config.ssh_binary.clone());
            self.config.sshpass_binary.clone()
        } else {
            self.config.ssh_binary.clone()
        };

        args.push("-o".to_string());
        args.push(format!("ConnectTimeout={}", self.config.connect_timeout_secs));
        args.push("-o".to_string());
        args.push("StrictHostKeyChecking=accept-new".to_string());
        if node.credentials.password.is_none() {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        if let Some(port) = node.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push("-l".to_string());
        args.push(node.credentials.username.clone());
        args.push(node.address.clone());
        args.push("--".to_string());
        args.push(command.to_string());
        (program, args)
    }

    async fn run(&self, node: &Node, command: &str, stdin: Option<Bytes>) -> Result<CommandOutput, ExecError> {
        let (program, args) = self.command_line(node, command);
        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(password) = &node.credentials.password {
            cmd.env("SSHPASS", password);
        }

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;

        if let Some(data) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(&data).await.map_err(|source| ExecError::Io {
                    node: node.id.clone(),
                    source,
                })?;
                pipe.shutdown().await.map_err(|source| ExecError::Io {
                    node: node.id.clone(),
                    source,
                })?;
            }
        }

        let output = child.wait_with_output().await.map_err(|source| ExecError::Io {
            node: node.id.clone(),
            source,
        })?;
        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status: output.status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, node: &Node, command: &str, stdin: Option<Bytes>) -> Result<CommandOutput, ExecError> {
        let _session = self.pool.checkout(&node.id).await;
        debug!("ssh {}: {}", node.id, redact_secrets(command));
        let limit = Duration::from_secs(self.config.command_timeout_secs);
        match tokio::time::timeout(limit, self.run(node, command, stdin)).await {
            Ok(result) => {
                if let Ok(output) = &result {
                    if output.exit_status == SSH_CONNECTION_FAILURE {
                        warn!("ssh connection to {} failed: {}", node.id, output.stderr_lossy());
                    }
                }
                result
            }
            Err(_) => Err(ExecError::Timeout {
                node: node.id.clone(),
                secs: self.config.command_timeout_secs,
            }),
        }
    }
}

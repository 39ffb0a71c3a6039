//! Remote Executor Layer Abstraction
//!
//! This module provides an abstraction over running shell commands on a
//! region node, so the storage adapter never depends on how the command
//! actually reaches the node.

pub mod session;
pub mod ssh;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ExecError;
use crate::registry::Node;

/// Captured result of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// -1 when the process was terminated by a signal
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Trait defining the remote execution interface
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` through the node's shell, optionally feeding `stdin`
    async fn execute(&self, node: &Node, command: &str, stdin: Option<Bytes>) -> Result<CommandOutput, ExecError>;
}

/// Quote a value for a POSIX shell command line.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '='))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Flags whose following word is a secret
const SECRET_FLAGS: &[&str] = &["-K", "--key", "--os-password"];

/// Byte spans of the shell words in `command`, honouring quotes and escapes.
fn shell_words(command: &str) -> Vec<(usize, usize)> {
    let mut words = Vec::new();
    let mut start = None;
    let (mut single, mut double, mut escaped) = (false, false, false);
    for (i, c) in command.char_indices() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if !single => escaped = true,
            '\'' if !double => single = !single,
            '"' if !single => double = !double,
            c if c.is_whitespace() && !single && !double => {
                if let Some(s) = start.take() {
                    words.push((s, i));
                }
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        words.push((s, command.len()));
    }
    words
}

/// `command` with the value of every credential flag replaced, for logging.
pub fn redact_secrets(command: &str) -> String {
    let words = shell_words(command);
    let mut out = String::with_capacity(command.len());
    let mut last = 0;
    for pair in words.windows(2) {
        let (flag, value) = (pair[0], pair[1]);
        if SECRET_FLAGS.contains(&&command[flag.0..flag.1]) {
            out.push_str(&command[last..value.0]);
            out.push_str("***");
            last = value.1;
        }
    }
    out.push_str(&command[last..]);
    out
}

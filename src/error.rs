//! Error taxonomy
//!
//! Only `ConfigError` and `RunError` ever abort a run. Everything that goes
//! wrong inside a trial is folded into the result model instead.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed registry or run configuration. Fatal before any trial starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error("node entry {index} is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },
    #[error("duplicate node address: {0}")]
    DuplicateAddress(String),
    #[error("duplicate node id: {0}")]
    DuplicateId(String),
    #[error("registry contains no nodes")]
    EmptyRegistry,
    #[error("unknown node id: {0}")]
    UnknownNode(String),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Malformed(e.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Malformed(e.to_string())
    }
}

/// Failure of a single remote command execution.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error talking to {node}: {source}")]
    Io {
        node: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command on {node} timed out after {secs}s")]
    Timeout { node: String, secs: u64 },
}

/// Failure of a storage operation against one node.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("upload to {node} failed with exit status {status}: {stderr}")]
    Upload { node: String, status: i32, stderr: String },
    #[error("download from {node} failed with exit status {status}: {stderr}")]
    Download { node: String, status: i32, stderr: String },
    #[error("object {key} not found on {node}")]
    NotFound { node: String, key: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<ExecError> for StorageError {
    fn from(e: ExecError) -> Self {
        StorageError::Transport(e.to_string())
    }
}

/// Conditions that abort a whole run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no node in the registry is reachable")]
    NoReachableNodes,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_becomes_transport() {
        let err: StorageError = ExecError::Timeout { node: "r1".into(), secs: 5 }.into();
        match err {
            StorageError::Transport(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingField { index: 2, field: "address" };
        assert_eq!(err.to_string(), "node entry 2 is missing required field `address`");
    }
}

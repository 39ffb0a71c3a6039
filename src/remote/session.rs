//! Per-node session handles
//!
//! With the `serialized` policy each node owns exactly one session slot;
//! a command checks the slot out for its whole duration, so two commands
//! never share a node's session at the same time even when many trials
//! run in parallel. With `per_command` every command gets its own
//! short-lived session and no per-node exclusion applies.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::registry::{NodeId, NodeRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    #[default]
    Serialized,
    PerCommand,
}

impl std::str::FromStr for SessionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serialized" | "pooled" => Ok(SessionPolicy::Serialized),
            "per_command" | "per-command" => Ok(SessionPolicy::PerCommand),
            _ => Err(format!("Unknown session policy: {}", s)),
        }
    }
}

/// Proof of exclusive (or short-lived) access to a node's session.
/// Dropping the handle checks the session back in.
pub struct SessionHandle {
    node: NodeId,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl SessionHandle {
    pub fn node(&self) -> &str {
        &self.node
    }
}

pub struct SessionPool {
    policy: SessionPolicy,
    slots: HashMap<NodeId, Arc<Mutex<()>>>,
    commands: HashMap<NodeId, AtomicU64>,
}

impl SessionPool {
    pub fn new(registry: &NodeRegistry, policy: SessionPolicy) -> Self {
        let slots = registry
            .nodes()
            .iter()
            .map(|n| (n.id.clone(), Arc::new(Mutex::new(()))))
            .collect();
        let commands = registry
            .nodes()
            .iter()
            .map(|n| (n.id.clone(), AtomicU64::new(0)))
            .collect();
        Self { policy, slots, commands }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Check out the session for `node`, waiting while another command holds it.
    pub async fn checkout(&self, node: &str) -> SessionHandle {
        if let Some(counter) = self.commands.get(node) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        let guard = match (self.policy, self.slots.get(node)) {
            (SessionPolicy::Serialized, Some(slot)) => Some(slot.clone().lock_owned().await),
            _ => None,
        };
        debug!("Checked out session for {} ({:?})", node, self.policy);
        SessionHandle { node: node.to_string(), _guard: guard }
    }

    /// Number of commands issued to `node` so far.
    pub fn command_count(&self, node: &str) -> u64 {
        self.commands
            .get(node)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

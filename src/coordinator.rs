//! Trial Scheduler / Concurrency Coordinator
//!
//! Two independent limits apply. `max_concurrent_trials` bounds how many
//! trials are in flight; `concurrency` bounds remote operations (each upload
//! and each download attempt takes one permit) across all trials and all
//! per-target fan-out. Operation permits are never held while waiting for a
//! trial slot or during backoff, so the two cannot deadlock. Preflight probes
//! draw from the same operation budget and are cut off by the run deadline.

use chrono::Utc;
use futures::future::join_all;
use log::{error, info, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};

use crate::config::{RunConfig, SourceSelection, VerifierConfig};
use crate::engine::{EngineSettings, ReplicationEngine};
use crate::error::{ConfigError, RunError};
use crate::model::{FailureKind, Trial, TrialResult};
use crate::registry::{Node, NodeId, NodeRegistry};
use crate::storage::StorageClient;
use crate::summary::{RunReport, RunSummary};

pub struct Coordinator {
    registry: Arc<NodeRegistry>,
    storage: Arc<dyn StorageClient>,
    run: RunConfig,
    settings: EngineSettings,
    /// Budget of in-flight remote operations, shared by preflight and trials
    operations: Arc<Semaphore>,
}

impl Coordinator {
    pub fn new(registry: Arc<NodeRegistry>, storage: Arc<dyn StorageClient>, config: &VerifierConfig) -> Self {
        let settings = EngineSettings {
            payload_size: config.run.payload_size,
            payload_seed: config.run.payload_seed,
            retry: config.retry.clone(),
            trial_timeout: config.run.trial_timeout(),
            cleanup: config.run.cleanup,
        };
        Self {
            registry,
            storage,
            run: config.run.clone(),
            settings,
            operations: Arc::new(Semaphore::new(config.run.concurrency)),
        }
    }

    /// Source node of every trial, in trial order.
    pub fn plan(&self) -> Result<Vec<Node>, ConfigError> {
        let nodes = self.registry.nodes();
        if nodes.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }
        let count = self.run.trial_count.unwrap_or(nodes.len());
        let sources = match self.run.source_selection {
            SourceSelection::RoundRobin => (0..count).map(|i| nodes[i % nodes.len()].clone()).collect(),
            SourceSelection::Random => {
                let mut rng = rand::thread_rng();
                (0..count).map(|_| nodes[rng.gen_range(0..nodes.len())].clone()).collect()
            }
            SourceSelection::Fixed => {
                let id = self.run.source_node.as_deref().ok_or(ConfigError::Invalid {
                    field: "run.source_node",
                    reason: "required when source_selection is fixed".to_string(),
                })?;
                let node = self
                    .registry
                    .get(id)
                    .ok_or_else(|| ConfigError::UnknownNode(id.to_string()))?;
                vec![node.clone(); count]
            }
        };
        Ok(sources)
    }

    /// Probe every node. Returns the unreachable ones; fails only if none answers.
    /// Each probe is bounded by the trial timeout and by `run_deadline`.
    pub async fn preflight(&self, run_deadline: Option<Instant>) -> Result<Vec<NodeId>, RunError> {
        let limit = self.settings.trial_timeout;
        let probe_deadline = Instant::now() + limit;
        let deadline = match run_deadline {
            Some(run) if run < probe_deadline => run,
            _ => probe_deadline,
        };
        let probes = self.registry.nodes().iter().map(|node| async move {
            let probe = async {
                let _permit = self.operations.acquire().await.ok();
                self.storage.probe(node).await
            };
            let reachable = match timeout_at(deadline, probe).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!("Preflight: {} is unreachable: {}", node.id, e);
                    false
                }
                Err(_) => {
                    warn!("Preflight: {} did not answer before the deadline", node.id);
                    false
                }
            };
            (node.id.clone(), reachable)
        });
        let results = join_all(probes).await;
        let unreachable: Vec<NodeId> = results
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(id, _)| id.clone())
            .collect();
        if unreachable.len() == results.len() {
            error!("Preflight: none of the {} nodes is reachable", results.len());
            return Err(RunError::NoReachableNodes);
        }
        info!("Preflight: {}/{} nodes reachable", results.len() - unreachable.len(), results.len());
        Ok(unreachable)
    }

    /// Plan, preflight, run every trial and aggregate.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let sources = self.plan()?;
        let started_at = Utc::now();
        let run_deadline = self.run.global_timeout().map(|t| Instant::now() + t);
        let unreachable_nodes = self.preflight(run_deadline).await?;

        let trials = self.run_trials(sources, run_deadline).await;
        let summary = RunSummary::from_trials(&trials);
        info!(
            "Run finished: {} trials, {} consistent, {} partially consistent, {} inconsistent, {} failed",
            summary.total_trials, summary.consistent, summary.partially_consistent, summary.inconsistent, summary.failed
        );
        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            unreachable_nodes,
            summary,
            trials,
        })
    }

    /// Run one trial per entry of `sources`, bounded by the configured limits.
    pub async fn run_trials(&self, sources: Vec<Node>, run_deadline: Option<Instant>) -> Vec<TrialResult> {
        let engine = Arc::new(ReplicationEngine::new(
            self.registry.clone(),
            self.storage.clone(),
            self.operations.clone(),
            self.settings.clone(),
        ));
        let slots = Arc::new(Semaphore::new(self.run.max_concurrent_trials));

        info!(
            "Starting {} trials ({} at a time, {} concurrent operations, deadline {})",
            sources.len(),
            self.run.max_concurrent_trials,
            self.run.concurrency,
            self.run
                .global_timeout()
                .map(|d: Duration| format!("{}s", d.as_secs()))
                .unwrap_or_else(|| "none".to_string())
        );

        let handles: Vec<_> = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let engine = engine.clone();
                let slots = slots.clone();
                let source_id = source.id.clone();
                let handle = tokio::spawn(async move {
                    let _slot = slots.acquire_owned().await.ok();
                    engine.run_trial(index, &source, run_deadline).await
                });
                (index, source_id, handle)
            })
            .collect();

        let mut trials = Vec::with_capacity(handles.len());
        for (index, source_id, handle) in handles {
            match handle.await {
                Ok(result) => trials.push(result),
                Err(e) => {
                    error!("Trial {} task aborted: {}", index, e);
                    trials.push(TrialResult::failed_upload(
                        Trial::unstarted(index, source_id),
                        format!("trial task aborted: {}", e),
                        FailureKind::Aborted,
                        None,
                    ));
                }
            }
        }
        trials.sort_by_key(|t| t.trial.index);
        trials
    }
}

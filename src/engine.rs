//! Replication Verification Engine
//!
//! One trial is: generate a payload, upload it through the source node,
//! then verify every other node in parallel. Each (trial, target) pair runs
//! its own bounded retry loop:
//!
//! ```text
//!   attempt n ──match──────────────────────────────▶ Matched
//!      │
//!      └─miss/error─▶ n == max_attempts ──────────▶ Exhausted
//!                       │
//!                       └─▶ backoff(n) past deadline ▶ TimedOut
//!                             │
//!                             └─▶ sleep, attempt n+1
//! ```
//!
//! A deadline hit while an attempt is in flight cancels the attempt and
//! records it as `Timeout`. Nothing in here returns an error: failures are
//! folded into the `TrialResult`.

use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use crate::error::StorageError;
use crate::model::{
    new_object_key, AttemptError, FailureKind, ReadAttempt, TargetOutcome, Trial, TrialResult,
};
use crate::payload::Payload;
use crate::registry::{Node, NodeId, NodeRegistry};
use crate::retry::RetryPolicy;
use crate::storage::StorageClient;

/// Per-trial knobs of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub payload_size: usize,
    pub payload_seed: Option<u64>,
    pub retry: RetryPolicy,
    pub trial_timeout: Duration,
    pub cleanup: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            payload_size: 512 * 2048,
            payload_seed: None,
            retry: RetryPolicy::default(),
            trial_timeout: Duration::from_secs(300),
            cleanup: true,
        }
    }
}

enum OpFailure {
    Storage(StorageError),
    Deadline,
}

impl From<StorageError> for AttemptError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => AttemptError::NotFound,
            StorageError::Transport(msg) => AttemptError::Transport(msg),
            other => AttemptError::Transport(other.to_string()),
        }
    }
}

pub struct ReplicationEngine {
    registry: Arc<NodeRegistry>,
    storage: Arc<dyn StorageClient>,
    /// Global budget of in-flight remote operations
    limiter: Arc<Semaphore>,
    settings: EngineSettings,
}

impl ReplicationEngine {
    pub fn new(
        registry: Arc<NodeRegistry>,
        storage: Arc<dyn StorageClient>,
        limiter: Arc<Semaphore>,
        settings: EngineSettings,
    ) -> Self {
        Self { registry, storage, limiter, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run one remote operation under the global budget, cancelled at `deadline`.
    /// The permit is held only for the operation itself.
    async fn guarded<T, F>(&self, deadline: Instant, op: F) -> Result<T, OpFailure>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        if Instant::now() >= deadline {
            return Err(OpFailure::Deadline);
        }
        let work = async {
            let _permit = self.limiter.acquire().await.map_err(|_| OpFailure::Deadline)?;
            op.await.map_err(OpFailure::Storage)
        };
        match timeout_at(deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(OpFailure::Deadline),
        }
    }

    /// Execute a full trial with `source` as the writer.
    pub async fn run_trial(&self, index: usize, source: &Node, run_deadline: Option<Instant>) -> TrialResult {
        let seed = self.settings.payload_seed.map(|s| s.wrapping_add(index as u64));
        let payload = Payload::generate(self.settings.payload_size, seed);
        let trial = Trial {
            trial_id: Uuid::new_v4(),
            index,
            source_node: source.id.clone(),
            object_key: new_object_key(),
            payload_checksum: payload.checksum,
            payload_size: payload.len(),
            created_at: Utc::now(),
        };

        let trial_deadline = Instant::now() + self.settings.trial_timeout;
        let deadline = match run_deadline {
            Some(run) if run < trial_deadline => run,
            _ => trial_deadline,
        };

        info!(
            "Trial {} ({}): uploading {} bytes as {} via {} (md5 {})",
            trial.index, trial.trial_id, trial.payload_size, trial.object_key, source.id, trial.payload_checksum
        );

        let upload_started = Instant::now();
        let upload = self
            .guarded(deadline, self.storage.upload(source, &trial.object_key, payload.data.clone()))
            .await;
        let upload_latency = upload_started.elapsed();
        if let Err(failure) = upload {
            let (reason, cause) = match failure {
                OpFailure::Storage(e) => (e.to_string(), FailureKind::UploadFailed),
                OpFailure::Deadline => (
                    "deadline exceeded before upload completed".to_string(),
                    FailureKind::Timeout,
                ),
            };
            error!("Trial {}: upload via {} failed: {}", trial.index, source.id, reason);
            return TrialResult::failed_upload(trial, reason, cause, Some(upload_latency));
        }
        let upload_done = Instant::now();

        let targets: Vec<&Node> = self.registry.others(&source.id).collect();
        if targets.is_empty() {
            warn!(
                "Trial {}: registry has no node besides {}, nothing to verify (degenerate trial)",
                trial.index, source.id
            );
        }

        let per_target = join_all(
            targets
                .iter()
                .map(|target| self.verify_target(&trial, target, upload_done, deadline)),
        )
        .await;

        let result = TrialResult::from_targets(trial, per_target, upload_latency);
        info!(
            "Trial {}: {} ({} read attempts across {} targets)",
            result.trial.index,
            result.overall_status,
            result.attempts.len(),
            result.targets.len()
        );

        if self.settings.cleanup {
            self.cleanup(source, &result.trial.object_key, deadline).await;
        }
        result
    }

    /// Bounded retry loop for one target. Returns the attempt log and the final state.
    async fn verify_target(
        &self,
        trial: &Trial,
        target: &Node,
        upload_done: Instant,
        deadline: Instant,
    ) -> (NodeId, Vec<ReadAttempt>, TargetOutcome) {
        let retry = &self.settings.retry;
        let mut log = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let outcome = self
                .guarded(deadline, self.storage.download(target, &trial.object_key))
                .await;
            let latency = started.elapsed();
            let since_upload = upload_done.elapsed();

            let record = match outcome {
                Ok(bytes) => {
                    let observed = self.storage.checksum(&bytes);
                    ReadAttempt::observed(trial, &target.id, attempt, observed, latency, since_upload)
                }
                Err(OpFailure::Storage(e)) => {
                    ReadAttempt::failed(trial, &target.id, attempt, e.into(), latency, since_upload)
                }
                Err(OpFailure::Deadline) => {
                    warn!("Trial {}: read {} on {} cancelled by deadline", trial.index, attempt, target.id);
                    log.push(ReadAttempt::failed(
                        trial,
                        &target.id,
                        attempt,
                        AttemptError::Timeout,
                        latency,
                        since_upload,
                    ));
                    return (target.id.clone(), log, TargetOutcome::TimedOut { attempts: attempt });
                }
            };

            if record.matched {
                debug!(
                    "Trial {}: {} converged after {} attempt(s), {}ms",
                    trial.index,
                    target.id,
                    attempt,
                    since_upload.as_millis()
                );
                log.push(record);
                return (
                    target.id.clone(),
                    log,
                    TargetOutcome::Matched { attempts: attempt, convergence: since_upload },
                );
            }

            let kind = FailureKind::of(&record).unwrap_or(FailureKind::Transport);
            match (&record.error, record.observed_checksum) {
                (None, Some(observed)) => warn!(
                    "Trial {}: checksum mismatch on {} (attempt {}): expected {}, got {}",
                    trial.index, target.id, attempt, trial.payload_checksum, observed
                ),
                (Some(e), _) => debug!("Trial {}: read {} on {} failed: {}", trial.index, attempt, target.id, e),
                _ => {}
            }
            log.push(record);

            if !retry.allows_another(attempt) {
                warn!("Trial {}: {} did not converge within {} attempts", trial.index, target.id, attempt);
                return (
                    target.id.clone(),
                    log,
                    TargetOutcome::Exhausted { attempts: attempt, last_failure: kind },
                );
            }

            let delay = retry.delay_after(attempt);
            if Instant::now() + delay >= deadline {
                // the next attempt could not start before the deadline
                log.push(ReadAttempt::failed(
                    trial,
                    &target.id,
                    attempt + 1,
                    AttemptError::Timeout,
                    Duration::ZERO,
                    upload_done.elapsed(),
                ));
                return (target.id.clone(), log, TargetOutcome::TimedOut { attempts: attempt + 1 });
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn cleanup(&self, source: &Node, key: &str, deadline: Instant) {
        if Instant::now() >= deadline {
            warn!("Skipping cleanup of {}: deadline already passed", key);
            return;
        }
        match self.guarded(deadline, self.storage.delete(source, key)).await {
            Ok(()) => debug!("Removed test object {} via {}", key, source.id),
            Err(OpFailure::Storage(e)) => warn!("Failed to remove test object {}: {}", key, e),
            Err(OpFailure::Deadline) => warn!("Cleanup of {} cancelled by deadline", key),
        }
    }
}

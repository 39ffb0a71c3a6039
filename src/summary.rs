//! Run-level aggregation of trial results

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::{FailureKind, ObjectKey, TargetOutcome, TrialResult, TrialStatus};
use crate::registry::NodeId;

/// A (source, target, object) combination that did not converge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailingPair {
    pub trial_id: Uuid,
    pub source: NodeId,
    /// None when the upload itself failed
    pub target: Option<NodeId>,
    pub object_key: ObjectKey,
    pub reason: FailureKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_trials: usize,
    pub consistent: usize,
    pub partially_consistent: usize,
    pub inconsistent: usize,
    pub failed: usize,
    pub degenerate: usize,
    pub total_read_attempts: usize,
    pub checksum_mismatches: usize,
    pub missing_objects: usize,
    pub transport_errors: usize,
    pub timeouts: usize,
    pub convergence_p50_ms: Option<u64>,
    pub convergence_p95_ms: Option<u64>,
    pub convergence_max_ms: Option<u64>,
    pub failing_pairs: Vec<FailingPair>,
    pub all_consistent: bool,
}

/// Nearest-rank percentile over sorted values.
pub fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[idx])
}

impl RunSummary {
    pub fn from_trials(trials: &[TrialResult]) -> Self {
        let mut summary = RunSummary { total_trials: trials.len(), ..Default::default() };
        let mut convergence = Vec::new();

        for result in trials {
            match result.overall_status {
                TrialStatus::Consistent => summary.consistent += 1,
                TrialStatus::PartiallyConsistent => summary.partially_consistent += 1,
                TrialStatus::Inconsistent => summary.inconsistent += 1,
                TrialStatus::Failed => summary.failed += 1,
            }
            if result.degenerate {
                summary.degenerate += 1;
            }

            summary.total_read_attempts += result.attempts.len();
            for attempt in &result.attempts {
                match FailureKind::of(attempt) {
                    Some(FailureKind::ChecksumMismatch) => summary.checksum_mismatches += 1,
                    Some(FailureKind::Missing) => summary.missing_objects += 1,
                    Some(FailureKind::Transport) => summary.transport_errors += 1,
                    Some(FailureKind::Timeout) => summary.timeouts += 1,
                    Some(FailureKind::UploadFailed) | Some(FailureKind::Aborted) | None => {}
                }
            }

            let trial = &result.trial;
            if result.overall_status == TrialStatus::Failed {
                let reason = result.upload_failure.unwrap_or(FailureKind::UploadFailed);
                if reason == FailureKind::Timeout {
                    summary.timeouts += 1;
                }
                summary.failing_pairs.push(FailingPair {
                    trial_id: trial.trial_id,
                    source: trial.source_node.clone(),
                    target: None,
                    object_key: trial.object_key.clone(),
                    reason,
                });
                continue;
            }

            for target in &result.targets {
                let reason = match &target.outcome {
                    TargetOutcome::Matched { convergence: c, .. } => {
                        convergence.push(c.as_millis() as u64);
                        continue;
                    }
                    TargetOutcome::Exhausted { last_failure, .. } => *last_failure,
                    TargetOutcome::TimedOut { .. } => FailureKind::Timeout,
                };
                summary.failing_pairs.push(FailingPair {
                    trial_id: trial.trial_id,
                    source: trial.source_node.clone(),
                    target: Some(target.node.clone()),
                    object_key: trial.object_key.clone(),
                    reason,
                });
            }
        }

        convergence.sort_unstable();
        summary.convergence_p50_ms = percentile(&convergence, 50.0);
        summary.convergence_p95_ms = percentile(&convergence, 95.0);
        summary.convergence_max_ms = convergence.last().copied();
        summary.all_consistent = summary.consistent == summary.total_trials;
        summary
    }
}

/// Everything a run produced, in trial order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Nodes that failed the preflight probe
    pub unreachable_nodes: Vec<NodeId>,
    pub summary: RunSummary,
    pub trials: Vec<TrialResult>,
}

impl RunReport {
    /// 0 when every trial was consistent, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.summary.all_consistent {
            0
        } else {
            1
        }
    }
}

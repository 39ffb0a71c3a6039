//! Trial and read-attempt records
//!
//! Everything the engine observes ends up here as data: failed uploads,
//! transport errors, missing replicas and checksum mismatches alike.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::checksum::Checksum;
use crate::registry::NodeId;

/// Object key type
pub type ObjectKey = String;

/// Fresh 128-bit random object key.
pub fn new_object_key() -> ObjectKey {
    Uuid::new_v4().to_string()
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn serialize_opt_millis<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&(d.as_millis() as u64)),
        None => s.serialize_none(),
    }
}

/// One upload-then-verify-everywhere exercise.
#[derive(Debug, Clone, Serialize)]
pub struct Trial {
    pub trial_id: Uuid,
    /// Position of the trial within its run
    pub index: usize,
    pub source_node: NodeId,
    pub object_key: ObjectKey,
    pub payload_checksum: Checksum,
    pub payload_size: usize,
    pub created_at: DateTime<Utc>,
}

impl Trial {
    /// Record for a trial that never got as far as generating its payload.
    pub fn unstarted(index: usize, source_node: NodeId) -> Self {
        Self {
            trial_id: Uuid::new_v4(),
            index,
            source_node,
            object_key: new_object_key(),
            payload_checksum: Checksum::compute(&[]),
            payload_size: 0,
            created_at: Utc::now(),
        }
    }
}

/// Why a read attempt produced no comparable content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AttemptError {
    /// Connection failure, non-zero exit, command timeout
    Transport(String),
    /// The replica does not have the object (yet)
    NotFound,
    /// Trial or run deadline reached before the attempt completed
    Timeout,
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Transport(msg) => write!(f, "transport error: {}", msg),
            AttemptError::NotFound => f.write_str("object not found"),
            AttemptError::Timeout => f.write_str("deadline exceeded"),
        }
    }
}

/// A single download-and-compare against one target.
#[derive(Debug, Clone, Serialize)]
pub struct ReadAttempt {
    pub trial_id: Uuid,
    pub target_node: NodeId,
    /// 1-indexed
    pub attempt_number: u32,
    pub observed_checksum: Option<Checksum>,
    pub matched: bool,
    #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
    pub latency: Duration,
    /// Time between upload completion and the end of this attempt
    #[serde(rename = "since_upload_ms", serialize_with = "serialize_millis")]
    pub since_upload: Duration,
    pub error: Option<AttemptError>,
}

impl ReadAttempt {
    /// An attempt that downloaded content; `matched` follows from the digests.
    pub fn observed(
        trial: &Trial,
        target: &str,
        attempt_number: u32,
        observed: Checksum,
        latency: Duration,
        since_upload: Duration,
    ) -> Self {
        Self {
            trial_id: trial.trial_id,
            target_node: target.to_string(),
            attempt_number,
            observed_checksum: Some(observed),
            matched: observed == trial.payload_checksum,
            latency,
            since_upload,
            error: None,
        }
    }

    /// An attempt that could not download anything.
    pub fn failed(
        trial: &Trial,
        target: &str,
        attempt_number: u32,
        error: AttemptError,
        latency: Duration,
        since_upload: Duration,
    ) -> Self {
        Self {
            trial_id: trial.trial_id,
            target_node: target.to_string(),
            attempt_number,
            observed_checksum: None,
            matched: false,
            latency,
            since_upload,
            error: Some(error),
        }
    }

    pub fn is_mismatch(&self) -> bool {
        !self.matched && self.error.is_none()
    }
}

/// Failure classification used in summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UploadFailed,
    ChecksumMismatch,
    Missing,
    Transport,
    Timeout,
    /// The trial task died before producing a result
    Aborted,
}

impl FailureKind {
    pub fn of(attempt: &ReadAttempt) -> Option<Self> {
        match (&attempt.error, attempt.matched) {
            (_, true) => None,
            (None, false) => Some(FailureKind::ChecksumMismatch),
            (Some(AttemptError::NotFound), _) => Some(FailureKind::Missing),
            (Some(AttemptError::Transport(_)), _) => Some(FailureKind::Transport),
            (Some(AttemptError::Timeout), _) => Some(FailureKind::Timeout),
        }
    }
}

/// Final state of one target within a trial.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TargetOutcome {
    Matched {
        attempts: u32,
        #[serde(rename = "convergence_ms", serialize_with = "serialize_millis")]
        convergence: Duration,
    },
    Exhausted { attempts: u32, last_failure: FailureKind },
    TimedOut { attempts: u32 },
}

impl TargetOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, TargetOutcome::Matched { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetResult {
    pub node: NodeId,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Consistent,
    PartiallyConsistent,
    Inconsistent,
    Failed,
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrialStatus::Consistent => "consistent",
            TrialStatus::PartiallyConsistent => "partially_consistent",
            TrialStatus::Inconsistent => "inconsistent",
            TrialStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything observed for one trial.
#[derive(Debug, Clone, Serialize)]
pub struct TrialResult {
    pub trial: Trial,
    /// Ordered by target (registry order), then attempt number
    pub attempts: Vec<ReadAttempt>,
    pub targets: Vec<TargetResult>,
    pub overall_status: TrialStatus,
    /// No target nodes: trivially consistent, verifies nothing
    pub degenerate: bool,
    pub upload_error: Option<String>,
    /// Why a `Failed` trial failed: `UploadFailed`, `Timeout` or `Aborted`
    pub upload_failure: Option<FailureKind>,
    #[serde(rename = "upload_latency_ms", serialize_with = "serialize_opt_millis")]
    pub upload_latency: Option<Duration>,
}

impl TrialResult {
    /// Upload never succeeded: no reads were made.
    pub fn failed_upload(
        trial: Trial,
        error: String,
        cause: FailureKind,
        upload_latency: Option<Duration>,
    ) -> Self {
        Self {
            trial,
            attempts: Vec::new(),
            targets: Vec::new(),
            overall_status: TrialStatus::Failed,
            degenerate: false,
            upload_error: Some(error),
            upload_failure: Some(cause),
            upload_latency,
        }
    }

    /// Assemble per-target attempt logs (already in registry order) into a result.
    pub fn from_targets(
        trial: Trial,
        per_target: Vec<(NodeId, Vec<ReadAttempt>, TargetOutcome)>,
        upload_latency: Duration,
    ) -> Self {
        let degenerate = per_target.is_empty();
        let overall_status = Self::compute_status(per_target.iter().map(|(_, _, o)| o));
        let mut attempts = Vec::new();
        let mut targets = Vec::with_capacity(per_target.len());
        for (node, log, outcome) in per_target {
            attempts.extend(log);
            targets.push(TargetResult { node, outcome });
        }
        Self {
            trial,
            attempts,
            targets,
            overall_status,
            degenerate,
            upload_error: None,
            upload_failure: None,
            upload_latency: Some(upload_latency),
        }
    }

    /// Status of a trial whose upload succeeded.
    pub fn compute_status<'a>(outcomes: impl Iterator<Item = &'a TargetOutcome>) -> TrialStatus {
        let (mut total, mut matched) = (0usize, 0usize);
        for outcome in outcomes {
            total += 1;
            if outcome.is_matched() {
                matched += 1;
            }
        }
        if matched == total {
            TrialStatus::Consistent
        } else if matched == 0 {
            TrialStatus::Inconsistent
        } else {
            TrialStatus::PartiallyConsistent
        }
    }

    pub fn attempts_for<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a ReadAttempt> + 'a {
        self.attempts.iter().filter(move |a| a.target_node == node)
    }

    /// Last recorded attempt for a target.
    pub fn final_attempt(&self, node: &str) -> Option<&ReadAttempt> {
        self.attempts.iter().rev().find(|a| a.target_node == node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial() -> Trial {
        Trial {
            trial_id: Uuid::new_v4(),
            index: 0,
            source_node: "a".to_string(),
            object_key: new_object_key(),
            payload_checksum: Checksum::compute(b"payload"),
            payload_size: 7,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_matched_follows_checksum() {
        let t = trial();
        let hit = ReadAttempt::observed(&t, "b", 1, Checksum::compute(b"payload"), Duration::ZERO, Duration::ZERO);
        let miss = ReadAttempt::observed(&t, "b", 2, Checksum::compute(b"other"), Duration::ZERO, Duration::ZERO);
        assert!(hit.matched && hit.error.is_none());
        assert!(!miss.matched && miss.is_mismatch());
        assert_eq!(FailureKind::of(&miss), Some(FailureKind::ChecksumMismatch));
        assert_eq!(FailureKind::of(&hit), None);
    }

    #[test]
    fn test_failed_attempt_never_matched() {
        let t = trial();
        let a = ReadAttempt::failed(&t, "b", 1, AttemptError::NotFound, Duration::ZERO, Duration::ZERO);
        assert!(!a.matched);
        assert!(!a.is_mismatch());
        assert_eq!(FailureKind::of(&a), Some(FailureKind::Missing));
    }

    #[test]
    fn test_compute_status() {
        let hit = TargetOutcome::Matched { attempts: 1, convergence: Duration::ZERO };
        let miss = TargetOutcome::Exhausted { attempts: 5, last_failure: FailureKind::Missing };
        let late = TargetOutcome::TimedOut { attempts: 2 };
        assert_eq!(TrialResult::compute_status([hit.clone(), hit.clone()].iter()), TrialStatus::Consistent);
        assert_eq!(TrialResult::compute_status([hit.clone(), miss.clone()].iter()), TrialStatus::PartiallyConsistent);
        assert_eq!(TrialResult::compute_status([miss, late].iter()), TrialStatus::Inconsistent);
        assert_eq!(TrialResult::compute_status(std::iter::empty()), TrialStatus::Consistent);
    }

    #[test]
    fn test_empty_targets_are_degenerate() {
        let result = TrialResult::from_targets(trial(), Vec::new(), Duration::from_millis(3));
        assert!(result.degenerate);
        assert_eq!(result.overall_status, TrialStatus::Consistent);
        assert!(result.attempts.is_empty());
    }

    #[test]
    fn test_serializes_durations_as_millis() {
        let t = trial();
        let a = ReadAttempt::failed(&t, "b", 1, AttemptError::Timeout, Duration::from_millis(1500), Duration::from_secs(2));
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["latency_ms"], 1500);
        assert_eq!(json["since_upload_ms"], 2000);
        assert_eq!(json["error"]["kind"], "timeout");
    }

    #[test]
    fn test_final_attempt_is_last_for_target() {
        let t = trial();
        let per_target = vec![
            (
                "b".to_string(),
                vec![
                    ReadAttempt::failed(&t, "b", 1, AttemptError::NotFound, Duration::ZERO, Duration::ZERO),
                    ReadAttempt::observed(&t, "b", 2, t.payload_checksum, Duration::ZERO, Duration::from_secs(1)),
                ],
                TargetOutcome::Matched { attempts: 2, convergence: Duration::from_secs(1) },
            ),
            (
                "c".to_string(),
                vec![ReadAttempt::failed(&t, "c", 1, AttemptError::Timeout, Duration::ZERO, Duration::ZERO)],
                TargetOutcome::TimedOut { attempts: 1 },
            ),
        ];
        let result = TrialResult::from_targets(t, per_target, Duration::ZERO);
        let target = String::from("b");
        let last = result.final_attempt(&target).unwrap();
        assert_eq!(last.attempt_number, 2);
        assert!(last.matched);
        assert_eq!(result.final_attempt("c").unwrap().error, Some(AttemptError::Timeout));
        assert!(result.final_attempt("zz").is_none());
    }

    #[test]
    fn test_failed_upload_keeps_cause() {
        let result = TrialResult::failed_upload(
            Trial::unstarted(4, "a".to_string()),
            "deadline exceeded before upload completed".to_string(),
            FailureKind::Timeout,
            None,
        );
        assert_eq!(result.overall_status, TrialStatus::Failed);
        assert_eq!(result.upload_failure, Some(FailureKind::Timeout));
        assert_eq!(result.trial.index, 4);
        assert_eq!(serde_json::to_value(&result).unwrap()["upload_failure"], "timeout");
    }

    #[test]
    fn test_object_keys_are_unique() {
        assert_ne!(new_object_key(), new_object_key());
    }
}

//! Result reporters

use serde::{Deserialize, Serialize};
use std::io::{self, Write};

use crate::model::FailureKind;
use crate::summary::RunReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Json,
    Text,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "text" | "txt" => Ok(ReportFormat::Text),
            _ => Err(format!("Unknown report format: {}", s)),
        }
    }
}

/// Renders a finished run to some sink.
pub trait Reporter {
    fn report(&mut self, report: &RunReport) -> io::Result<()>;
}

/// Full report as pretty-printed JSON.
pub struct JsonReporter<W: Write> {
    out: W,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    fn report(&mut self, report: &RunReport) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut self.out, report)?;
        writeln!(self.out)?;
        self.out.flush()
    }
}

/// Human-readable summary.
pub struct TextReporter<W: Write> {
    out: W,
}

impl<W: Write> TextReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

fn reason_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::UploadFailed => "upload failed",
        FailureKind::ChecksumMismatch => "checksum mismatch",
        FailureKind::Missing => "object missing",
        FailureKind::Transport => "transport error",
        FailureKind::Timeout => "timed out",
        FailureKind::Aborted => "trial aborted",
    }
}

fn millis(value: Option<u64>) -> String {
    value.map(|v| format!("{}ms", v)).unwrap_or_else(|| "-".to_string())
}

impl<W: Write> Reporter for TextReporter<W> {
    fn report(&mut self, report: &RunReport) -> io::Result<()> {
        let s = &report.summary;
        writeln!(
            self.out,
            "Replication check {} -> {}",
            report.started_at.to_rfc3339(),
            report.finished_at.to_rfc3339()
        )?;
        writeln!(
            self.out,
            "trials: {}  consistent: {}  partial: {}  inconsistent: {}  failed: {}",
            s.total_trials, s.consistent, s.partially_consistent, s.inconsistent, s.failed
        )?;
        if s.degenerate > 0 {
            writeln!(self.out, "WARNING: {} trial(s) had no target nodes and verified nothing", s.degenerate)?;
        }
        if !report.unreachable_nodes.is_empty() {
            writeln!(self.out, "unreachable at preflight: {}", report.unreachable_nodes.join(", "))?;
        }
        writeln!(
            self.out,
            "reads: {}  mismatches: {}  missing: {}  transport errors: {}  timeouts: {}",
            s.total_read_attempts, s.checksum_mismatches, s.missing_objects, s.transport_errors, s.timeouts
        )?;
        writeln!(
            self.out,
            "convergence p50: {}  p95: {}  max: {}",
            millis(s.convergence_p50_ms),
            millis(s.convergence_p95_ms),
            millis(s.convergence_max_ms)
        )?;
        for pair in &s.failing_pairs {
            writeln!(
                self.out,
                "  FAIL {} -> {} object {}: {}",
                pair.source,
                pair.target.as_deref().unwrap_or("-"),
                pair.object_key,
                reason_label(pair.reason)
            )?;
        }
        writeln!(self.out, "result: {}", if s.all_consistent { "CONSISTENT" } else { "NOT CONSISTENT" })?;
        self.out.flush()
    }
}

/// Reporter for `format` writing to `out`.
pub fn reporter_for<'a, W: Write + 'a>(format: ReportFormat, out: W) -> Box<dyn Reporter + 'a> {
    match format {
        ReportFormat::Json => Box::new(JsonReporter::new(out)),
        ReportFormat::Text => Box::new(TextReporter::new(out)),
    }
}

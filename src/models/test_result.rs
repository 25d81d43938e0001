//! Test result models
//!
//! Per-detection verdicts, per-participant failure records, lifecycle states
//! and the summary of a whole run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::Detection;

/// Test execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✓",
            TestStatus::Fail => "✗",
            TestStatus::Skip => "○",
            TestStatus::Error => "!",
        }
    }

    /// Whether this status counts against the run
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Fail | TestStatus::Error)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "PASS"),
            TestStatus::Fail => write!(f, "FAIL"),
            TestStatus::Skip => write!(f, "SKIP"),
            TestStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of testing a single detection on one instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detection: String,
    pub path: PathBuf,
    pub instance: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub message: Option<String>,
}

impl DetectionResult {
    fn new(detection: &Detection, instance: &str, status: TestStatus, duration_ms: u64) -> Self {
        Self {
            detection: detection.name.clone(),
            path: detection.path.clone(),
            instance: instance.to_string(),
            status,
            duration_ms,
            message: None,
        }
    }

    pub fn pass(detection: &Detection, instance: &str, duration_ms: u64) -> Self {
        Self::new(detection, instance, TestStatus::Pass, duration_ms)
    }

    pub fn fail(
        detection: &Detection,
        instance: &str,
        duration_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::new(detection, instance, TestStatus::Fail, duration_ms).with_message(message)
    }

    pub fn skip(detection: &Detection, instance: &str, reason: impl Into<String>) -> Self {
        Self::new(detection, instance, TestStatus::Skip, 0).with_message(reason)
    }

    pub fn error(detection: &Detection, instance: &str, error: impl Into<String>) -> Self {
        Self::new(detection, instance, TestStatus::Error, 0).with_message(error)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for DetectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} on {} [{}ms]",
            self.status.symbol(),
            self.detection,
            self.instance,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Lifecycle of a single test instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Uninitialized,
    Configured,
    SetupInProgress,
    Ready,
    Executing,
    Done,
    Failed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Uninitialized => "uninitialized",
            InstanceState::Configured => "configured",
            InstanceState::SetupInProgress => "setting up",
            InstanceState::Ready => "ready",
            InstanceState::Executing => "executing",
            InstanceState::Done => "done",
            InstanceState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of a single view
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewState {
    Uninitialized,
    Active,
    Stopped,
}

/// Run phase a failure was observed in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ViewSetup,
    InstanceSetup,
    InstanceExecute,
    ViewStop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::ViewSetup => "view setup",
            Phase::InstanceSetup => "instance setup",
            Phase::InstanceExecute => "instance execute",
            Phase::ViewStop => "view stop",
        };
        write!(f, "{s}")
    }
}

/// Participant a failure belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Participant {
    Instance(String),
    View(String),
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Participant::Instance(name) => write!(f, "instance {name}"),
            Participant::View(name) => write!(f, "view {name}"),
        }
    }
}

/// A setup/execute/stop call that did not succeed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub participant: Participant,
    pub phase: Phase,
    pub message: String,
}

impl Failure {
    pub fn new(participant: Participant, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            participant,
            phase,
            message: message.into(),
        }
    }

    /// Instance failures count against the run, view failures do not
    pub fn is_instance_failure(&self) -> bool {
        matches!(self.participant, Participant::Instance(_))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed during {}: {}", self.participant, self.phase, self.message)
    }
}

/// How a run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// Every instance went through setup and execute
    Finished,
    /// At least one instance failed setup, execution was skipped
    SetupFailed,
    /// Operator interrupt
    Interrupted,
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Completion::Finished => "finished",
            Completion::SetupFailed => "setup failed",
            Completion::Interrupted => "interrupted",
        };
        write!(f, "{s}")
    }
}

/// Summary of a whole run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub completion: Completion,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Detections still queued when the run ended
    pub untested: usize,
    pub failures: Vec<Failure>,
    pub results: Vec<DetectionResult>,
}

impl RunSummary {
    pub fn new(
        started_at: DateTime<Utc>,
        completion: Completion,
        untested: usize,
        failures: Vec<Failure>,
        results: Vec<DetectionResult>,
    ) -> Self {
        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();
        let (passed, failed, skipped, errors) = (
            count(TestStatus::Pass),
            count(TestStatus::Fail),
            count(TestStatus::Skip),
            count(TestStatus::Error),
        );

        Self {
            started_at,
            completed_at: Utc::now(),
            completion,
            total: results.len(),
            passed,
            failed,
            skipped,
            errors,
            untested,
            failures,
            results,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.completed_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Whether the process should exit with a failure status
    pub fn has_failures(&self) -> bool {
        self.failed > 0
            || self.errors > 0
            || self.failures.iter().any(Failure::is_instance_failure)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Detection test run ({})", self.completion)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        for failure in &self.failures {
            writeln!(f, "  ! {failure}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {} | Untested: {}",
            self.total, self.passed, self.failed, self.skipped, self.errors, self.untested
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.duration_ms()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(name: &str) -> Detection {
        Detection::new(name, format!("detections/{name}.yml"))
    }

    #[test]
    fn test_result_creation() {
        let result = DetectionResult::pass(&detection("a"), "c-0", 100);
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(result.instance, "c-0");
        assert_eq!(result.duration_ms, 100);
    }

    #[test]
    fn test_run_summary_counts() {
        let results = vec![
            DetectionResult::pass(&detection("a"), "c-0", 100),
            DetectionResult::fail(&detection("b"), "c-1", 50, "no events"),
            DetectionResult::skip(&detection("c"), "c-0", "no tests"),
        ];

        let summary = RunSummary::new(Utc::now(), Completion::Finished, 2, Vec::new(), results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.untested, 2);
        assert!(summary.has_failures());
    }

    #[test]
    fn test_view_failures_do_not_fail_run() {
        let failures = vec![Failure::new(
            Participant::View("progress".to_string()),
            Phase::ViewStop,
            "closed",
        )];
        let summary = RunSummary::new(Utc::now(), Completion::Finished, 0, failures, Vec::new());
        assert!(!summary.has_failures());

        let failures = vec![Failure::new(
            Participant::Instance("c-0".to_string()),
            Phase::InstanceSetup,
            "boot failed",
        )];
        let summary =
            RunSummary::new(Utc::now(), Completion::SetupFailed, 0, failures, Vec::new());
        assert!(summary.has_failures());
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::new(
            Participant::Instance("c-1".to_string()),
            Phase::InstanceExecute,
            "lost connection",
        );
        assert_eq!(
            failure.to_string(),
            "instance c-1 failed during instance execute: lost connection"
        );
    }
}

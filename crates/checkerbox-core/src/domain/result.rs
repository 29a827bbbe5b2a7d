//! Step outcome model shared by devices, runners and notification consumers.

use checkerbox_store::Verdict;
use serde::{Deserialize, Serialize};

use crate::domain::error::StepFault;
use crate::event::SequenceEvent;

/// Outcome of one step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Measurement taken but outside its threshold; the only retryable outcome
    Fail,
    /// Measurement taken and within its threshold
    Pass,
    /// Action completed with nothing to compare
    Done,
    /// Functional fault: unknown function, I/O failure, timeout
    Error,
    /// Step dispatched, result pending
    InProgress,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Fail => "Fail",
            Outcome::Pass => "Pass",
            Outcome::Done => "Done",
            Outcome::Error => "Error",
            Outcome::InProgress => "InProgress",
        }
    }

    /// Whether this outcome marks the site's run as failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Fail | Outcome::Error)
    }

    /// Whether the retry loop stops on this outcome. Only `Fail` earns another attempt.
    pub fn ends_attempts(&self) -> bool {
        !matches!(self, Outcome::Fail)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Verdict> for Outcome {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => Outcome::Pass,
            Verdict::Fail => Outcome::Fail,
        }
    }
}

/// Result of one step attempt, addressed to the runner that dispatched it.
///
/// Produced by a device (or synthesized by the runner on timeout). Only the
/// runner writes `retried`, before the result is published or logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub site: usize,
    /// Position of the step in the site's plan
    pub id: usize,
    pub label: String,
    pub outcome: Outcome,
    pub message: String,
    /// Zero-based attempt index this result belongs to
    pub retried: u32,
}

impl StepResult {
    /// Build a result stamped with the step's site, id and label.
    pub fn for_step(step: &SequenceEvent, outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            site: step.site,
            id: step.id,
            label: step.label.clone(),
            outcome,
            message: message.into(),
            retried: 0,
        }
    }

    /// `Error` result carrying the fault's message.
    pub fn from_fault(step: &SequenceEvent, fault: StepFault) -> Self {
        Self::for_step(step, Outcome::Error, fault.to_string())
    }

    /// Placeholder published when an attempt starts.
    pub fn in_progress(step: &SequenceEvent) -> Self {
        Self::for_step(step, Outcome::InProgress, "...")
    }

    /// Line appended to the site report: `{id} {outcome} {label}: {message} ({attempts})`.
    pub fn report_line(&self) -> String {
        format!(
            "{} {} {}: {} ({})",
            self.id,
            self.outcome,
            self.label,
            self.message,
            self.retried + 1
        )
    }
}

impl std::fmt::Display for StepResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "site {} step {} [{}] {}: {}",
            self.site, self.id, self.outcome, self.label, self.message
        )
    }
}

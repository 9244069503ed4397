//! End-of-run summary.

use std::fmt;

use serde::Serialize;

use crate::aggregator::AggregateState;
use crate::completion::TerminationReason;
use crate::types::Timestamp;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Explicit marker or every work item handled.
    Completed,
    /// Ended early by a failure or exhaustion phrase.
    Aborted,
    /// The connection ended before any terminal condition.
    Incomplete,
}

/// Final numbers for a run, handed to the render sink once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub reason: Option<TerminationReason>,
    pub processed_count: u64,
    pub expected_count: u64,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn from_state(state: &AggregateState, now: Timestamp) -> Self {
        let outcome = match state.termination_reason {
            None => RunOutcome::Incomplete,
            Some(reason) if reason.is_abort() => RunOutcome::Aborted,
            Some(_) => RunOutcome::Completed,
        };
        Self {
            outcome,
            reason: state.termination_reason,
            processed_count: state.processed_count,
            expected_count: state.expected_count,
            elapsed_ms: state.elapsed_ms(now),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_ms as f64 / 1000.0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (p, e) = (self.processed_count, self.expected_count);
        match (self.outcome, self.reason) {
            (RunOutcome::Completed, _) => {
                write!(f, "Processing complete. {p} out of {e} URLs processed.")
            }
            (RunOutcome::Aborted, Some(TerminationReason::ExhaustionPhrase)) => write!(
                f,
                "Processing stopped early: all nodes busy. {p} out of {e} URLs processed."
            ),
            (RunOutcome::Aborted, _) => write!(
                f,
                "Processing stopped early after a fetch failure. {p} out of {e} URLs processed."
            ),
            (RunOutcome::Incomplete, _) => write!(
                f,
                "Processing did not finish: connection closed. {p} out of {e} URLs processed."
            ),
        }?;
        write!(f, " Time taken: {:.2}s", self.elapsed_secs())
    }
}

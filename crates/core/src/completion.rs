//! Run completion heuristics.
//!
//! The service has signalled completion in several ways over time, so a
//! run is considered finished as soon as any one of these holds, checked in
//! this order (first true wins):
//!
//! 1. the frame carries `"final": true`,
//! 2. the processed count reached the expected count,
//! 3. the progress message contains a fetch-failure phrase,
//! 4. the progress message contains a resource-exhaustion phrase.
//!
//! The phrase checks are an abort path: the run ends early with fewer
//! items processed, which is reported as a shortened run and never as an
//! error.

use serde::{Deserialize, Serialize};

/// Default phrases that mark an unrecoverable upstream fetch failure.
pub const DEFAULT_FAILURE_PHRASES: &[&str] = &["failed to fetch"];

/// Default phrases that mark exhaustion of the service's worker nodes.
pub const DEFAULT_EXHAUSTION_PHRASES: &[&str] = &["all nodes busy"];

/// Which heuristic ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ExplicitMarker,
    ExpectedCountReached,
    FailurePhrase,
    ExhaustionPhrase,
}

impl TerminationReason {
    /// Whether the run ended before all work items were handled.
    pub fn is_abort(self) -> bool {
        matches!(
            self,
            TerminationReason::FailurePhrase | TerminationReason::ExhaustionPhrase
        )
    }
}

/// Facts about the frame just applied that the heuristics look at.
#[derive(Debug, Clone, Copy)]
pub struct CompletionInput<'a> {
    pub explicit_marker: bool,
    pub processed_count: u64,
    pub expected_count: u64,
    pub progress_message: Option<&'a str>,
}

/// Configurable phrase lists for the text-based heuristics.
///
/// Matching is a case-insensitive substring search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionPolicy {
    failure_phrases: Vec<String>,
    exhaustion_phrases: Vec<String>,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAILURE_PHRASES.iter().map(|s| s.to_string()),
            DEFAULT_EXHAUSTION_PHRASES.iter().map(|s| s.to_string()),
        )
    }
}

impl CompletionPolicy {
    /// Build a policy from explicit phrase lists. Blank phrases are dropped
    /// so they cannot match every message.
    pub fn new(
        failure_phrases: impl IntoIterator<Item = String>,
        exhaustion_phrases: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            failure_phrases: normalize(failure_phrases),
            exhaustion_phrases: normalize(exhaustion_phrases),
        }
    }

    /// Run the heuristics in order and return the first that fires.
    pub fn evaluate(&self, input: &CompletionInput<'_>) -> Option<TerminationReason> {
        if input.explicit_marker {
            return Some(TerminationReason::ExplicitMarker);
        }
        if input.expected_count > 0 && input.processed_count == input.expected_count {
            return Some(TerminationReason::ExpectedCountReached);
        }

        let message = input.progress_message?.to_lowercase();
        if contains_any(&message, &self.failure_phrases) {
            return Some(TerminationReason::FailurePhrase);
        }
        if contains_any(&message, &self.exhaustion_phrases) {
            return Some(TerminationReason::ExhaustionPhrase);
        }
        None
    }
}

fn normalize(phrases: impl IntoIterator<Item = String>) -> Vec<String> {
    phrases
        .into_iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

fn contains_any(haystack: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|phrase| haystack.contains(phrase.as_str()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Aggregate run state and the frame ingestion state machine.
//!
//! [`Aggregator::ingest`] takes one raw inbound frame, classifies it with
//! [`classify`](crate::inbound::classify), folds every concern it carries
//! into [`AggregateState`], runs the completion heuristics, and returns a
//! [`StateDelta`] naming exactly what changed so a render sink can update
//! only those parts.
//!
//! Ingestion never fails. Once the run has terminated every further frame
//! is ignored and only counted as a late frame for diagnostics.

use chrono::Utc;
use serde::Serialize;

use crate::completion::{CompletionInput, CompletionPolicy, TerminationReason};
use crate::inbound::{classify, CacheStats, InboundEvent, ProgressEvent, TraceSnapshot};
use crate::summary::RunSummary;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// AggregateState
// ---------------------------------------------------------------------------

/// One row of the per-item network report: a handled progress frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkReportEntry {
    pub work_item: Option<String>,
    pub responder_address: Option<String>,
    pub proxy_address: Option<String>,
    /// The progress message, shown as the row status.
    pub status: String,
    pub received_at: Timestamp,
}

/// Everything known about the current run.
///
/// Created fresh for every submission and mutated only by [`Aggregator`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateState {
    /// Progress and malformed frames handled so far.
    pub processed_count: u64,
    /// Number of submitted work items.
    pub expected_count: u64,
    pub last_cache_stats: Option<CacheStats>,
    pub last_node_statuses: Option<Vec<String>>,
    pub last_trace: Option<TraceSnapshot>,
    /// Reset time, refreshed when the connection opens.
    pub started_at: Timestamp,
    /// Flips to `true` exactly once.
    pub terminated: bool,
    pub termination_reason: Option<TerminationReason>,
    pub network_report: Vec<NetworkReportEntry>,
}

impl AggregateState {
    /// Empty state for a run of `expected_count` work items.
    pub fn new(expected_count: u64, started_at: Timestamp) -> Self {
        Self {
            processed_count: 0,
            expected_count,
            last_cache_stats: None,
            last_node_statuses: None,
            last_trace: None,
            started_at,
            terminated: false,
            termination_reason: None,
            network_report: Vec::new(),
        }
    }

    /// Milliseconds since `started_at`, clamped at zero.
    pub fn elapsed_ms(&self, now: Timestamp) -> u64 {
        (now - self.started_at).num_milliseconds().max(0) as u64
    }
}

// ---------------------------------------------------------------------------
// StateDelta
// ---------------------------------------------------------------------------

/// A facet of [`AggregateState`] that a delta can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Trace,
    Cache,
    Nodes,
    Progress,
    Terminal,
}

/// A handled progress frame together with the counters after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    #[serde(flatten)]
    pub event: ProgressEvent,
    pub processed_count: u64,
    pub expected_count: u64,
}

/// The facets changed by one ingested frame, with their new values.
///
/// A snapshot identical to the previous one is not a change and is left
/// out. An empty delta means the frame changed nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminationReason>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.facets().is_empty()
    }

    /// Changed facets in application order.
    pub fn facets(&self) -> Vec<Facet> {
        let mut facets = Vec::new();
        if self.trace.is_some() {
            facets.push(Facet::Trace);
        }
        if self.cache.is_some() {
            facets.push(Facet::Cache);
        }
        if self.nodes.is_some() {
            facets.push(Facet::Nodes);
        }
        if self.progress.is_some() {
            facets.push(Facet::Progress);
        }
        if self.terminal.is_some() {
            facets.push(Facet::Terminal);
        }
        facets
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Folds inbound frames into [`AggregateState`].
#[derive(Debug)]
pub struct Aggregator {
    state: AggregateState,
    policy: CompletionPolicy,
    /// Frames ingested after termination. Not part of the run state.
    late_frames: u64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(CompletionPolicy::default())
    }
}

impl Aggregator {
    /// Create an aggregator with no run in progress (`expected_count = 0`).
    pub fn new(policy: CompletionPolicy) -> Self {
        Self {
            state: AggregateState::new(0, Utc::now()),
            policy,
            late_frames: 0,
        }
    }

    /// Discard all state and start a run of `expected_count` items.
    pub fn reset(&mut self, expected_count: u64) {
        self.state = AggregateState::new(expected_count, Utc::now());
        self.late_frames = 0;
    }

    /// Record the moment the connection for this run opened.
    pub fn mark_started(&mut self, at: Timestamp) {
        self.state.started_at = at;
    }

    pub fn state(&self) -> &AggregateState {
        &self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state.terminated
    }

    /// Frames that arrived after the run terminated.
    pub fn late_frames(&self) -> u64 {
        self.late_frames
    }

    /// Summary of the run as of `now`.
    pub fn summary(&self, now: Timestamp) -> RunSummary {
        RunSummary::from_state(&self.state, now)
    }

    /// Ingest one raw inbound frame.
    pub fn ingest(&mut self, raw: &str) -> StateDelta {
        if self.state.terminated {
            self.late_frames += 1;
            tracing::trace!(late_frames = self.late_frames, "Ignoring frame after termination");
            return StateDelta::default();
        }

        self.apply(classify(raw))
    }

    /// Apply already-classified events, expected in application order.
    fn apply(&mut self, events: Vec<InboundEvent>) -> StateDelta {
        let mut delta = StateDelta::default();
        let mut explicit_marker = false;

        for event in events {
            match event {
                InboundEvent::Trace(trace) => {
                    if self.state.last_trace.as_ref() != Some(&trace) {
                        self.state.last_trace = Some(trace.clone());
                        delta.trace = Some(trace);
                    }
                }
                InboundEvent::CacheStats(stats) => {
                    if self.state.last_cache_stats != Some(stats) {
                        self.state.last_cache_stats = Some(stats);
                        delta.cache = Some(stats);
                    }
                }
                InboundEvent::NodeStatus { statuses } => {
                    if self.state.last_node_statuses.as_ref() != Some(&statuses) {
                        self.state.last_node_statuses = Some(statuses.clone());
                        delta.nodes = Some(statuses);
                    }
                }
                InboundEvent::Progress(progress) => {
                    delta.progress = Some(self.record_progress(progress));
                }
                InboundEvent::Malformed { raw } => {
                    tracing::debug!(raw = %raw, "Treating unstructured frame as progress");
                    delta.progress = Some(self.record_progress(ProgressEvent::message(raw)));
                }
                InboundEvent::Terminal => explicit_marker = true,
            }
        }

        let input = CompletionInput {
            explicit_marker,
            processed_count: self.state.processed_count,
            expected_count: self.state.expected_count,
            progress_message: delta.progress.as_ref().map(|p| p.event.message.as_str()),
        };
        if let Some(reason) = self.policy.evaluate(&input) {
            self.state.terminated = true;
            self.state.termination_reason = Some(reason);
            delta.terminal = Some(reason);
            tracing::info!(
                ?reason,
                processed = self.state.processed_count,
                expected = self.state.expected_count,
                "Run terminated",
            );
        }

        delta
    }

    fn record_progress(&mut self, event: ProgressEvent) -> ProgressUpdate {
        self.state.processed_count += 1;
        self.state.network_report.push(NetworkReportEntry {
            work_item: event.work_item.clone(),
            responder_address: event.responder_address.clone(),
            proxy_address: event.proxy_address.clone(),
            status: event.message.clone(),
            received_at: Utc::now(),
        });
        tracing::debug!(
            processed = self.state.processed_count,
            expected = self.state.expected_count,
            "Progress frame received",
        );

        ProgressUpdate {
            event,
            processed_count: self.state.processed_count,
            expected_count: self.state.expected_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Events broadcast by the session controller to render sinks.
//!
//! Every event names the [`ConnectionId`] it belongs to so a sink can
//! ignore anything from a run it no longer displays.

use cachewatch_core::aggregator::StateDelta;
use cachewatch_core::summary::RunSummary;
use serde::Serialize;

use crate::session::ConnectionId;

/// A render-relevant change in a monitoring session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// The connection opened and the submission frame is being sent.
    Connected { connection_id: ConnectionId },

    /// The connection could not be opened. The run finishes incomplete.
    ConnectFailed {
        connection_id: ConnectionId,
        error: String,
    },

    /// One inbound frame changed the aggregate state.
    StateChanged {
        connection_id: ConnectionId,
        delta: StateDelta,
        /// Time since the run started, for the "time taken" display.
        elapsed_ms: u64,
    },

    /// No frame arrived within the idle timeout (`stalled: true`), or
    /// frames resumed after a stall (`stalled: false`).
    Stalled {
        connection_id: ConnectionId,
        stalled: bool,
        idle_ms: u64,
    },

    /// Non-fatal transport error. The connection may continue or close.
    TransportError {
        connection_id: ConnectionId,
        error: String,
    },

    /// The run reached its end: terminal condition or early close.
    /// Sent at most once per connection.
    RunFinished {
        connection_id: ConnectionId,
        summary: RunSummary,
    },

    /// The connection is gone; no more frames will be delivered.
    Disconnected { connection_id: ConnectionId },
}

impl MonitorEvent {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            MonitorEvent::Connected { connection_id }
            | MonitorEvent::ConnectFailed { connection_id, .. }
            | MonitorEvent::StateChanged { connection_id, .. }
            | MonitorEvent::Stalled { connection_id, .. }
            | MonitorEvent::TransportError { connection_id, .. }
            | MonitorEvent::RunFinished { connection_id, .. }
            | MonitorEvent::Disconnected { connection_id } => *connection_id,
        }
    }
}

//! Session lifecycle: one active monitoring connection per controller.
//!
//! [`SessionController::submit`] supersedes whatever run is in flight: it
//! cancels the previous connection task, resets the aggregate state, and
//! spawns a task that connects, sends the submission frame, and feeds
//! inbound frames to the [`Aggregator`]. Render sinks receive the results
//! through [`SessionController::subscribe`].
//!
//! The bookkeeping that decides which frames count lives in
//! [`SessionState`], a plain synchronous struct. Every connection is tagged
//! with a fresh [`ConnectionId`] and frames from any id other than the
//! current one are dropped, so a superseded connection can never write into
//! the new run's state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cachewatch_core::aggregator::{AggregateState, Aggregator, StateDelta};
use cachewatch_core::completion::CompletionPolicy;
use cachewatch_core::error::CoreError;
use cachewatch_core::submission::SubmitRequest;
use cachewatch_core::summary::RunSummary;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::{ClientError, MonitorClient};
use crate::config::MonitorConfig;
use crate::events::MonitorEvent;
use crate::processor::{process_frames, StreamEnd};

/// Broadcast channel capacity for monitor events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long a superseded connection may spend sending its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// How long [`SessionController::shutdown`] waits for the connection task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// ConnectionId
// ---------------------------------------------------------------------------

/// Identity of one monitoring connection (one submission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Result of routing one frame from the current connection.
#[derive(Debug, Clone)]
pub struct RoutedFrame {
    pub delta: StateDelta,
    pub elapsed_ms: u64,
    /// Set on the frame that terminated the run.
    pub summary: Option<RunSummary>,
}

/// Current connection handle plus the run's aggregator.
#[derive(Debug)]
pub struct SessionState {
    current: Option<ConnectionId>,
    aggregator: Aggregator,
    /// Whether the current run's [`RunSummary`] was already produced.
    finished: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(CompletionPolicy::default())
    }
}

impl SessionState {
    pub fn new(policy: CompletionPolicy) -> Self {
        Self {
            current: None,
            aggregator: Aggregator::new(policy),
            finished: false,
        }
    }

    /// Start a new run, superseding any current connection.
    pub fn begin(&mut self, expected_count: u64) -> ConnectionId {
        let id = ConnectionId::new();
        if let Some(previous) = self.current.replace(id) {
            tracing::debug!(previous = %previous, next = %id, "Superseding connection");
        }
        self.aggregator.reset(expected_count);
        self.finished = false;
        id
    }

    pub fn current(&self) -> Option<ConnectionId> {
        self.current
    }

    pub fn is_current(&self, id: ConnectionId) -> bool {
        self.current == Some(id)
    }

    /// Record that `id` finished its handshake. Returns `false` if `id` was
    /// superseded meanwhile and should be dropped.
    pub fn opened(&mut self, id: ConnectionId) -> bool {
        if !self.is_current(id) {
            return false;
        }
        self.aggregator.mark_started(Utc::now());
        true
    }

    /// Feed one raw frame from connection `id` to the aggregator.
    ///
    /// Returns `None` (and changes nothing) when `id` is not the current
    /// connection.
    pub fn route_frame(&mut self, id: ConnectionId, raw: &str) -> Option<RoutedFrame> {
        if !self.is_current(id) {
            tracing::trace!(connection_id = %id, "Discarding frame from superseded connection");
            return None;
        }

        let delta = self.aggregator.ingest(raw);
        let now = Utc::now();
        let summary = if delta.terminal.is_some() && !self.finished {
            self.finished = true;
            Some(self.aggregator.summary(now))
        } else {
            None
        };

        Some(RoutedFrame {
            delta,
            elapsed_ms: self.aggregator.state().elapsed_ms(now),
            summary,
        })
    }

    /// Connection `id` is gone. Releases the handle and, if the run never
    /// produced a summary, returns one (incomplete unless it terminated).
    pub fn finish(&mut self, id: ConnectionId) -> Option<RunSummary> {
        if !self.is_current(id) {
            return None;
        }
        self.current = None;
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.aggregator.summary(Utc::now()))
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn state(&self) -> &AggregateState {
        self.aggregator.state()
    }
}

/// Lock the shared state, recovering from a poisoned lock. The state is
/// always left consistent between statements, so a panic elsewhere does not
/// invalidate it.
pub(crate) fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Handle to the spawned task serving the current connection.
struct ActiveConnection {
    id: ConnectionId,
    cancel: CancellationToken,
    task_handle: tokio::task::JoinHandle<()>,
}

/// Owns the single active monitoring connection and its aggregate state.
///
/// Must be used from within a tokio runtime.
pub struct SessionController {
    client: MonitorClient,
    idle_timeout: Option<Duration>,
    state: Arc<Mutex<SessionState>>,
    event_tx: broadcast::Sender<MonitorEvent>,
    active: Option<ActiveConnection>,
}

impl SessionController {
    pub fn new(config: &MonitorConfig) -> Self {
        Self::with_policy(config, CompletionPolicy::default())
    }

    /// Create a controller with custom completion phrase lists.
    pub fn with_policy(config: &MonitorConfig, policy: CompletionPolicy) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client: MonitorClient::new(config.ws_url.clone(), config.connect_timeout),
            idle_timeout: config.idle_timeout,
            state: Arc::new(Mutex::new(SessionState::new(policy))),
            event_tx,
            active: None,
        }
    }

    /// Subscribe to monitor events for all future runs.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_tx.subscribe()
    }

    /// Start a new run, superseding any run in flight.
    ///
    /// Validation happens before anything else, so an invalid request
    /// leaves the current run untouched. The old connection is cancelled
    /// without waiting for its close to finish; the state is reset before
    /// this returns, so no frame of the new connection can observe the old
    /// run's counters.
    pub fn submit(&mut self, request: SubmitRequest) -> Result<ConnectionId, SessionError> {
        request.ensure_valid()?;
        let frame = request.to_frame()?;

        // The superseded task is detached; it exits once it observes the
        // cancellation.
        self.take_active();
        let id = lock_state(&self.state).begin(request.expected_count());

        tracing::info!(
            connection_id = %id,
            work_items = request.work_items().len(),
            cache_strategy = %request.cache_strategy(),
            load_balancer = %request.load_balancer(),
            num_nodes = request.num_nodes(),
            cache_size = request.cache_size(),
            "Submitting run",
        );

        let cancel = CancellationToken::new();
        let task = ConnectionTask {
            id,
            client: self.client.clone(),
            frame,
            idle_timeout: self.idle_timeout,
            state: Arc::clone(&self.state),
            event_tx: self.event_tx.clone(),
            cancel: cancel.clone(),
        };
        let task_handle = tokio::spawn(run_connection(task));

        self.active = Some(ActiveConnection {
            id,
            cancel,
            task_handle,
        });
        Ok(id)
    }

    /// Close the current connection without starting a new run.
    ///
    /// Idempotent. A run that had not terminated is reported as incomplete.
    pub fn close(&mut self) {
        if let Some(active) = self.take_active() {
            self.report_closed(active.id);
        }
    }

    /// Close the current connection and wait for its task to exit.
    ///
    /// Waits up to 5 seconds for the task to send its close frame.
    pub async fn shutdown(&mut self) {
        let Some(active) = self.take_active() else {
            return;
        };
        self.report_closed(active.id);
        let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, active.task_handle).await;
        tracing::info!(connection_id = %active.id, "Session controller shut down");
    }

    /// Copy of the current aggregate state.
    pub fn snapshot(&self) -> AggregateState {
        lock_state(&self.state).state().clone()
    }

    /// Frames received after the current run terminated.
    pub fn late_frames(&self) -> u64 {
        lock_state(&self.state).aggregator().late_frames()
    }

    /// The connection whose frames currently count, if any.
    pub fn current_connection(&self) -> Option<ConnectionId> {
        lock_state(&self.state).current()
    }

    /// Cancel the active task, if any. The task sends a best-effort close
    /// frame on its own; nothing here waits for it.
    fn take_active(&mut self) -> Option<ActiveConnection> {
        let active = self.active.take()?;
        tracing::debug!(connection_id = %active.id, "Closing connection");
        active.cancel.cancel();
        Some(active)
    }

    fn report_closed(&self, id: ConnectionId) {
        if let Some(summary) = lock_state(&self.state).finish(id) {
            let _ = self.event_tx.send(MonitorEvent::RunFinished {
                connection_id: id,
                summary,
            });
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

/// Everything one connection task needs, moved into the task.
struct ConnectionTask {
    id: ConnectionId,
    client: MonitorClient,
    frame: String,
    idle_timeout: Option<Duration>,
    state: Arc<Mutex<SessionState>>,
    event_tx: broadcast::Sender<MonitorEvent>,
    cancel: CancellationToken,
}

impl ConnectionTask {
    fn emit(&self, event: MonitorEvent) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.event_tx.send(event);
    }

    /// Release the handle and report the run's end if not yet reported.
    fn finish(&self) {
        if let Some(summary) = lock_state(&self.state).finish(self.id) {
            tracing::info!(connection_id = %self.id, outcome = ?summary.outcome, "Run finished");
            self.emit(MonitorEvent::RunFinished {
                connection_id: self.id,
                summary,
            });
        }
    }
}

/// Connect, send the submission, then process frames until the stream
/// ends or the connection is superseded.
async fn run_connection(task: ConnectionTask) {
    let id = task.id;

    let connected = tokio::select! {
        _ = task.cancel.cancelled() => {
            tracing::debug!(connection_id = %id, "Cancelled before connecting");
            return;
        }
        result = task.client.connect() => result,
    };

    let ws_stream = match connected {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            tracing::warn!(connection_id = %id, error = %e, "Failed to open monitor connection");
            task.emit(MonitorEvent::ConnectFailed {
                connection_id: id,
                error: e.to_string(),
            });
            task.finish();
            return;
        }
    };

    let (mut sink, mut stream) = ws_stream.split();

    if !lock_state(&task.state).opened(id) {
        tracing::debug!(connection_id = %id, "Connection superseded during handshake");
        let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
        return;
    }
    task.emit(MonitorEvent::Connected { connection_id: id });

    if let Err(e) = sink.send(Message::Text(task.frame.clone())).await {
        let e = ClientError::Protocol(format!("Failed to send submission: {e}"));
        tracing::warn!(connection_id = %id, error = %e, "Submission not sent");
        task.emit(MonitorEvent::TransportError {
            connection_id: id,
            error: e.to_string(),
        });
        task.finish();
        task.emit(MonitorEvent::Disconnected { connection_id: id });
        return;
    }
    tracing::debug!(connection_id = %id, "Submission frame sent");

    let end = process_frames(
        &mut stream,
        id,
        &task.state,
        &task.event_tx,
        &task.cancel,
        task.idle_timeout,
    )
    .await;

    match end {
        StreamEnd::Cancelled => {
            // Best effort: send Close and move on without awaiting the ack.
            let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
            tracing::debug!(connection_id = %id, "Superseded connection closed");
        }
        StreamEnd::Closed => {
            task.finish();
            task.emit(MonitorEvent::Disconnected { connection_id: id });
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by [`SessionController::submit`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The request failed validation; nothing was changed.
    #[error("Invalid submission: {0}")]
    InvalidRequest(#[from] CoreError),

    /// The request could not be encoded as a JSON frame.
    #[error("Failed to serialize submission: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Inbound frame processing loop.
//!
//! Reads frames from one monitoring connection strictly in arrival order,
//! routes each through [`SessionState`] and broadcasts the resulting
//! [`MonitorEvent`]s.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::events::MonitorEvent;
use crate::session::{lock_state, ConnectionId, SessionState};

/// Why [`process_frames`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The connection was superseded or closed by the caller.
    Cancelled,
    /// The peer closed the connection, the stream ended, or a fatal
    /// transport error occurred.
    Closed,
}

/// Outcome of waiting for the next frame.
enum Next {
    Frame(Option<Result<Message, WsError>>),
    Idle,
}

/// Process frames until the stream ends or `cancel` fires.
///
/// Text frames go to the aggregator as-is; binary frames are decoded as
/// lossy UTF-8 first. When `idle_timeout` is set, a silence longer than it
/// broadcasts a single `Stalled { stalled: true }`, and the next frame
/// broadcasts `stalled: false`. Stalls never touch the aggregate state.
pub async fn process_frames<S>(
    stream: &mut S,
    id: ConnectionId,
    state: &Mutex<SessionState>,
    event_tx: &broadcast::Sender<MonitorEvent>,
    cancel: &CancellationToken,
    idle_timeout: Option<Duration>,
) -> StreamEnd
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let emit = |event: MonitorEvent| {
        let _ = event_tx.send(event);
    };
    let mut last_frame_at = Instant::now();
    let mut stalled = false;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            next = next_frame(stream, idle_timeout) => next,
        };

        let frame = match next {
            Next::Idle => {
                if !stalled && !run_terminated(state) {
                    stalled = true;
                    let idle_ms = last_frame_at.elapsed().as_millis() as u64;
                    tracing::warn!(connection_id = %id, idle_ms, "No frames within idle timeout");
                    emit(MonitorEvent::Stalled {
                        connection_id: id,
                        stalled: true,
                        idle_ms,
                    });
                }
                continue;
            }
            Next::Frame(frame) => frame,
        };

        if stalled {
            stalled = false;
            emit(MonitorEvent::Stalled {
                connection_id: id,
                stalled: false,
                idle_ms: last_frame_at.elapsed().as_millis() as u64,
            });
        }
        last_frame_at = Instant::now();

        match frame {
            Some(Ok(Message::Text(text))) => {
                handle_frame(&text, id, state, event_tx);
            }
            Some(Ok(Message::Binary(bytes))) => {
                handle_frame(&String::from_utf8_lossy(&bytes), id, state, event_tx);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(connection_id = %id, ?frame, "Monitor connection closed by peer");
                return StreamEnd::Closed;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::warn!(connection_id = %id, error = %e, "WebSocket receive error");
                emit(MonitorEvent::TransportError {
                    connection_id: id,
                    error: e.to_string(),
                });
                if !is_recoverable(&e) {
                    return StreamEnd::Closed;
                }
            }
            None => {
                tracing::info!(connection_id = %id, "Monitor stream exhausted");
                return StreamEnd::Closed;
            }
        }
    }
}

async fn next_frame<S>(stream: &mut S, idle_timeout: Option<Duration>) -> Next
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
            Ok(frame) => Next::Frame(frame),
            Err(_) => Next::Idle,
        },
        None => Next::Frame(stream.next().await),
    }
}

/// A finished run cannot stall, so silence after it is not reported.
fn run_terminated(state: &Mutex<SessionState>) -> bool {
    lock_state(state).state().terminated
}

/// Errors after which the stream can still deliver frames.
fn is_recoverable(e: &WsError) -> bool {
    matches!(e, WsError::Utf8 | WsError::Capacity(_))
}

/// Route one payload and broadcast what it changed.
fn handle_frame(
    raw: &str,
    id: ConnectionId,
    state: &Mutex<SessionState>,
    event_tx: &broadcast::Sender<MonitorEvent>,
) {
    let Some(routed) = lock_state(state).route_frame(id, raw) else {
        return;
    };

    if !routed.delta.is_empty() {
        let _ = event_tx.send(MonitorEvent::StateChanged {
            connection_id: id,
            delta: routed.delta,
            elapsed_ms: routed.elapsed_ms,
        });
    }
    if let Some(summary) = routed.summary {
        tracing::info!(connection_id = %id, outcome = ?summary.outcome, "Run finished");
        let _ = event_tx.send(MonitorEvent::RunFinished {
            connection_id: id,
            summary,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Integration tests for [`SessionController`] against a local WebSocket
//! server.
//!
//! Each test binds a `tokio-tungstenite` server on `127.0.0.1:0`, scripts
//! the frames it sends back, and observes the controller through its
//! broadcast events and state snapshots.

use std::time::Duration;

use assert_matches::assert_matches;
use cachewatch_client::config::MonitorConfig;
use cachewatch_client::events::MonitorEvent;
use cachewatch_client::session::{ConnectionId, SessionController, SessionError};
use cachewatch_core::completion::TerminationReason;
use cachewatch_core::submission::{CacheStrategy, LoadBalancerPolicy, SubmitRequest};
use cachewatch_core::summary::RunOutcome;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const EVENT_WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

fn config(ws_url: &str) -> MonitorConfig {
    MonitorConfig {
        ws_url: ws_url.to_string(),
        idle_timeout: None,
        ..Default::default()
    }
}

fn request(urls: &[&str]) -> SubmitRequest {
    SubmitRequest::new(urls.iter().map(|s| s.to_string()).collect())
}

/// Accept one client and read its submission frame.
async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, serde_json::Value) {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    let submission = match ws.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected submission frame, got {other:?}"),
    };
    (ws, submission)
}

async fn send_all(ws: &mut WebSocketStream<TcpStream>, frames: &[&str]) {
    for frame in frames {
        ws.send(Message::Text(frame.to_string())).await.unwrap();
    }
}

/// Wait for the first event matching `pred`, panicking after a timeout.
async fn wait_for(
    rx: &mut broadcast::Receiver<MonitorEvent>,
    pred: impl Fn(&MonitorEvent) -> bool,
) -> MonitorEvent {
    tokio::time::timeout(EVENT_WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn is_finished(id: ConnectionId) -> impl Fn(&MonitorEvent) -> bool {
    move |e| matches!(e, MonitorEvent::RunFinished { connection_id, .. } if *connection_id == id)
}

// ---------------------------------------------------------------------------
// Test: the submission is the first frame and uses the wire names
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submission_frame_is_sent_on_open() {
    let (listener, url) = bind().await;
    let mut controller = SessionController::new(&config(&url));
    let mut rx = controller.subscribe();

    let server = tokio::spawn(async move {
        let (mut ws, submission) = accept(&listener).await;
        send_all(&mut ws, &[r#"{"data":"Cache miss for http://a","final":true}"#]).await;
        submission
    });

    let id = controller
        .submit(
            request(&["http://a", "http://b"])
                .with_cache_strategy(CacheStrategy::Lfu)
                .with_load_balancer(LoadBalancerPolicy::LeastConnections)
                .with_num_nodes(4)
                .with_cache_size(16),
        )
        .unwrap();

    let submission = server.await.unwrap();
    assert_eq!(submission["urls"], serde_json::json!(["http://a", "http://b"]));
    assert_eq!(submission["cacheStrategy"], "LFU");
    assert_eq!(submission["loadBalancer"], "least-connections");
    assert_eq!(submission["numNodes"], 4);
    assert_eq!(submission["cacheSize"], 16);

    let finished = wait_for(&mut rx, is_finished(id)).await;
    assert_matches!(finished, MonitorEvent::RunFinished { summary, .. } => {
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.reason, Some(TerminationReason::ExplicitMarker));
        assert_eq!(summary.processed_count, 1);
        assert_eq!(summary.expected_count, 2);
    });
}

// ---------------------------------------------------------------------------
// Test: deltas are broadcast in arrival order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deltas_are_broadcast_and_count_completes_run() {
    let (listener, url) = bind().await;
    let mut controller = SessionController::new(&config(&url));
    let mut rx = controller.subscribe();

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        send_all(
            &mut ws,
            &[
                r#"{"data":"Cache miss for http://a","cacheStats":{"hits":0,"misses":1}}"#,
                "Cache hit for http://a",
            ],
        )
        .await;
        // Keep the connection open until the client goes away.
        while ws.next().await.is_some() {}
    });

    let id = controller.submit(request(&["http://a", "http://a"])).unwrap();

    let connected = wait_for(&mut rx, |e| matches!(e, MonitorEvent::Connected { .. })).await;
    assert_eq!(connected.connection_id(), id);

    let first = wait_for(&mut rx, |e| matches!(e, MonitorEvent::StateChanged { .. })).await;
    assert_matches!(first, MonitorEvent::StateChanged { delta, .. } => {
        assert!(delta.cache.is_some());
        assert_eq!(delta.progress.unwrap().processed_count, 1);
    });

    let second = wait_for(&mut rx, |e| matches!(e, MonitorEvent::StateChanged { .. })).await;
    assert_matches!(second, MonitorEvent::StateChanged { delta, .. } => {
        assert_eq!(delta.terminal, Some(TerminationReason::ExpectedCountReached));
    });

    wait_for(&mut rx, is_finished(id)).await;
    let snapshot = controller.snapshot();
    assert!(snapshot.terminated);
    assert_eq!(snapshot.processed_count, 2);

    controller.shutdown().await;
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: a close before any terminal condition leaves the run incomplete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn early_close_finishes_incomplete() {
    let (listener, url) = bind().await;
    let mut controller = SessionController::new(&config(&url));
    let mut rx = controller.subscribe();

    tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        send_all(&mut ws, &[r#"{"data":"Cache miss for http://a"}"#]).await;
        let _ = ws.close(None).await;
    });

    let id = controller.submit(request(&["http://a", "http://b", "http://c"])).unwrap();

    let finished = wait_for(&mut rx, is_finished(id)).await;
    assert_matches!(finished, MonitorEvent::RunFinished { summary, .. } => {
        assert_eq!(summary.outcome, RunOutcome::Incomplete);
        assert_eq!(summary.processed_count, 1);
    });
    wait_for(&mut rx, |e| matches!(e, MonitorEvent::Disconnected { .. })).await;

    let snapshot = controller.snapshot();
    assert!(!snapshot.terminated);
    assert_eq!(controller.current_connection(), None);
}

// ---------------------------------------------------------------------------
// Test: a second submission resets state and drops the first connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resubmit_on_same_controller_resets_before_first_frame() {
    let (listener, url) = bind().await;
    let mut controller = SessionController::new(&config(&url));
    let mut rx = controller.subscribe();

    let server = tokio::spawn(async move {
        let (mut first, _) = accept(&listener).await;
        send_all(&mut first, &[r#"{"data":"first run item"}"#]).await;

        let (mut second, submission) = accept(&listener).await;
        // The first connection is still open on our side; anything sent on
        // it now belongs to a superseded run.
        let _ = first.send(Message::Text(r#"{"data":"stale","final":true}"#.into())).await;
        send_all(&mut second, &[r#"{"data":"second run item"}"#]).await;
        while second.next().await.is_some() {}
        submission
    });

    let first_id = controller.submit(request(&["http://a", "http://b"])).unwrap();
    wait_for(&mut rx, |e| {
        matches!(e, MonitorEvent::StateChanged { connection_id, .. } if *connection_id == first_id)
    })
    .await;

    let second_id = controller.submit(request(&["http://c", "http://d"])).unwrap();
    let reset = controller.snapshot();
    assert_eq!(reset.processed_count, 0);
    assert!(!reset.terminated);
    assert_eq!(controller.current_connection(), Some(second_id));

    let changed = wait_for(&mut rx, |e| matches!(e, MonitorEvent::StateChanged { .. })).await;
    assert_eq!(changed.connection_id(), second_id);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.processed_count, 1);
    assert!(!snapshot.terminated, "stale final marker must not terminate the new run");

    controller.shutdown().await;
    let submission = server.await.unwrap();
    assert_eq!(submission["urls"], serde_json::json!(["http://c", "http://d"]));
}

// ---------------------------------------------------------------------------
// Test: connection failures and invalid requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_failure_is_reported_and_run_incomplete() {
    let (listener, url) = bind().await;
    drop(listener);

    let mut controller = SessionController::new(&config(&url));
    let mut rx = controller.subscribe();
    let id = controller.submit(request(&["http://a"])).unwrap();

    let failed = wait_for(&mut rx, |e| matches!(e, MonitorEvent::ConnectFailed { .. })).await;
    assert_eq!(failed.connection_id(), id);

    let finished = wait_for(&mut rx, is_finished(id)).await;
    assert_matches!(finished, MonitorEvent::RunFinished { summary, .. } => {
        assert_eq!(summary.outcome, RunOutcome::Incomplete);
    });

    // The controller is reusable after a failure.
    assert!(controller.submit(request(&["http://b"])).is_ok());
    controller.shutdown().await;
}

#[tokio::test]
async fn invalid_request_is_rejected_before_connecting() {
    let mut controller = SessionController::new(&config("ws://127.0.0.1:9"));

    let result = controller.submit(SubmitRequest::new(Vec::new()));
    assert_matches!(result, Err(SessionError::InvalidRequest(_)));
    assert_eq!(controller.current_connection(), None);

    let result = controller.submit(request(&["http://a"]).with_num_nodes(0));
    assert_matches!(result, Err(SessionError::InvalidRequest(_)));
}

#[tokio::test]
async fn close_reports_unfinished_run_once() {
    let (listener, url) = bind().await;
    let mut controller = SessionController::new(&config(&url));
    let mut rx = controller.subscribe();

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        while ws.next().await.is_some() {}
    });

    let id = controller.submit(request(&["http://a"])).unwrap();
    wait_for(&mut rx, |e| matches!(e, MonitorEvent::Connected { .. })).await;

    controller.close();
    controller.close();

    let finished = wait_for(&mut rx, is_finished(id)).await;
    assert_matches!(finished, MonitorEvent::RunFinished { summary, .. } => {
        assert_eq!(summary.outcome, RunOutcome::Incomplete);
    });
    assert_eq!(controller.current_connection(), None);

    // The server sees the close frame and its loop ends.
    tokio::time::timeout(EVENT_WAIT, server)
        .await
        .expect("server should observe the close")
        .unwrap();
}

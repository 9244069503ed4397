//! `cachewatch-monitor` -- console monitor for proxy cache runs.
//!
//! Submits a list of URLs to the proxy service over WebSocket, prints
//! progress, cache statistics and node status as frames arrive, and exits
//! when the run finishes.
//!
//! # Environment variables
//!
//! | Variable               | Default              | Description                               |
//! |------------------------|----------------------|-------------------------------------------|
//! | `MONITOR_WS_URL`       | `ws://localhost:6789`| Streaming endpoint                        |
//! | `CACHE_CONTENT_URL`    | `http://localhost:5001/get_cached_content` | Cached-content endpoint |
//! | `IDLE_TIMEOUT_SECS`    | `30`                 | Stall warning after this much silence     |
//! | `CONNECT_TIMEOUT_SECS` | `10`                 | WebSocket handshake limit                 |
//! | `URLS_FILE`            | --                   | Newline-separated URLs when no args given |
//! | `CACHE_STRATEGY`       | `LRU`                | LRU, LFU, FIFO, ARC or RR                 |
//! | `LOAD_BALANCER`        | `round-robin`        | Load-balancing policy                     |
//! | `NUM_NODES`            | `3`                  | Worker nodes to simulate                  |
//! | `CACHE_SIZE`           | `32`                 | Cache capacity                            |
//! | `FETCH_CACHED_CONTENT` | `false`              | Print cached content after a completed run|
//!
//! Exit status is `0` for a completed run, `2` for an aborted one and `1`
//! otherwise.

mod render;
mod request;

use cachewatch_client::{CacheContentApi, MonitorConfig, MonitorEvent, SessionController};
use cachewatch_core::summary::RunOutcome;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::render::ConsoleRenderer;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cachewatch_monitor=info,cachewatch_client=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = MonitorConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let lookup = |var: &str| std::env::var(var).ok();

    let submission = request::build_request(&args, lookup).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Cannot build submission");
        std::process::exit(1);
    });
    let options = request::run_options(lookup).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid run options");
        std::process::exit(1);
    });

    tracing::info!(
        ws_url = %config.ws_url,
        work_items = submission.work_items().len(),
        cache_strategy = %submission.cache_strategy(),
        load_balancer = %submission.load_balancer(),
        num_nodes = submission.num_nodes(),
        cache_size = submission.cache_size(),
        "Starting cachewatch-monitor",
    );

    let mut controller = SessionController::new(&config);
    let mut events = controller.subscribe();

    let connection_id = controller.submit(submission).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Submission rejected");
        std::process::exit(1);
    });

    let mut renderer = ConsoleRenderer::new(connection_id, std::io::stdout());

    let outcome = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, closing connection");
                break None;
            }
        };

        match event {
            Ok(event) => {
                if let Err(e) = renderer.render(&event) {
                    tracing::warn!(error = %e, "Failed to write to stdout");
                }
                if let MonitorEvent::RunFinished { summary, .. } = &event {
                    if event.connection_id() == connection_id {
                        break Some(summary.outcome);
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Console fell behind, some updates were not shown");
            }
            Err(RecvError::Closed) => break None,
        }
    };

    controller.shutdown().await;

    if options.fetch_cached_content && outcome == Some(RunOutcome::Completed) {
        let api = CacheContentApi::new(config.cache_content_url.clone());
        match api.fetch_cached_content().await {
            Ok(content) => {
                if let Err(e) = renderer.render_cached_content(&content) {
                    tracing::warn!(error = %e, "Failed to write to stdout");
                }
            }
            Err(e) => {
                tracing::error!(url = %api.url(), error = %e, "Failed to fetch cached content");
                if let Err(write_err) = renderer.render_cached_content_error(&e) {
                    tracing::warn!(error = %write_err, "Failed to write to stdout");
                }
            }
        }
    }

    let code = match outcome {
        Some(RunOutcome::Completed) => 0,
        Some(RunOutcome::Aborted) => 2,
        Some(RunOutcome::Incomplete) | None => 1,
    };
    std::process::exit(code);
}

//! Console rendering of monitor events.
//!
//! Only events from the connection the renderer was created for are shown;
//! anything from a superseded run is dropped silently.

use std::io::{self, Write};

use cachewatch_client::api::CacheApiError;
use cachewatch_client::events::MonitorEvent;
use cachewatch_client::session::ConnectionId;
use cachewatch_core::aggregator::{ProgressUpdate, StateDelta};

pub struct ConsoleRenderer<W: Write> {
    connection_id: ConnectionId,
    out: W,
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(connection_id: ConnectionId, out: W) -> Self {
        Self { connection_id, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Write the lines for one event.
    pub fn render(&mut self, event: &MonitorEvent) -> io::Result<()> {
        if event.connection_id() != self.connection_id {
            return Ok(());
        }

        match event {
            MonitorEvent::Connected { .. } => writeln!(self.out, "Connected, submission sent"),
            MonitorEvent::ConnectFailed { error, .. } => {
                writeln!(self.out, "Could not connect: {error}")
            }
            MonitorEvent::StateChanged {
                delta, elapsed_ms, ..
            } => self.render_delta(delta, *elapsed_ms),
            MonitorEvent::Stalled {
                stalled: true,
                idle_ms,
                ..
            } => writeln!(
                self.out,
                "No updates for {:.0}s, the run may be stalled",
                *idle_ms as f64 / 1000.0
            ),
            MonitorEvent::Stalled { stalled: false, .. } => writeln!(self.out, "Updates resumed"),
            MonitorEvent::TransportError { error, .. } => {
                writeln!(self.out, "Transport error: {error}")
            }
            MonitorEvent::RunFinished { summary, .. } => writeln!(self.out, "{summary}"),
            MonitorEvent::Disconnected { .. } => Ok(()),
        }?;
        self.out.flush()
    }

    pub fn render_cached_content(&mut self, content: &str) -> io::Result<()> {
        writeln!(self.out, "Cached content:")?;
        for line in content.lines() {
            writeln!(self.out, "  {line}")?;
        }
        self.out.flush()
    }

    /// Show a failed cached-content fetch. A non-success response body is
    /// written as the server sent it.
    pub fn render_cached_content_error(&mut self, error: &CacheApiError) -> io::Result<()> {
        match error {
            CacheApiError::Status { status, body } => {
                writeln!(self.out, "Cached content unavailable ({status}):")?;
                for line in body.lines() {
                    writeln!(self.out, "  {line}")?;
                }
            }
            CacheApiError::Request(e) => {
                writeln!(self.out, "Cached content unavailable: {e}")?;
            }
        }
        self.out.flush()
    }

    fn render_delta(&mut self, delta: &StateDelta, elapsed_ms: u64) -> io::Result<()> {
        if let Some(trace) = &delta.trace {
            writeln!(
                self.out,
                "Trace: {} sent, {} received via {}",
                trace.packets_sent, trace.packets_received, trace.proxy_address
            )?;
        }
        if let Some(cache) = &delta.cache {
            writeln!(self.out, "Cache: {} hits, {} misses", cache.hits, cache.misses)?;
        }
        if let Some(nodes) = &delta.nodes {
            writeln!(self.out, "Nodes: {}", nodes.join(" | "))?;
        }
        if let Some(progress) = &delta.progress {
            self.render_progress(progress, elapsed_ms)?;
        }
        Ok(())
    }

    fn render_progress(&mut self, progress: &ProgressUpdate, elapsed_ms: u64) -> io::Result<()> {
        let event = &progress.event;
        writeln!(
            self.out,
            "[{}/{} {:.2}s] {}",
            progress.processed_count,
            progress.expected_count,
            elapsed_ms as f64 / 1000.0,
            event.message
        )?;

        if let Some(item) = &event.work_item {
            let responder = event.responder_address.as_deref().unwrap_or("-");
            let proxy = event.proxy_address.as_deref().unwrap_or("-");
            writeln!(self.out, "    {item} from {responder} via {proxy}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cachewatch_core::aggregator::Aggregator;
    use cachewatch_core::summary::{RunOutcome, RunSummary};

    use super::*;

    fn ids() -> (ConnectionId, ConnectionId) {
        (ConnectionId::new(), ConnectionId::new())
    }

    fn output(renderer: ConsoleRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    fn delta(raw: &str, expected: u64) -> StateDelta {
        let mut aggregator = Aggregator::default();
        aggregator.reset(expected);
        aggregator.ingest(raw)
    }

    #[test]
    fn progress_with_item_details() {
        let (id, _) = ids();
        let mut renderer = ConsoleRenderer::new(id, Vec::new());
        let delta = delta(
            r#"{"data":"Cache miss","url":"http://a","responseIP":"10.0.0.2","proxyIP":"10.0.0.1"}"#,
            2,
        );

        renderer
            .render(&MonitorEvent::StateChanged {
                connection_id: id,
                delta,
                elapsed_ms: 1250,
            })
            .unwrap();

        assert_eq!(
            output(renderer),
            "[1/2 1.25s] Cache miss\n    http://a from 10.0.0.2 via 10.0.0.1\n"
        );
    }

    #[test]
    fn stats_and_nodes_lines() {
        let (id, _) = ids();
        let mut renderer = ConsoleRenderer::new(id, Vec::new());
        let delta = delta(
            r#"{"cacheStats":{"hits":3,"misses":1},"nodeStatus":["node1: idle","node2: busy"]}"#,
            4,
        );

        renderer
            .render(&MonitorEvent::StateChanged {
                connection_id: id,
                delta,
                elapsed_ms: 0,
            })
            .unwrap();

        assert_eq!(
            output(renderer),
            "Cache: 3 hits, 1 misses\nNodes: node1: idle | node2: busy\n"
        );
    }

    #[test]
    fn events_from_other_connections_are_ignored() {
        let (shown, other) = ids();
        let mut renderer = ConsoleRenderer::new(shown, Vec::new());

        renderer
            .render(&MonitorEvent::TransportError {
                connection_id: other,
                error: "boom".into(),
            })
            .unwrap();
        renderer
            .render(&MonitorEvent::Connected {
                connection_id: shown,
            })
            .unwrap();

        assert_eq!(output(renderer), "Connected, submission sent\n");
    }

    #[test]
    fn stall_and_finish_lines() {
        let (id, _) = ids();
        let mut renderer = ConsoleRenderer::new(id, Vec::new());
        let summary = RunSummary {
            outcome: RunOutcome::Incomplete,
            reason: None,
            processed_count: 1,
            expected_count: 3,
            elapsed_ms: 2000,
        };

        for event in [
            MonitorEvent::Stalled {
                connection_id: id,
                stalled: true,
                idle_ms: 30_000,
            },
            MonitorEvent::Stalled {
                connection_id: id,
                stalled: false,
                idle_ms: 31_000,
            },
            MonitorEvent::RunFinished {
                connection_id: id,
                summary,
            },
            MonitorEvent::Disconnected { connection_id: id },
        ] {
            renderer.render(&event).unwrap();
        }

        assert_eq!(
            output(renderer),
            "No updates for 30s, the run may be stalled\n\
             Updates resumed\n\
             Processing did not finish: connection closed. 1 out of 3 URLs processed. \
             Time taken: 2.00s\n"
        );
    }

    #[test]
    fn cached_content_is_indented() {
        let (id, _) = ids();
        let mut renderer = ConsoleRenderer::new(id, Vec::new());
        renderer.render_cached_content("http://a\nhttp://b").unwrap();
        assert_eq!(output(renderer), "Cached content:\n  http://a\n  http://b\n");
    }

    #[test]
    fn cached_content_error_body_is_shown_verbatim() {
        let (id, _) = ids();
        let mut renderer = ConsoleRenderer::new(id, Vec::new());
        let error = CacheApiError::Status {
            status: 404,
            body: "Cached content file not found".into(),
        };

        renderer.render_cached_content_error(&error).unwrap();

        assert_eq!(
            output(renderer),
            "Cached content unavailable (404):\n  Cached content file not found\n"
        );
    }
}

//! WebSocket client for the proxy monitoring endpoint.
//!
//! [`MonitorClient`] holds the endpoint configuration. Call
//! [`MonitorClient::connect`] to open a fresh [`WsStream`]; the session
//! controller does this once per submission.

use std::time::Duration;

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// The raw WebSocket stream type used for monitoring connections.
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection settings for the streaming endpoint.
#[derive(Debug, Clone)]
pub struct MonitorClient {
    ws_url: String,
    connect_timeout: Duration,
}

impl MonitorClient {
    /// Create a client for `ws_url`, e.g. `ws://localhost:6789`.
    pub fn new(ws_url: String, connect_timeout: Duration) -> Self {
        Self {
            ws_url,
            connect_timeout,
        }
    }

    /// WebSocket endpoint URL.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open a new WebSocket connection.
    ///
    /// Fails with [`ClientError::Timeout`] if the handshake does not finish
    /// within the configured connect timeout.
    pub async fn connect(&self) -> Result<WsStream, ClientError> {
        let handshake = connect_async(self.ws_url.as_str());
        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| ClientError::Timeout(self.connect_timeout))?
            .map_err(|e| {
                ClientError::Connection(format!(
                    "Failed to connect to monitor at {}: {e}",
                    self.ws_url
                ))
            })?;

        tracing::info!(ws_url = %self.ws_url, "Connected to monitor endpoint");
        Ok(ws_stream)
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake did not complete in time.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        // Bind then drop a listener to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = MonitorClient::new(format!("ws://{addr}"), Duration::from_secs(5));
        assert_matches!(client.connect().await, Err(ClientError::Connection(_)));
    }

    #[tokio::test]
    async fn invalid_url_is_a_connection_error() {
        let client = MonitorClient::new("not a url".into(), Duration::from_secs(1));
        assert_matches!(client.connect().await, Err(ClientError::Connection(_)));
    }
}

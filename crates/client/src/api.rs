//! HTTP client for the cached-content endpoint.
//!
//! The proxy service exposes the content it currently has cached as a
//! plain-text document on a separate request/response endpoint. This is an
//! opaque read: either the body comes back or the failure is reported as
//! is. Nothing here retries.

/// HTTP client for the cached-content endpoint.
pub struct CacheContentApi {
    client: reqwest::Client,
    url: String,
}

/// Errors from the cached-content call.
#[derive(Debug, thiserror::Error)]
pub enum CacheApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint returned a non-2xx status code.
    #[error("Cached content request failed ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body, surfaced verbatim.
        body: String,
    },
}

impl CacheContentApi {
    /// Create a client for `url`, e.g. `http://host:5001/get_cached_content`.
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the current cached content as text.
    pub async fn fetch_cached_content(&self) -> Result<String, CacheApiError> {
        let response = self.client.get(&self.url).send().await?;
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        tracing::debug!(url = %self.url, bytes = body.len(), "Fetched cached content");
        Ok(body)
    }

    /// Return the response unchanged on success, or a
    /// [`CacheApiError::Status`] with the status and body on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, CacheApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CacheApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

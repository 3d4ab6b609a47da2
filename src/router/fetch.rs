//! Image byte fetching.
//!
//! Routing and importing need raw bytes from a URL, either the sender's
//! own serving path or the relay's `read-file` endpoint. The [`Fetcher`]
//! seam keeps the transport swappable; tests substitute an in-memory
//! implementation.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for one image fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Fetcher
// ============================================================================

/// Fetches raw bytes by URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the resource, returning its bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] on transport failures and non-success
    /// status codes.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

// ============================================================================
// HttpFetcher
// ============================================================================

/// Production [`Fetcher`] over HTTP.
pub struct HttpFetcher {
    /// Shared client with connection pooling.
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url = %url, "Fetching image bytes");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(url, e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::fetch(url, e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(url, e.to_string()))?;

        debug!(url = %url, len = bytes.len(), "Fetch complete");
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_failure_is_fetch_error() {
        let fetcher = HttpFetcher::new().expect("client");
        // Nothing listens on this port.
        let err = fetcher
            .fetch("http://127.0.0.1:1/editor-link/read-file?path=x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
        assert!(err.is_user_visible());
    }
}

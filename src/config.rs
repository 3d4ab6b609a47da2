//! Link endpoint configuration.
//!
//! Explicit configuration state passed into the connection manager at
//! construction and mutable only through its `set_url` contract. Replaces
//! the ad hoc per-peer port settings the components used to keep for
//! themselves.
//!
//! # Example
//!
//! ```ignore
//! use editor_link::LinkConfig;
//!
//! let config = LinkConfig::new()
//!     .with_port(7860)
//!     .with_secure(false);
//!
//! assert_eq!(config.ws_url(), "ws://127.0.0.1:7860/editor-link");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Socket endpoint path on the relay.
pub const ENDPOINT_PATH: &str = "/editor-link";

/// Companion HTTP endpoint serving raw file bytes by sender-local path.
pub const READ_FILE_PATH: &str = "/editor-link/read-file";

/// Delay before a single reconnection attempt after an unexpected close.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Timeout for one connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default relay host.
const DEFAULT_HOST: &str = "127.0.0.1";

/// Default relay port (the web UI's own port).
const DEFAULT_PORT: u16 = 7860;

// ============================================================================
// LinkConfig
// ============================================================================

/// Configuration for one peer's relay connection.
///
/// The link is only meant for locally reachable relays; there is no
/// authentication layer, so the default host is loopback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Relay host name or address.
    pub host: String,

    /// Relay port.
    pub port: u16,

    /// Use secure schemes (`wss`/`https`).
    ///
    /// Set when the hosting page is itself served securely.
    pub secure: bool,

    /// Delay before the reconnection attempt after an unexpected close.
    pub reconnect_delay: Duration,

    /// Timeout for one connection attempt.
    pub connect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl LinkConfig {
    /// Creates a config with default settings (`127.0.0.1:7860`, insecure).
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            secure: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Derives a config from a relay URL.
    ///
    /// Accepts `ws`, `wss`, `http` and `https` schemes; any path is
    /// ignored, only host/port/scheme are taken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for unparsable URLs, missing hosts or
    /// unsupported schemes.
    pub fn from_url(raw: &str) -> Result<Self> {
        let parsed =
            Url::parse(raw).map_err(|e| Error::protocol(format!("invalid relay url: {e}")))?;

        let secure = match parsed.scheme() {
            "ws" | "http" => false,
            "wss" | "https" => true,
            other => {
                return Err(Error::protocol(format!(
                    "unsupported relay scheme: {other}"
                )));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::protocol("relay url has no host"))?
            .to_string();

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| Error::protocol("relay url has no port"))?;

        Ok(Self {
            host,
            port,
            secure,
            ..Self::new()
        })
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl LinkConfig {
    /// Sets the relay host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the relay port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enables or disables secure schemes.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

// ============================================================================
// URL Derivation
// ============================================================================

impl LinkConfig {
    /// Returns the socket endpoint URL.
    ///
    /// Format: `ws://host:port/editor-link`, with `wss` when secure.
    #[must_use]
    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}{ENDPOINT_PATH}", self.host, self.port)
    }

    /// Returns the HTTP base URL of the relay host.
    #[must_use]
    pub fn http_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Returns the read-file URL for a sender-local path.
    ///
    /// Peers that cannot reach the sender's filesystem fetch the bytes
    /// through this endpoint instead.
    #[must_use]
    pub fn read_file_url(&self, path: &str) -> String {
        format!(
            "{}{READ_FILE_PATH}?path={}",
            self.http_url(),
            urlencoding::encode(path)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_urls() {
        let config = LinkConfig::new();
        assert_eq!(config.ws_url(), "ws://127.0.0.1:7860/editor-link");
        assert_eq!(config.http_url(), "http://127.0.0.1:7860");
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_secure_scheme_upgrade() {
        let config = LinkConfig::new().with_secure(true).with_port(443);
        assert_eq!(config.ws_url(), "wss://127.0.0.1:443/editor-link");
        assert!(config.http_url().starts_with("https://"));
    }

    #[test]
    fn test_read_file_url_encodes_path() {
        let config = LinkConfig::new();
        let url = config.read_file_url("out/my image.png");
        assert_eq!(
            url,
            "http://127.0.0.1:7860/editor-link/read-file?path=out%2Fmy%20image.png"
        );
    }

    #[test]
    fn test_from_url() {
        let config = LinkConfig::from_url("ws://localhost:9000/editor-link").expect("parse");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 9000);
        assert!(!config.secure);

        let secure = LinkConfig::from_url("https://example.net/").expect("parse");
        assert!(secure.secure);
        assert_eq!(secure.port, 443);
    }

    #[test]
    fn test_from_url_rejects_bad_schemes() {
        assert!(LinkConfig::from_url("ftp://host:21").is_err());
        assert!(LinkConfig::from_url("not a url").is_err());
    }
}

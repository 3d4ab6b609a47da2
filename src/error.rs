//! Error types for the editor link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use editor_link::{Result, Error};
//!
//! async fn example(router: &ImageRouter) -> Result<()> {
//!     let message = LoadImage::new(TargetId::img2img()).with_url("http://host/a.png");
//!     router.route(&message).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Handling |
//! |----------|----------|----------|
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`] | contained, drives automatic retry |
//! | Protocol | [`Error::Protocol`] | dropped and logged, connection untouched |
//! | Target | [`Error::TargetResolution`] | user-visible alert, operation aborted |
//! | Precondition | [`Error::Precondition`] | user-visible alert, aborted before any mutation |
//! | IO | [`Error::Fetch`], [`Error::Io`], [`Error::Image`] | surfaced to the user, undo scope rolled back |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::protocol::TargetId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging. None of these
/// errors terminates the process; connection errors drive automatic
/// recovery, everything else aborts only the single in-flight operation.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Socket connection failed.
    ///
    /// Returned when the relay endpoint cannot be reached.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection attempt timed out.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unrecognized message.
    ///
    /// The offending message is dropped; the connection is untouched.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Routing Errors
    // ========================================================================
    /// No drop zone exists for a recognized target.
    ///
    /// User-visible; the routing operation aborts, the connection and
    /// future messages are unaffected.
    #[error("No drop zone found for target: {target}")]
    TargetResolution {
        /// The target that could not be resolved.
        target: TargetId,
    },

    // ========================================================================
    // Precondition Errors
    // ========================================================================
    /// An operation's precondition does not hold.
    ///
    /// Examples: wrong number of selected layers, no active document.
    /// User-visible; raised before any mutation takes place.
    #[error("{message}")]
    Precondition {
        /// User-facing description of the failed precondition.
        message: String,
    },

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// Fetching image bytes failed.
    #[error("Fetch failed for {url}: {message}")]
    Fetch {
        /// The URL that was being fetched.
        url: String,
        /// Description of the fetch failure.
        message: String,
    },

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Image encoding or decoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a target resolution error.
    #[inline]
    pub fn target_resolution(target: TargetId) -> Self {
        Self::TargetResolution { target }
    }

    /// Creates a precondition error.
    #[inline]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Creates a fetch error.
    #[inline]
    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a transport-level error.
    ///
    /// Transport errors are fully contained: they drive automatic
    /// reconnection and never surface beyond a connection-state indicator.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this error should be surfaced to the user.
    ///
    /// User-visible errors abort the single in-flight operation and are
    /// reported as an alert; they never crash the connection or process.
    #[inline]
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::TargetResolution { .. }
                | Self::Precondition { .. }
                | Self::Fetch { .. }
                | Self::Io(_)
                | Self::Image(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_precondition_display_is_bare_message() {
        let err = Error::precondition("one layer must be selected");
        assert_eq!(err.to_string(), "one layer must be selected");
    }

    #[test]
    fn test_target_resolution_names_target() {
        let err = Error::target_resolution(TargetId::inpaint_mask());
        assert!(err.to_string().contains("inpaint_mask"));
    }

    #[test]
    fn test_is_connection_error() {
        let conn_err = Error::connection("test");
        let timeout_err = Error::connection_timeout(5000);
        let other_err = Error::protocol("test");

        assert!(conn_err.is_connection_error());
        assert!(timeout_err.is_connection_error());
        assert!(!other_err.is_connection_error());
    }

    #[test]
    fn test_connection_timeout_display() {
        let err = Error::connection_timeout(10_000);
        assert_eq!(err.to_string(), "Connection timeout after 10000ms");
        assert!(!err.is_user_visible());
    }

    #[test]
    fn test_is_user_visible() {
        let precondition = Error::precondition("no active document");
        let fetch = Error::fetch("http://x/a.png", "404");
        let protocol = Error::protocol("bad frame");
        let connection = Error::connection("refused");

        assert!(precondition.is_user_visible());
        assert!(fetch.is_user_visible());
        assert!(!protocol.is_user_visible());
        assert!(!connection.is_user_visible());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_user_visible());
    }

}

//! Socket connection management.
//!
//! One [`ConnectionManager`] per peer process owns the outbound socket to
//! the relay, reconnects automatically after unexpected closes and fans
//! inbound frames out to subscribers as typed [`LinkEvent`]s.

// ============================================================================
// Submodules
// ============================================================================

/// Connection manager actor and public handle.
pub mod manager;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;

use crate::protocol::Message;

// ============================================================================
// Re-exports
// ============================================================================

pub use manager::ConnectionManager;

// ============================================================================
// ConnectionState
// ============================================================================

/// Logical state of the relay connection.
///
/// At most one live socket and at most one pending reconnect timer exist
/// at any point; both are owned by the manager's actor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket and no attempt in progress.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The socket is open.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

// ============================================================================
// LinkEvent
// ============================================================================

/// Events published by the connection manager.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The connection opened or closed.
    ConnectionChanged(ConnectionState),
    /// One parsed inbound frame.
    Message(Message),
}

// ============================================================================
// MessageSender
// ============================================================================

/// Outbound message seam.
///
/// Implemented by [`ConnectionManager`]; test hosts substitute a
/// recording fake.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sends a message, returning `false` without error when not connected.
    async fn send(&self, message: &Message) -> bool;
}

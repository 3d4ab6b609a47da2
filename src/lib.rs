//! Editor Link - Bidirectional image relay between a generation web UI
//! and a desktop image editor.
//!
//! Both peers connect to a shared WebSocket endpoint and exchange small
//! JSON frames pointing at image files: the web app pushes finished
//! renders into the editor, the editor pushes documents and inpaint
//! masks back into the web UI.
//!
//! # Architecture
//!
//! The link is symmetric around a dumb relay:
//!
//! - **Web-app side**: [`ImageRouter`] resolves `load-image` frames to
//!   drop zones in the generation UI
//! - **Editor side**: [`ExportController`] captures documents and masks,
//!   and imports files the web app sends back
//! - **Both**: [`ConnectionManager`] owns the socket, reconnecting on
//!   its own and fanning out typed [`LinkEvent`]s
//!
//! Frames carry file *references* (`url`, `localPath`), never pixel
//! data; the receiving peer fetches bytes itself.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use editor_link::{ConnectionManager, HttpFetcher, ImageRouter, LinkConfig, Result};
//! # use editor_link::DropZoneHost;
//! # fn my_ui_host() -> Arc<dyn DropZoneHost> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = LinkConfig::new();
//!     let manager = ConnectionManager::new(config.clone());
//!     manager.connect();
//!
//!     let router = ImageRouter::new(my_ui_host(), Arc::new(HttpFetcher::new()?), config);
//!     router.serve(manager.subscribe()).await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Endpoint configuration: [`LinkConfig`] |
//! | [`connection`] | Socket ownership and reconnect: [`ConnectionManager`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`export`] | Editor side: [`ExportController`], inpaint masks |
//! | [`protocol`] | Wire message types (JSON frames) |
//! | [`relay`] | In-process relay endpoint for peers and tests |
//! | [`router`] | Web-app side: [`ImageRouter`], byte fetching |
//!
//! # Behavior notes
//!
//! - The manager reconnects forever on a fixed delay; an application
//!   focus event retries immediately
//! - Malformed frames are dropped without touching the connection
//! - Editor imports run inside one undo group: success is a single undo
//!   step, failure leaves the document untouched

// ============================================================================
// Modules
// ============================================================================

/// Endpoint configuration.
///
/// [`LinkConfig`] knows the relay's host, port, scheme, and the timing
/// knobs for connect and reconnect.
pub mod config;

/// Socket ownership and lifecycle.
///
/// [`ConnectionManager`] holds the one socket per peer, reconnects on
/// loss, and fans out [`LinkEvent`]s to subscribers.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Editor-side export and import.
pub mod export;

/// Wire message types.
///
/// JSON frames discriminated by an `action` field.
pub mod protocol;

/// In-process relay endpoint.
///
/// Forwards every text frame to all other connected clients.
pub mod relay;

/// Web-app-side image routing.
pub mod router;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{ENDPOINT_PATH, LinkConfig};

// Connection types
pub use connection::{ConnectionManager, ConnectionState, LinkEvent, MessageSender};

// Error types
pub use error::{Error, Result};

// Editor side
pub use export::{DocumentId, EditorHost, ExportController, ExportJob, ImportOutcome, LayerId};

// Wire types
pub use protocol::{ImageSource, LoadImage, Message, RenderedImages, TargetId, UiContext};

// Relay
pub use relay::Relay;

// Web-app side
pub use router::{
    DropZone, DropZoneHost, Fetcher, FileDrop, HttpFetcher, ImageRouter, RouteOutcome,
};

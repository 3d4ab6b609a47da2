//! Web-app side image routing.
//!
//! The [`ImageRouter`] receives `load-image` messages, resolves the
//! abstract target to a concrete drop zone, fetches the image bytes and
//! injects them as if the user had dropped a single file onto the zone.
//!
//! Presentation-layer lookups stay behind the [`DropZoneHost`] seam; the
//! router never touches the page itself.

// ============================================================================
// Submodules
// ============================================================================

/// Byte fetching over HTTP.
pub mod fetch;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::connection::LinkEvent;
use crate::error::{Error, Result};
use crate::protocol::{ImageSource, LoadImage, Message, TargetId, UiContext};

// ============================================================================
// Re-exports
// ============================================================================

pub use fetch::{Fetcher, HttpFetcher};

// ============================================================================
// Constants
// ============================================================================

/// File name used when none can be derived from the source.
const FALLBACK_FILE_NAME: &str = "image.png";

// ============================================================================
// DropZone
// ============================================================================

/// Opaque handle to a concrete UI drop zone.
///
/// The host resolves targets to these; the router only passes them back
/// for injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropZone {
    /// Host-side identifier of the zone (element ID or similar).
    pub id: String,
}

impl DropZone {
    /// Creates a handle from a host-side identifier.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

// ============================================================================
// FileDrop
// ============================================================================

/// A synthetic single-file drop.
#[derive(Debug, Clone)]
pub struct FileDrop {
    /// Name the dropped file presents to the zone.
    pub file_name: String,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
}

// ============================================================================
// DropZoneHost
// ============================================================================

/// Collaborator interface to the hosting UI.
///
/// Implementations own all page lookups and mutations; injection is a
/// fire-and-forget synthetic event, so the router needs no further
/// coordination before handling the next message.
#[async_trait]
pub trait DropZoneHost: Send + Sync {
    /// Returns the currently active top-level mode.
    fn current_context(&self) -> UiContext;

    /// Switches the page to the given mode.
    async fn switch_context(&self, context: UiContext) -> Result<()>;

    /// Resolves a target to its drop zone, if it exists right now.
    async fn resolve_drop_zone(&self, target: &TargetId) -> Option<DropZone>;

    /// Initializes lazily created UI backing the target.
    ///
    /// Called once before retrying a failed resolution; zones inside
    /// accordions or on-demand panels don't exist until first shown.
    async fn prepare_target(&self, target: &TargetId) -> Result<()>;

    /// Injects a file drop into the zone.
    async fn inject(&self, zone: &DropZone, drop: FileDrop) -> Result<()>;
}

// ============================================================================
// RouteOutcome
// ============================================================================

/// Result of routing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The target belongs to another peer; nothing was fetched or changed.
    Ignored,
    /// The image was injected into its drop zone.
    Delivered,
}

// ============================================================================
// ImageRouter
// ============================================================================

/// Routes incoming `load-image` messages into the hosting UI.
pub struct ImageRouter {
    /// UI collaborator.
    host: Arc<dyn DropZoneHost>,
    /// Byte transport.
    fetcher: Arc<dyn Fetcher>,
    /// Link endpoint, used to build read-file URLs.
    config: LinkConfig,
    /// Targets this peer accepts.
    recognized: FxHashSet<TargetId>,
}

impl ImageRouter {
    /// Creates a router recognizing the web-app target set.
    #[must_use]
    pub fn new(host: Arc<dyn DropZoneHost>, fetcher: Arc<dyn Fetcher>, config: LinkConfig) -> Self {
        Self {
            host,
            fetcher,
            config,
            recognized: TargetId::web_targets().into_iter().collect(),
        }
    }

    /// Replaces the recognized target set.
    #[must_use]
    pub fn with_recognized(mut self, targets: impl IntoIterator<Item = TargetId>) -> Self {
        self.recognized = targets.into_iter().collect();
        self
    }

    /// Routes one validated `load-image` message.
    ///
    /// Messages whose target is outside this peer's recognized set are
    /// for a different peer and resolve to [`RouteOutcome::Ignored`]
    /// without fetching anything.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] when the message carries no image source
    /// - [`Error::Fetch`] when the bytes cannot be retrieved
    /// - [`Error::TargetResolution`] when no drop zone exists for a
    ///   recognized target
    pub async fn route(&self, message: &LoadImage) -> Result<RouteOutcome> {
        if !self.recognized.contains(&message.target) {
            debug!(target = %message.target, "Target not recognized by this peer, ignoring");
            return Ok(RouteOutcome::Ignored);
        }

        // Resolve bytes before touching the UI.
        let url = match message.source()? {
            ImageSource::Url(url) => url,
            ImageSource::LocalPath(path) => self.config.read_file_url(&path.to_string_lossy()),
        };
        let bytes = self.fetcher.fetch(&url).await?;

        // Make sure a compatible mode is active. Targets with no
        // preference are hosted by whatever mode is current.
        if let Some(required) = message.target.required_context()
            && self.host.current_context() != required
        {
            debug!(target = %message.target, ?required, "Switching UI context");
            self.host.switch_context(required).await?;
        }

        let zone = self.locate_drop_zone(&message.target).await?;

        let file_name = file_name_for(message);
        info!(target = %message.target, zone = %zone.id, file = %file_name, "Injecting image");
        self.host
            .inject(&zone, FileDrop { file_name, bytes })
            .await?;

        Ok(RouteOutcome::Delivered)
    }

    /// Resolves the drop zone, initializing lazy UI once on a miss.
    async fn locate_drop_zone(&self, target: &TargetId) -> Result<DropZone> {
        if let Some(zone) = self.host.resolve_drop_zone(target).await {
            return Ok(zone);
        }

        debug!(target = %target, "Drop zone missing, initializing lazy UI");
        self.host.prepare_target(target).await?;

        self.host
            .resolve_drop_zone(target)
            .await
            .ok_or_else(|| Error::target_resolution(target.clone()))
    }

    /// Dispatch loop: routes every inbound `load-image` in arrival order.
    ///
    /// Routing errors are surfaced per message and never stop the loop or
    /// the connection. Runs until the event stream closes.
    pub async fn serve(&self, mut events: tokio::sync::broadcast::Receiver<LinkEvent>) {
        loop {
            match events.recv().await {
                Ok(LinkEvent::Message(Message::LoadImage(payload))) => {
                    if let Err(e) = self.route(&payload).await {
                        // User-visible errors become alerts upstream; here
                        // we log and move on to the next message.
                        warn!(target = %payload.target, error = %e, "Routing failed");
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Message dispatch lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Derives a display file name from the message source.
fn file_name_for(message: &LoadImage) -> String {
    let basename = |raw: &str| -> Option<String> {
        raw.split(['/', '\\'])
            .next_back()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    };

    message
        .local_path
        .as_deref()
        .and_then(basename)
        .or_else(|| {
            message
                .url
                .as_deref()
                .map(|url| url.split(['?', '#']).next().unwrap_or(url))
                .and_then(basename)
        })
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

// ============================================================================
// Tests
// ============================================================================

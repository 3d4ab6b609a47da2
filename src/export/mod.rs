//! Editor-side export and import.
//!
//! The [`ExportController`] captures the current document or inpaint
//! layer state into temp PNG files and announces them over the link; the
//! reverse path opens files the web app sends back, merging them into
//! the active document when asked to.
//!
//! All document mutations run inside a single undo group when an active
//! document exists: success commits one undo step, any failure reverts
//! everything the operation touched.
//!
//! Editor mechanics (rendering, opening, merging, undo) live behind the
//! [`EditorHost`] seam.

// ============================================================================
// Submodules
// ============================================================================

/// Inpaint mask rendering.
pub mod mask;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::connection::{LinkEvent, MessageSender};
use crate::error::{Error, Result};
use crate::protocol::{LoadImage, Message, TargetId};
use crate::router::Fetcher;

// ============================================================================
// Constants
// ============================================================================

/// Prefix for temp files this controller creates.
const TEMP_PREFIX: &str = "editor-link-";

/// Layer name used when no file stem can be derived.
const FALLBACK_LAYER_NAME: &str = "imported";

// ============================================================================
// Identifiers
// ============================================================================

/// Handle to an open editor document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(u64);

impl DocumentId {
    /// Creates a document handle.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "document-{}", self.0)
    }
}

/// Handle to a layer within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(u64);

impl LayerId {
    /// Creates a layer handle.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

// ============================================================================
// EditorHost
// ============================================================================

/// Collaborator interface to the hosting editor.
///
/// Renders are expected in straight (non-premultiplied) RGBA.
#[async_trait]
pub trait EditorHost: Send + Sync {
    /// Returns the active document, if any.
    fn active_document(&self) -> Option<DocumentId>;

    /// Returns the currently selected layers of a document.
    fn selected_layers(&self, document: DocumentId) -> Vec<LayerId>;

    /// Renders the document, optionally with one layer hidden.
    async fn render_document(
        &self,
        document: DocumentId,
        hidden: Option<LayerId>,
    ) -> Result<RgbaImage>;

    /// Renders one layer standalone, with opacity and fill reset to
    /// fully opaque so alpha reflects only the painted shape.
    async fn render_layer(&self, document: DocumentId, layer: LayerId) -> Result<RgbaImage>;

    /// Opens a file as a new document and returns its handle.
    async fn open_document(&self, path: &Path) -> Result<DocumentId>;

    /// Merges all content of `source` into `dest` as new layer(s) with
    /// the given name.
    async fn merge_into(&self, source: DocumentId, dest: DocumentId, layer_name: &str)
    -> Result<()>;

    /// Closes a document without saving.
    async fn close_document(&self, document: DocumentId) -> Result<()>;

    /// Opens an undo group on the document.
    async fn begin_undo_group(&self, document: DocumentId, label: &str) -> Result<()>;

    /// Commits the open undo group as a single undo step.
    async fn commit_undo_group(&self, document: DocumentId) -> Result<()>;

    /// Reverts everything done inside the open undo group.
    async fn rollback_undo_group(&self, document: DocumentId) -> Result<()>;
}

// ============================================================================
// ExportJob
// ============================================================================

/// Record of one finished export.
///
/// The temp files stay owned by the editor; the receiving side never
/// deletes files it was handed by `localPath`.
#[derive(Debug, Clone)]
pub struct ExportJob {
    /// Produced files and the targets they were sent to.
    pub files: Vec<(TargetId, PathBuf)>,
}

// ============================================================================
// ImportOutcome
// ============================================================================

/// Result of handling one editor-bound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The target belongs to another peer; nothing happened.
    Ignored,
    /// The file was opened (and possibly merged).
    Imported,
}

// ============================================================================
// TempDownload
// ============================================================================

/// Deletes a fetched temp file once the import is over.
///
/// Files reached through a supplied `localPath` are owned by the other
/// peer and never wrapped in this guard.
struct TempDownload {
    path: PathBuf,
}

impl Drop for TempDownload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Temp download already gone");
        }
    }
}

// ============================================================================
// ExportController
// ============================================================================

/// Editor-side bridge between the document and the link.
pub struct ExportController {
    /// Editor collaborator.
    host: Arc<dyn EditorHost>,
    /// Byte transport for remote imports.
    fetcher: Arc<dyn Fetcher>,
    /// Outbound message seam.
    sender: Arc<dyn MessageSender>,
    /// Where export temp files land.
    temp_dir: PathBuf,
}

impl ExportController {
    /// Creates a controller writing temp files to the system temp dir.
    #[must_use]
    pub fn new(
        host: Arc<dyn EditorHost>,
        fetcher: Arc<dyn Fetcher>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            host,
            fetcher,
            sender,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Overrides the temp directory.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }
}

// ============================================================================
// ExportController - Export
// ============================================================================

impl ExportController {
    /// Exports the active document to the given target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] ("no active document") when no
    /// document is open.
    pub async fn export_current(&self, target: TargetId) -> Result<ExportJob> {
        let document = self
            .host
            .active_document()
            .ok_or_else(|| Error::precondition("no active document"))?;

        let rendered = self.host.render_document(document, None).await?;
        let path = self.write_temp_png(&rendered)?;

        info!(%document, target = %target, path = %path.display(), "Exported document");
        self.send_local_file(target.clone(), &path).await;

        Ok(ExportJob {
            files: vec![(target, path)],
        })
    }

    /// Exports the inpaint image/mask pair.
    ///
    /// Requires exactly one selected layer: the mask. Produces the
    /// document rendered with that layer hidden (the image) and the
    /// layer's shape as a white-on-black mask, then sends both.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] when no document is open or the
    /// selection is not exactly one layer; nothing is written in either
    /// case.
    pub async fn export_for_inpaint(&self) -> Result<ExportJob> {
        let document = self
            .host
            .active_document()
            .ok_or_else(|| Error::precondition("no active document"))?;

        let selected = self.host.selected_layers(document);
        let &[layer] = selected.as_slice() else {
            return Err(Error::precondition("one layer must be selected"));
        };

        let image = self.host.render_document(document, Some(layer)).await?;
        let layer_render = self.host.render_layer(document, layer).await?;
        let mask = mask::inpaint_mask(&layer_render);

        let image_path = self.write_temp_png(&image)?;
        let mask_path = self.write_temp_png(&mask)?;

        info!(
            %document,
            %layer,
            image = %image_path.display(),
            mask = %mask_path.display(),
            "Exported inpaint pair"
        );
        self.send_local_file(TargetId::inpaint_img(), &image_path)
            .await;
        self.send_local_file(TargetId::inpaint_mask(), &mask_path)
            .await;

        Ok(ExportJob {
            files: vec![
                (TargetId::inpaint_img(), image_path),
                (TargetId::inpaint_mask(), mask_path),
            ],
        })
    }

    /// Sends one `load-image` frame carrying only a local path; the
    /// files never leave this machine's filesystem.
    async fn send_local_file(&self, target: TargetId, path: &Path) {
        let message = Message::LoadImage(
            LoadImage::new(target).with_local_path(path.to_string_lossy().into_owned()),
        );
        if !self.sender.send(&message).await {
            warn!(path = %path.display(), "Link is down, export message not delivered");
        }
    }

    /// Writes an image to a fresh temp PNG and returns its path.
    fn write_temp_png(&self, image: &RgbaImage) -> Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".png")
            .tempfile_in(&self.temp_dir)?;
        let (_, path) = file.keep().map_err(|e| Error::Io(e.error))?;
        image.save(&path)?;
        Ok(path)
    }
}

// ============================================================================
// ExportController - Import
// ============================================================================

impl ExportController {
    /// Handles an editor-bound `load-image` message.
    ///
    /// Opens the referenced file as a new document. When `newDocument`
    /// is falsy and a document was already active, the opened content is
    /// merged into it as a layer named after the source file (extension
    /// stripped) and the intermediate document is discarded.
    ///
    /// A file fetched from `url` is a temp download and is deleted after
    /// the import; a file reached through `localPath` is owned by the
    /// other peer and left alone.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] when the message carries no source
    /// - [`Error::Fetch`] / [`Error::Io`] when the file cannot be obtained
    /// - any editor failure, after the undo group is rolled back
    pub async fn import_from_message(&self, message: &LoadImage) -> Result<ImportOutcome> {
        if !message.target.is_editor() {
            debug!(target = %message.target, "Not an editor target, ignoring");
            return Ok(ImportOutcome::Ignored);
        }

        let (path, download) = self.resolve_file(message).await?;
        let active = self.host.active_document();

        if let Some(document) = active {
            self.host.begin_undo_group(document, "Import image").await?;
        }

        let result = self
            .open_and_place(&path, message.wants_new_document(), active)
            .await;

        if let Some(document) = active {
            match &result {
                Ok(()) => self.host.commit_undo_group(document).await?,
                Err(_) => {
                    if let Err(e) = self.host.rollback_undo_group(document).await {
                        warn!(%document, error = %e, "Undo rollback failed");
                    }
                }
            }
        }

        // A fetched temp file is deleted here; peer-owned paths have no guard.
        drop(download);

        result.map(|()| ImportOutcome::Imported)
    }

    /// Resolves the message to a readable file, downloading when needed.
    ///
    /// A supplied local path wins when it is readable from this process;
    /// otherwise the URL is fetched into a guarded temp file.
    async fn resolve_file(&self, message: &LoadImage) -> Result<(PathBuf, Option<TempDownload>)> {
        if let Some(local) = &message.local_path {
            let path = PathBuf::from(local);
            if path.exists() {
                return Ok((path, None));
            }
        }

        if let Some(url) = &message.url {
            let bytes = self.fetcher.fetch(url).await?;
            let path = self.write_temp_download(url, &bytes)?;
            return Ok((path.clone(), Some(TempDownload { path })));
        }

        // A local path that does not exist here and no URL to fall back to.
        if let Some(local) = &message.local_path {
            return Err(Error::fetch(
                local.clone(),
                "local path is not readable from this process and no url was given",
            ));
        }
        Err(Error::protocol(
            "load-image carries neither url nor localPath",
        ))
    }

    /// Opens the file and merges it into the active document when asked.
    async fn open_and_place(
        &self,
        path: &Path,
        new_document: bool,
        active: Option<DocumentId>,
    ) -> Result<()> {
        let opened = self.host.open_document(path).await?;

        if new_document {
            info!(%opened, path = %path.display(), "Imported as new document");
            return Ok(());
        }

        let Some(dest) = active else {
            // Nothing to merge into; the opened document stays.
            info!(%opened, path = %path.display(), "No active document, imported standalone");
            return Ok(());
        };

        let layer_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| FALLBACK_LAYER_NAME.to_string());

        self.host.merge_into(opened, dest, &layer_name).await?;
        self.host.close_document(opened).await?;
        info!(%dest, layer = %layer_name, "Imported as layer");
        Ok(())
    }

    /// Writes fetched bytes to a fresh temp file, keeping the source
    /// extension so the editor picks the right decoder.
    fn write_temp_download(&self, url: &str, bytes: &[u8]) -> Result<PathBuf> {
        let extension = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && ext.chars().all(char::is_alphanumeric))
            .unwrap_or("png");

        let file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(&format!(".{extension}"))
            .tempfile_in(&self.temp_dir)?;
        let (_, path) = file.keep().map_err(|e| Error::Io(e.error))?;
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

// ============================================================================
// ExportController - Dispatch
// ============================================================================

impl ExportController {
    /// Dispatch loop: imports every editor-bound message in arrival order.
    ///
    /// Failures abort only their own message and are logged; the loop
    /// and connection keep running until the event stream closes.
    pub async fn serve(&self, mut events: tokio::sync::broadcast::Receiver<LinkEvent>) {
        loop {
            match events.recv().await {
                Ok(LinkEvent::Message(Message::LoadImage(payload))) => {
                    if let Err(e) = self.import_from_message(&payload).await {
                        warn!(error = %e, "Import failed");
                    }
                }
                Ok(LinkEvent::Message(Message::RenderedImages(batch))) => {
                    debug!(count = batch.images.len(), "Render batch announced");
                }
                Ok(LinkEvent::ConnectionChanged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Import dispatch lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Wire message types.
//!
//! Messages are immutable JSON records discriminated by an `action` field.
//! Field names follow the wire convention (`localPath`, `newDocument`),
//! mapped to Rust naming with serde renames.

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::TargetId;

// ============================================================================
// Message
// ============================================================================

/// A frame exchanged between peers through the relay.
///
/// # Format
///
/// ```json
/// { "action": "load-image", "target": "inpaint_img", "localPath": "/tmp/a.png" }
/// ```
///
/// A frame with an unknown `action` fails to deserialize; the dispatcher
/// drops it without touching the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Message {
    /// Route an image into a named UI slot on the receiving peer.
    #[serde(rename = "load-image")]
    LoadImage(LoadImage),

    /// Announcement that a render batch finished on the web-app side.
    #[serde(rename = "rendered-images")]
    RenderedImages(RenderedImages),
}

impl Message {
    /// Returns the load-image payload, if this is one.
    #[inline]
    #[must_use]
    pub fn as_load_image(&self) -> Option<&LoadImage> {
        match self {
            Self::LoadImage(payload) => Some(payload),
            Self::RenderedImages(_) => None,
        }
    }
}

// ============================================================================
// LoadImage
// ============================================================================

/// Payload of a `load-image` message.
///
/// Exactly one of `url` / `local_path` must be resolvable to bytes. Both
/// may be present; they are trusted to refer to the same content and the
/// receiving peer picks whichever it can reach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadImage {
    /// Destination slot on the receiving peer.
    pub target: TargetId,

    /// URL the receiving peer can fetch the bytes from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Path on the sending peer's filesystem.
    #[serde(
        rename = "localPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub local_path: Option<String>,

    /// Open as a new document instead of merging into the active one.
    ///
    /// Only meaningful for the `editor` target. Absent means falsy.
    #[serde(
        rename = "newDocument",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub new_document: Option<bool>,
}

impl LoadImage {
    /// Creates a payload with no image source attached yet.
    #[inline]
    #[must_use]
    pub fn new(target: TargetId) -> Self {
        Self {
            target,
            url: None,
            local_path: None,
            new_document: None,
        }
    }

    /// Creates an editor-bound payload carrying both access paths.
    ///
    /// The web app sends both so the editor can read the file directly
    /// when it shares a filesystem with the server and fall back to the
    /// URL otherwise.
    #[must_use]
    pub fn to_editor(
        url: impl Into<String>,
        local_path: impl Into<String>,
        new_document: bool,
    ) -> Self {
        Self {
            target: TargetId::editor(),
            url: Some(url.into()),
            local_path: Some(local_path.into()),
            new_document: Some(new_document),
        }
    }

    /// Sets the fetch URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the sender-local file path.
    #[must_use]
    pub fn with_local_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    /// Sets the new-document flag.
    #[must_use]
    pub fn with_new_document(mut self, new_document: bool) -> Self {
        self.new_document = Some(new_document);
        self
    }

    /// Returns `true` if the receiver should open a new document.
    #[inline]
    #[must_use]
    pub fn wants_new_document(&self) -> bool {
        self.new_document.unwrap_or(false)
    }

    /// Resolves the image source, preferring the URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when neither `url` nor `localPath`
    /// is present.
    pub fn source(&self) -> Result<ImageSource> {
        if let Some(url) = &self.url {
            return Ok(ImageSource::Url(url.clone()));
        }
        if let Some(path) = &self.local_path {
            return Ok(ImageSource::LocalPath(PathBuf::from(path)));
        }
        Err(Error::protocol(
            "load-image carries neither url nor localPath",
        ))
    }
}

// ============================================================================
// ImageSource
// ============================================================================

/// Where the bytes of a `load-image` payload come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Fetch over HTTP.
    Url(String),
    /// Read from the sending peer's filesystem.
    LocalPath(PathBuf),
}

// ============================================================================
// RenderedImages
// ============================================================================

/// Payload of a `rendered-images` message.
///
/// Broadcast after a generation batch completes so the other peer can
/// offer the fresh results for import. When the batch was an inpaint,
/// `masked_images` carries the mask-composited copy of each result
/// (`null` for results without one).
///
/// Unlike `load-image`, this frame uses snake_case field names on the
/// wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedImages {
    /// Saved paths of the batch results, in gallery order.
    pub images: Vec<String>,

    /// Mask-composited copy per result, when one exists.
    #[serde(default)]
    pub masked_images: Vec<Option<String>>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_image_wire_format() {
        let message = Message::LoadImage(
            LoadImage::new(TargetId::inpaint_img()).with_local_path("/tmp/mask.png"),
        );

        let json = serde_json::to_string(&message).expect("serialize");
        assert!(json.contains("\"action\":\"load-image\""));
        assert!(json.contains("\"target\":\"inpaint_img\""));
        assert!(json.contains("\"localPath\":\"/tmp/mask.png\""));
        // Absent optionals stay off the wire.
        assert!(!json.contains("url"));
        assert!(!json.contains("newDocument"));
    }

    #[test]
    fn test_load_image_parse() {
        let json = r#"{
            "action": "load-image",
            "target": "editor",
            "url": "http://127.0.0.1:7860/file=out/a.png",
            "localPath": "out/a.png",
            "newDocument": true
        }"#;

        let message: Message = serde_json::from_str(json).expect("parse");
        let payload = message.as_load_image().expect("load-image");
        assert!(payload.target.is_editor());
        assert!(payload.wants_new_document());
        assert_eq!(payload.local_path.as_deref(), Some("out/a.png"));
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let json = r#"{"action": "self-destruct", "target": "img2img"}"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }

    #[test]
    fn test_source_prefers_url() {
        let payload = LoadImage::new(TargetId::img2img())
            .with_url("http://x/a.png")
            .with_local_path("/tmp/a.png");

        match payload.source().expect("source") {
            ImageSource::Url(url) => assert_eq!(url, "http://x/a.png"),
            ImageSource::LocalPath(_) => panic!("url should win"),
        }
    }

    #[test]
    fn test_source_falls_back_to_local_path() {
        let payload = LoadImage::new(TargetId::img2img()).with_local_path("/tmp/a.png");

        match payload.source().expect("source") {
            ImageSource::LocalPath(path) => assert_eq!(path, PathBuf::from("/tmp/a.png")),
            ImageSource::Url(_) => panic!("no url present"),
        }
    }

    #[test]
    fn test_source_with_neither_is_protocol_error() {
        let payload = LoadImage::new(TargetId::img2img());
        let err = payload.source().unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_to_editor_carries_both_paths() {
        let payload = LoadImage::to_editor("http://x/a.png", "out/a.png", false);
        assert!(payload.url.is_some());
        assert!(payload.local_path.is_some());
        assert!(!payload.wants_new_document());
    }

    #[test]
    fn test_rendered_images_round_trip() {
        let message = Message::RenderedImages(RenderedImages {
            images: vec!["out/a.png".into(), "out/b.png".into()],
            masked_images: vec![Some("/tmp/a-mask.png".into()), None],
        });

        let json = serde_json::to_string(&message).expect("serialize");
        assert!(json.contains("\"action\":\"rendered-images\""));
        assert!(json.contains("\"masked_images\""));
        assert!(json.contains("null"));

        let parsed: Message = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_rendered_images_wire_field_names() {
        // Exact frame shape the web-UI peer emits after an inpaint batch.
        let json = r#"{
            "action": "rendered-images",
            "images": ["out/a.png"],
            "masked_images": ["/tmp/a-mask.png"]
        }"#;

        let message: Message = serde_json::from_str(json).expect("parse");
        let Message::RenderedImages(batch) = message else {
            panic!("wrong variant");
        };
        assert_eq!(batch.images, vec!["out/a.png".to_string()]);
        assert_eq!(
            batch.masked_images,
            vec![Some("/tmp/a-mask.png".to_string())]
        );
    }
}

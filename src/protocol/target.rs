//! Target identifiers and UI contexts.
//!
//! A [`TargetId`] is an opaque string naming the destination slot for an
//! incoming image. Each peer recognizes its own set of targets and silently
//! ignores messages addressed to any other peer's targets.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Number of controlnet unit slots on the web-app side.
pub const CONTROLNET_UNITS: u8 = 4;

// ============================================================================
// TargetId
// ============================================================================

/// Opaque destination identifier for an incoming image.
///
/// Known web-app targets: `img2img`, `inpaint`, `inpaint_img`,
/// `inpaint_mask`, `controlnet0..3`. The editor recognizes `editor`.
/// Unknown values still deserialize; the recognized-set check happens at
/// routing time, not at parse time, so messages meant for another peer
/// pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Creates a target from an arbitrary string.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The img2img source image slot.
    #[inline]
    #[must_use]
    pub fn img2img() -> Self {
        Self("img2img".into())
    }

    /// The combined inpaint canvas (image with mask painted on top).
    #[inline]
    #[must_use]
    pub fn inpaint() -> Self {
        Self("inpaint".into())
    }

    /// The inpaint base image slot (separate-mask mode).
    #[inline]
    #[must_use]
    pub fn inpaint_img() -> Self {
        Self("inpaint_img".into())
    }

    /// The inpaint mask slot (separate-mask mode).
    #[inline]
    #[must_use]
    pub fn inpaint_mask() -> Self {
        Self("inpaint_mask".into())
    }

    /// A controlnet unit slot (`controlnet0` through `controlnet3`).
    ///
    /// Returns `None` when `unit` is out of range.
    #[must_use]
    pub fn controlnet(unit: u8) -> Option<Self> {
        (unit < CONTROLNET_UNITS).then(|| Self(format!("controlnet{unit}")))
    }

    /// The editor peer's single import target.
    #[inline]
    #[must_use]
    pub fn editor() -> Self {
        Self("editor".into())
    }

    /// Returns the target name.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the full set of targets the web-app peer recognizes.
    #[must_use]
    pub fn web_targets() -> Vec<Self> {
        let mut targets = vec![
            Self::img2img(),
            Self::inpaint(),
            Self::inpaint_img(),
            Self::inpaint_mask(),
        ];
        for unit in 0..CONTROLNET_UNITS {
            targets.push(Self(format!("controlnet{unit}")));
        }
        targets
    }

    /// Returns `true` if this is the editor peer's target.
    #[inline]
    #[must_use]
    pub fn is_editor(&self) -> bool {
        self.0 == "editor"
    }

    /// Returns the UI context this target requires, if it has a preference.
    ///
    /// The img2img and inpaint slots only exist inside the img2img mode.
    /// Controlnet units exist in every mode, so they carry no preference
    /// and the current context is kept.
    #[must_use]
    pub fn required_context(&self) -> Option<UiContext> {
        match self.0.as_str() {
            "img2img" | "inpaint" | "inpaint_img" | "inpaint_mask" => Some(UiContext::Img2Img),
            _ => None,
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

// ============================================================================
// UiContext
// ============================================================================

/// Top-level UI mode on the web-app side.
///
/// Certain targets can only be hosted by a specific mode; the router
/// switches modes before injecting when the current one is incompatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiContext {
    /// Text-to-image mode (the default mode after startup).
    #[default]
    Txt2Img,
    /// Image-to-image mode, hosting the img2img and inpaint slots.
    Img2Img,
}

// ============================================================================
// Tests
// ============================================================================

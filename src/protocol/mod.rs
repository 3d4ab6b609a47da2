//! Wire protocol message types.
//!
//! This module defines the JSON frames exchanged between the two peers
//! (web app and editor) through the relay.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `load-image` | either → either | route an image into a named UI slot |
//! | `rendered-images` | web app → editor | announce a finished render batch |
//!
//! Frames are JSON text, discriminated by the `action` field. The relay
//! forwards every frame to all other connected peers; each peer keeps
//! only the messages whose `target` it recognizes.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Frame and payload types |
//! | `target` | Target identifiers and UI contexts |

// ============================================================================
// Submodules
// ============================================================================

/// Frame and payload types.
pub mod message;

/// Target identifiers and UI contexts.
pub mod target;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{ImageSource, LoadImage, Message, RenderedImages};
pub use target::{CONTROLNET_UNITS, TargetId, UiContext};

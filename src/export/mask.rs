//! Inpaint mask rendering.
//!
//! The mask convention is: white marks the region to repaint, black is
//! kept. Users paint the mask region in black on a dedicated layer; the
//! export inverts the colors and flattens them onto a black canvas, so
//! painted strokes come out white and untouched transparency comes out
//! black.

// ============================================================================
// Imports
// ============================================================================

use image::{Rgba, RgbaImage};

// ============================================================================
// Pixels
// ============================================================================

/// Opaque black.
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Opaque white.
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

// ============================================================================
// Functions
// ============================================================================

/// Inverts the color channels in place, preserving alpha.
pub fn invert_colors(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        pixel[0] = 255 - pixel[0];
        pixel[1] = 255 - pixel[1];
        pixel[2] = 255 - pixel[2];
    }
}

/// Builds the inpaint mask from a standalone layer rendering.
///
/// The layer must be rendered with opacity and fill reset to fully
/// opaque, so the alpha channel reflects only what was actually painted.
/// Colors are inverted and composited onto a black canvas: black strokes
/// become white, transparent regions stay black. The output is fully
/// opaque.
///
/// A layer with nothing painted on it yields an all-white mask; an empty
/// mask selects the whole image.
#[must_use]
pub fn inpaint_mask(layer: &RgbaImage) -> RgbaImage {
    let (width, height) = layer.dimensions();

    if layer.pixels().all(|pixel| pixel[3] == 0) {
        return RgbaImage::from_pixel(width, height, WHITE);
    }

    let mut inverted = layer.clone();
    invert_colors(&mut inverted);

    let mut mask = RgbaImage::from_pixel(width, height, BLACK);
    for (x, y, pixel) in inverted.enumerate_pixels() {
        let alpha = u32::from(pixel[3]);
        if alpha == 0 {
            continue;
        }
        // Inverted color, alpha-weighted over the black canvas.
        let blend = |channel: u8| (u32::from(channel) * alpha / 255) as u8;
        mask.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    mask
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Transparent canvas with an opaque black circle painted on it.
    fn black_circle_layer(size: u32, radius: u32) -> RgbaImage {
        let mut layer = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 0]));
        let center = (size / 2) as i64;
        for (x, y, pixel) in layer.enumerate_pixels_mut() {
            let dx = i64::from(x) - center;
            let dy = i64::from(y) - center;
            if dx * dx + dy * dy <= i64::from(radius * radius) {
                *pixel = BLACK;
            }
        }
        layer
    }

    #[test]
    fn test_double_inversion_is_identity() {
        let mut image = RgbaImage::from_fn(16, 16, |x, y| {
            Rgba([(x * 16) as u8, (y * 16) as u8, 200, 255])
        });
        let original = image.clone();

        invert_colors(&mut image);
        assert_ne!(image, original);
        invert_colors(&mut image);
        assert_eq!(image, original);
    }

    #[test]
    fn test_inversion_preserves_alpha() {
        let mut image = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 77]));
        invert_colors(&mut image);
        assert_eq!(*image.get_pixel(0, 0), Rgba([245, 235, 225, 77]));
    }

    #[test]
    fn test_empty_layer_yields_all_white_mask() {
        let layer = RgbaImage::from_pixel(32, 32, Rgba([0, 0, 0, 0]));
        let mask = inpaint_mask(&layer);
        assert!(mask.pixels().all(|pixel| *pixel == WHITE));
    }

    #[test]
    fn test_black_circle_becomes_white_on_black() {
        let size = 64;
        let radius = 20;
        let mask = inpaint_mask(&black_circle_layer(size, radius));

        // Inside the circle: painted black, inverted to white.
        assert_eq!(*mask.get_pixel(size / 2, size / 2), WHITE);
        // Outside the circle: transparent, stays black.
        assert_eq!(*mask.get_pixel(0, 0), BLACK);
        assert_eq!(*mask.get_pixel(size - 1, size - 1), BLACK);
        // The mask itself is fully opaque.
        assert!(mask.pixels().all(|pixel| pixel[3] == 255));
    }

    #[test]
    fn test_fully_painted_layer_is_fully_selected() {
        let layer = RgbaImage::from_pixel(8, 8, BLACK);
        let mask = inpaint_mask(&layer);
        assert!(mask.pixels().all(|pixel| *pixel == WHITE));
    }

    #[test]
    fn test_partial_alpha_scales_toward_black() {
        let layer = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 128]));
        let mask = inpaint_mask(&layer);
        let pixel = mask.get_pixel(0, 0);
        // Half-covered black paint lands at half white.
        assert_eq!(pixel[0], 128);
        assert_eq!(pixel[3], 255);
    }
}

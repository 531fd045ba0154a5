// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image normalization: downscale cap, denoise, adaptive binarization.
//!
//! Downscaling re-derives the scale factor so every real-world length and
//! area computed downstream stays correct. Binarization is local (adaptive)
//! so line-weight variation across a sheet does not erase faint strokes.

use crate::error::DetectionError;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use tracing::debug;

/// Maximum working dimension; larger images are downscaled proportionally.
pub const MAX_DIMENSION: u32 = 3000;

/// Smallest image the pipeline accepts.
pub const MIN_DIMENSION: u32 = 32;

/// Normalized input for the rest of the pipeline.
#[derive(Debug)]
pub struct Preprocessed {
    /// Denoised grayscale working image.
    pub gray: GrayImage,
    /// Binarized working image after denoising: stroke pixels 255,
    /// background 0. The blur smooths hatching and can bridge small gaps,
    /// which is what the wall-mask morphology wants.
    pub binary: GrayImage,
    /// Crisp binarization of the un-denoised image. Dash gaps and stipple
    /// survive here, so filters that measure stroke continuity sample this
    /// map rather than `binary`.
    pub strokes: GrayImage,
    /// Real-world units per working-image pixel.
    pub scale_factor: f64,
    /// Original pixels per working pixel (>= 1).
    pub downscale: f64,
    /// Original image dimensions, before any resize.
    pub original_width: u32,
    pub original_height: u32,
}

impl Preprocessed {
    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }

    /// Pixel length of a real-world length at working resolution.
    pub fn to_pixels(&self, real_world: f64) -> f64 {
        real_world / self.scale_factor
    }
}

/// Run the preprocessor. Fails fast on undersized images or a bad scale
/// factor; everything downstream can assume a usable working image.
pub fn preprocess(
    image: &DynamicImage,
    scale_factor: f64,
) -> Result<Preprocessed, DetectionError> {
    if !(scale_factor.is_finite() && scale_factor > 0.0) {
        return Err(DetectionError::InvalidScaleFactor(scale_factor));
    }

    let original_width = image.width();
    let original_height = image.height();
    if original_width < MIN_DIMENSION || original_height < MIN_DIMENSION {
        return Err(DetectionError::ImageTooSmall {
            width: original_width,
            height: original_height,
            min: MIN_DIMENSION,
        });
    }

    let gray = image.to_luma8();

    // Downscale proportionally when over the cap; the scale factor grows by
    // the same ratio so lengths in real-world units are preserved.
    let max_dim = original_width.max(original_height);
    let (gray, downscale) = if max_dim > MAX_DIMENSION {
        let ratio = max_dim as f64 / MAX_DIMENSION as f64;
        let new_w = ((original_width as f64 / ratio).round() as u32).max(1);
        let new_h = ((original_height as f64 / ratio).round() as u32).max(1);
        debug!(
            original_width,
            original_height, new_w, new_h, "downscaling working image"
        );
        (
            imageops::resize(&gray, new_w, new_h, FilterType::Triangle),
            ratio,
        )
    } else {
        (gray, 1.0)
    };

    let working_scale = scale_factor * downscale;

    // Crisp strokes come from the raw working image, before the blur gets a
    // chance to smear dash gaps shut.
    let strokes = binarize(&gray);

    // Light gaussian denoise preserves stroke edges better than a box blur
    // at these kernel sizes.
    let denoised = imageproc::filter::gaussian_blur_f32(&gray, 1.0);
    let binary = binarize(&denoised);

    Ok(Preprocessed {
        gray: denoised,
        binary,
        strokes,
        scale_factor: working_scale,
        downscale,
        original_width,
        original_height,
    })
}

/// Local thresholding, inverted so strokes (dark ink) become foreground
/// (255).
fn binarize(gray: &GrayImage) -> GrayImage {
    let mut binary = imageproc::contrast::adaptive_threshold(gray, 12);
    for pixel in binary.pixels_mut() {
        pixel.0[0] = 255 - pixel.0[0];
    }
    binary
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn white_image(width: u32, height: u32) -> DynamicImage {
        let mut img = GrayImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = Luma([255]);
        }
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_rejects_tiny_image() {
        let img = white_image(16, 16);
        let err = preprocess(&img, 0.1).unwrap_err();
        assert!(matches!(err, DetectionError::ImageTooSmall { .. }));
    }

    #[test]
    fn test_rejects_bad_scale_factor() {
        let img = white_image(100, 100);
        assert!(matches!(
            preprocess(&img, 0.0),
            Err(DetectionError::InvalidScaleFactor(_))
        ));
        assert!(matches!(
            preprocess(&img, f64::NAN),
            Err(DetectionError::InvalidScaleFactor(_))
        ));
    }

    #[test]
    fn test_no_resize_below_cap() {
        let img = white_image(200, 100);
        let pre = preprocess(&img, 0.05).unwrap();
        assert_eq!(pre.width(), 200);
        assert_eq!(pre.height(), 100);
        assert!((pre.downscale - 1.0).abs() < 1e-12);
        assert!((pre.scale_factor - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_downscale_preserves_real_world_lengths() {
        let img = white_image(6000, 3000);
        let pre = preprocess(&img, 0.05).unwrap();
        assert_eq!(pre.width(), 3000);
        assert_eq!(pre.height(), 1500);
        assert!((pre.downscale - 2.0).abs() < 1e-9);
        // A 100 ft span was 2000 original pixels; now 1000 working pixels
        // at 0.1 ft/px -> still 100 ft.
        assert!((pre.to_pixels(100.0) - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_binarization_marks_strokes_as_foreground() {
        let mut img = GrayImage::new(100, 100);
        for pixel in img.pixels_mut() {
            *pixel = Luma([255]);
        }
        for x in 10..90 {
            for y in 48..52 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let pre = preprocess(&DynamicImage::ImageLuma8(img), 0.1).unwrap();
        assert!(pre.binary.get_pixel(50, 50).0[0] > 128);
        assert!(pre.binary.get_pixel(50, 10).0[0] < 128);
    }

    #[test]
    fn test_strokes_preserve_dash_gaps() {
        // Dashed line: 6 px on, 14 px off, 3 px thick.
        let mut img = GrayImage::new(200, 200);
        for pixel in img.pixels_mut() {
            *pixel = Luma([255]);
        }
        let mut x = 20;
        while x + 6 <= 180 {
            for dx in 0..6 {
                for y in 99..102 {
                    img.put_pixel(x + dx, y, Luma([0]));
                }
            }
            x += 20;
        }
        let pre = preprocess(&DynamicImage::ImageLuma8(img), 0.1).unwrap();
        // Dash ink is foreground, the middle of each gap stays background.
        assert!(pre.strokes.get_pixel(22, 100).0[0] > 0);
        assert_eq!(pre.strokes.get_pixel(33, 100).0[0], 0);
    }
}

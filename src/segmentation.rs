// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Learned segmentation path.
//!
//! A [`SegmentationModel`] turns the working grayscale image into wall and
//! room probability maps. Post-processing converts those into the binary
//! masks the rest of the pipeline consumes. Any model failure is
//! recoverable: the caller falls back to the morphological mask path.

use crate::error::SegmentationError;
use crate::types::DetectionOptions;
use image::GrayImage;

/// Per-pixel probability maps at working-image size, 0..=255.
pub struct SegmentationMaps {
    pub wall: GrayImage,
    pub room: GrayImage,
}

/// A wall/room segmentation backend.
///
/// Implementations must be thread safe; the pipeline holds the model
/// behind an `Arc` and may serve requests concurrently.
pub trait SegmentationModel: Send + Sync {
    /// Produce probability maps matching `gray`'s dimensions exactly.
    fn segment(&self, gray: &GrayImage) -> Result<SegmentationMaps, SegmentationError>;
}

const PROB_THRESHOLD: u8 = 128;

/// Edge pixels within this radius of thresholded wall probability are
/// absorbed into the wall mask, sharpening the model's soft boundaries.
const EDGE_ABSORB_RADIUS: i32 = 2;

/// Room components above this fraction of the image are background, not
/// rooms.
const MAX_COMPONENT_FRACTION: f64 = 0.5;

/// Convert probability maps into binary wall and room masks.
///
/// Wall mask: thresholded wall probability, unioned with raw edge pixels
/// adjacent to it. Room mask: thresholded room probability minus wall
/// pixels. Both have titleblock/margin exclusion zones cleared, and the
/// room mask drops oversized components.
pub fn postprocess_masks(
    maps: &SegmentationMaps,
    edges: &GrayImage,
    options: &DetectionOptions,
) -> Result<(GrayImage, GrayImage), SegmentationError> {
    let width = edges.width();
    let height = edges.height();
    if maps.wall.dimensions() != (width, height) || maps.room.dimensions() != (width, height) {
        return Err(SegmentationError::BadOutput(format!(
            "probability maps {:?}/{:?} do not match working image {}x{}",
            maps.wall.dimensions(),
            maps.room.dimensions(),
            width,
            height
        )));
    }

    let mut wall = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let prob_hit = maps.wall.get_pixel(x, y).0[0] >= PROB_THRESHOLD;
            let edge_hit = edges.get_pixel(x, y).0[0] > 128
                && crate::segments::probe(&maps.wall, x as f64, y as f64, EDGE_ABSORB_RADIUS);
            if prob_hit || edge_hit {
                wall.put_pixel(x, y, image::Luma([255]));
            }
        }
    }

    let mut room = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            if maps.room.get_pixel(x, y).0[0] >= PROB_THRESHOLD && wall.get_pixel(x, y).0[0] == 0 {
                room.put_pixel(x, y, image::Luma([255]));
            }
        }
    }

    clear_exclusion_zones(&mut wall, options);
    clear_exclusion_zones(&mut room, options);
    drop_oversized_components(&mut room);

    Ok((wall, room))
}

/// Zero every pixel outside the keep band (titleblocks, margins, legends).
fn clear_exclusion_zones(mask: &mut GrayImage, options: &DetectionOptions) {
    let width = mask.width();
    let height = mask.height();
    let x0 = (options.exclusion_left * width as f64) as u32;
    let x1 = (options.exclusion_right * width as f64) as u32;
    let y0 = (options.exclusion_top * height as f64) as u32;
    let y1 = (options.exclusion_bottom * height as f64) as u32;

    for y in 0..height {
        for x in 0..width {
            if x < x0 || x > x1 || y < y0 || y > y1 {
                mask.put_pixel(x, y, image::Luma([0]));
            }
        }
    }
}

fn drop_oversized_components(mask: &mut GrayImage) {
    let width = mask.width();
    let height = mask.height();
    let limit = (width as f64 * height as f64 * MAX_COMPONENT_FRACTION) as usize;

    let mut inverted = mask.clone();
    for pixel in inverted.pixels_mut() {
        pixel.0[0] = 255 - pixel.0[0];
    }

    let mut visited = vec![false; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if visited[idx] || mask.get_pixel(x, y).0[0] == 0 {
                visited[idx] = true;
                continue;
            }
            let region = crate::rooms::grow_region(&inverted, (x, y));
            for (seen, member) in visited.iter_mut().zip(region.members.iter()) {
                if *member {
                    *seen = true;
                }
            }
            if region.pixel_area > limit {
                for (i, member) in region.members.iter().enumerate() {
                    if *member {
                        mask.put_pixel(i as u32 % width, i as u32 / width, image::Luma([0]));
                    }
                }
            }
        }
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxSegmentationModel;

#[cfg(feature = "onnx")]
mod onnx {
    use super::{SegmentationMaps, SegmentationModel};
    use crate::error::SegmentationError;
    use image::imageops::{self, FilterType};
    use image::GrayImage;
    use ndarray::Array4;
    use ort::session::Session;
    use ort::value::TensorRef;
    use std::path::Path;
    use std::sync::Mutex;
    use tracing::{debug, info};

    /// Fixed square model input; the working image is resized in and the
    /// probability maps resized back out.
    const INPUT_SIZE: u32 = 512;

    /// ONNX-backed wall/room segmentation.
    ///
    /// Expected model contract: input `[1, 1, H, W]` grayscale in 0..1,
    /// one output `[1, C, H, W]` with C >= 3, channel 1 = wall logits and
    /// channels 2.. = per-class room logits.
    pub struct OnnxSegmentationModel {
        // Session::run needs &mut self; the trait takes &self.
        session: Mutex<Session>,
    }

    impl OnnxSegmentationModel {
        pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self, SegmentationError> {
            let model_path = model_path.as_ref();
            info!(path = %model_path.display(), "loading segmentation model");
            let session = Session::builder()
                .map_err(|e| SegmentationError::ModelUnavailable(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| SegmentationError::ModelUnavailable(e.to_string()))?;
            Ok(Self {
                session: Mutex::new(session),
            })
        }
    }

    impl SegmentationModel for OnnxSegmentationModel {
        fn segment(&self, gray: &GrayImage) -> Result<SegmentationMaps, SegmentationError> {
            let (width, height) = gray.dimensions();
            let resized = imageops::resize(gray, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

            let mut input = Array4::<f32>::zeros((1, 1, INPUT_SIZE as usize, INPUT_SIZE as usize));
            for (x, y, pixel) in resized.enumerate_pixels() {
                input[[0, 0, y as usize, x as usize]] = pixel.0[0] as f32 / 255.0;
            }

            let mut session = self
                .session
                .lock()
                .map_err(|_| SegmentationError::InferenceFailed("session lock poisoned".into()))?;
            let input_tensor = TensorRef::from_array_view(input.view())
                .map_err(|e| SegmentationError::InferenceFailed(e.to_string()))?;
            let outputs = session
                .run(ort::inputs![input_tensor])
                .map_err(|e| SegmentationError::InferenceFailed(e.to_string()))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| SegmentationError::BadOutput(e.to_string()))?;
            if shape.len() != 4 || shape[0] != 1 || shape[1] < 3 {
                return Err(SegmentationError::BadOutput(format!(
                    "expected [1, C>=3, H, W], got {shape:?}"
                )));
            }
            let channels = shape[1] as usize;
            let oh = shape[2] as usize;
            let ow = shape[3] as usize;
            if data.len() != channels * oh * ow {
                return Err(SegmentationError::BadOutput(format!(
                    "tensor length {} does not match shape {shape:?}",
                    data.len()
                )));
            }

            // Channel 1 is walls; rooms take the max over the remaining
            // class channels. Sigmoid squashes logits into 0..1.
            let plane = oh * ow;
            let mut wall = GrayImage::new(ow as u32, oh as u32);
            let mut room = GrayImage::new(ow as u32, oh as u32);
            for i in 0..plane {
                let wall_p = sigmoid(data[plane + i]);
                let mut room_p = 0.0f32;
                for c in 2..channels {
                    room_p = room_p.max(sigmoid(data[c * plane + i]));
                }
                let x = (i % ow) as u32;
                let y = (i / ow) as u32;
                wall.put_pixel(x, y, image::Luma([(wall_p * 255.0) as u8]));
                room.put_pixel(x, y, image::Luma([(room_p * 255.0) as u8]));
            }

            debug!(channels, ow, oh, "segmentation inference complete");
            Ok(SegmentationMaps {
                wall: imageops::resize(&wall, width, height, FilterType::Triangle),
                room: imageops::resize(&room, width, height, FilterType::Triangle),
            })
        }
    }

    fn sigmoid(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn fill_rect(img: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, value: u8) {
        for y in y0..y1 {
            for x in x0..x1 {
                img.put_pixel(x, y, Luma([value]));
            }
        }
    }

    #[test]
    fn test_postprocess_rejects_mismatched_maps() {
        let maps = SegmentationMaps {
            wall: GrayImage::new(100, 100),
            room: GrayImage::new(100, 100),
        };
        let edges = GrayImage::new(120, 100);
        let result = postprocess_masks(&maps, &edges, &DetectionOptions::default());
        assert!(matches!(result, Err(SegmentationError::BadOutput(_))));
    }

    #[test]
    fn test_room_mask_excludes_wall_pixels() {
        let mut wall = GrayImage::new(200, 200);
        let mut room = GrayImage::new(200, 200);
        fill_rect(&mut wall, 100, 40, 104, 160, 255);
        // Room probability deliberately overlaps the wall band.
        fill_rect(&mut room, 60, 60, 140, 140, 255);
        let maps = SegmentationMaps { wall, room };
        let edges = GrayImage::new(200, 200);

        let (wall_mask, room_mask) =
            postprocess_masks(&maps, &edges, &DetectionOptions::default()).unwrap();

        assert_eq!(wall_mask.get_pixel(102, 100).0[0], 255);
        assert_eq!(room_mask.get_pixel(102, 100).0[0], 0, "wall wins overlap");
        assert_eq!(room_mask.get_pixel(80, 100).0[0], 255);
    }

    #[test]
    fn test_edge_pixels_absorbed_near_wall_probability() {
        let mut wall = GrayImage::new(200, 200);
        fill_rect(&mut wall, 100, 40, 104, 160, 255);
        let room = GrayImage::new(200, 200);
        let maps = SegmentationMaps { wall, room };

        let mut edges = GrayImage::new(200, 200);
        // One edge pixel hugging the wall band, one far away.
        edges.put_pixel(105, 100, Luma([255]));
        edges.put_pixel(30, 100, Luma([255]));

        let (wall_mask, _) =
            postprocess_masks(&maps, &edges, &DetectionOptions::default()).unwrap();

        assert_eq!(wall_mask.get_pixel(105, 100).0[0], 255, "adjacent edge absorbed");
        assert_eq!(wall_mask.get_pixel(30, 100).0[0], 0, "distant edge ignored");
    }

    #[test]
    fn test_exclusion_zones_cleared() {
        let mut wall = GrayImage::new(200, 200);
        // Entirely inside the right-margin exclusion zone (x > 0.85).
        fill_rect(&mut wall, 180, 50, 195, 150, 255);
        let room = GrayImage::new(200, 200);
        let maps = SegmentationMaps { wall, room };
        let edges = GrayImage::new(200, 200);

        let (wall_mask, _) =
            postprocess_masks(&maps, &edges, &DetectionOptions::default()).unwrap();

        assert_eq!(wall_mask.get_pixel(185, 100).0[0], 0);
    }

    #[test]
    fn test_oversized_room_component_dropped() {
        let wall = GrayImage::new(200, 200);
        let mut room = GrayImage::new(200, 200);
        // Covers well over half the image after exclusion clearing.
        fill_rect(&mut room, 22, 22, 168, 178, 255);
        let maps = SegmentationMaps { wall, room };
        let edges = GrayImage::new(200, 200);

        let (_, room_mask) =
            postprocess_masks(&maps, &edges, &DetectionOptions::default()).unwrap();

        assert_eq!(room_mask.get_pixel(100, 100).0[0], 0);
    }
}

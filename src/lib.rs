// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Floor plan geometry detection from rasterized construction drawings.
//!
//! The pipeline turns a drawing image plus externally recognized text into
//! rooms, walls, doors and windows:
//! 1. Preprocessing (downscale cap, denoise, adaptive binarization)
//! 2. Wall-likelihood mask (directional morphology, or a learned
//!    segmentation model when one is attached)
//! 3. Line segment extraction (Hough) and the wall-candidate filter chain
//! 4. Planar wall graph with confidence-scored edges
//! 5. Room extraction (text-seeded flood fill, with a geometric fallback)
//! 6. Validation and classification
//! 7. Iterative refinement (gap repair, spurious-edge removal)
//! 8. Opening detection (doors and windows)
//!
//! # Usage
//!
//! ```rust,ignore
//! use floorplan_vision::{DetectionOptions, Pipeline};
//!
//! let pipeline = Pipeline::new();
//! let result = pipeline.detect_from_bytes(
//!     &image_bytes,
//!     &recognized_text,
//!     0.05, // real-world units per pixel
//!     &DetectionOptions::default(),
//! )?;
//! println!("{} rooms, {} walls", result.rooms.len(), result.walls.len());
//! ```

pub mod error;
pub mod graph;
pub mod openings;
pub mod preprocess;
pub mod refine;
pub mod rooms;
pub mod segmentation;
pub mod segments;
pub mod types;
pub mod validate;
pub mod wall_mask;

pub use error::{DetectionError, SegmentationError};
pub use refine::RefinementReport;
#[cfg(feature = "onnx")]
pub use segmentation::OnnxSegmentationModel;
pub use segmentation::{SegmentationMaps, SegmentationModel};
pub use types::{
    DetectionOptions, DetectionResult, Opening, OpeningKind, Room, RoomStatus, RoomType,
    TextElement, TextKind, WallSegment,
};

use image::{DynamicImage, GrayImage};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use types::{Point2D, RoomCandidate};

/// Largest in-line break, in working pixels, the Hough extractor tolerates
/// inside one segment; collinear merging re-joins fragments separated by up
/// to twice this.
const MAX_SEGMENT_GAP: f64 = 5.0;

/// Detection pipeline. Stateless apart from an optional segmentation
/// model; one instance serves any number of requests.
#[derive(Default)]
pub struct Pipeline {
    model: Option<Arc<dyn SegmentationModel>>,
}

impl Pipeline {
    /// Pipeline using the classical morphological wall mask.
    pub fn new() -> Self {
        Self { model: None }
    }

    /// Pipeline preferring a learned segmentation model. Model failures
    /// degrade to the morphological path at request time.
    pub fn with_model(model: Arc<dyn SegmentationModel>) -> Self {
        Self { model: Some(model) }
    }

    /// Decode an image from raw bytes (PNG/JPEG) and run detection.
    pub fn detect_from_bytes(
        &self,
        bytes: &[u8],
        text: &[TextElement],
        scale_factor: f64,
        options: &DetectionOptions,
    ) -> Result<DetectionResult, DetectionError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| DetectionError::UndecodableImage(e.to_string()))?;
        self.detect(&image, text, scale_factor, options)
    }

    /// Run the full detection pipeline on a decoded image.
    ///
    /// `text` is read-only collaborator input: room labels seed room
    /// extraction, dimension text feeds the filter chain. `scale_factor`
    /// is real-world units per pixel of the original image.
    pub fn detect(
        &self,
        image: &DynamicImage,
        text: &[TextElement],
        scale_factor: f64,
        options: &DetectionOptions,
    ) -> Result<DetectionResult, DetectionError> {
        options
            .validate()
            .map_err(DetectionError::InvalidOptions)?;
        let started = Instant::now();

        let pre = preprocess::preprocess(image, scale_factor)?;
        let width = pre.width();
        let height = pre.height();
        let scale = pre.scale_factor;
        let min_wall_px = pre.to_pixels(options.min_wall_length);

        let edges =
            imageproc::edges::canny(&pre.gray, options.edge_threshold1, options.edge_threshold2);

        // Wall-likelihood mask: learned when a model is attached and
        // succeeds, directional morphology otherwise.
        let (wall_likelihood, learned_rooms) = self.wall_likelihood(&pre, &edges, min_wall_px, options);

        // Lines and the wall-candidate filter chain.
        let text_mask = segments::build_text_mask(text, width, height, 4.0);
        let hough_threshold = (min_wall_px * 0.8).max(20.0) as u32;
        let raw =
            segments::detect_segments(&wall_likelihood, hough_threshold, min_wall_px, MAX_SEGMENT_GAP);
        let snapped = segments::snap_to_axes(&raw, 0.05);
        let merged = segments::merge_collinear(
            &snapped,
            0.1,
            options.snap_tolerance,
            2.0 * MAX_SEGMENT_GAP,
        );
        let filtered =
            segments::filter_segments(merged, &pre.strokes, &text_mask, min_wall_px, options);

        let mut graph =
            graph::build_wall_graph(&filtered, &wall_likelihood, min_wall_px, scale, options);

        // Rooms: learned component path, text-seeded flood fill, geometric
        // fallback only when seeding produced nothing.
        let rendered = rooms::render_wall_mask(&graph, width, height, scale);
        let mut candidates = match &learned_rooms {
            Some(room_mask) => {
                let learned = rooms::extract_rooms_from_mask(room_mask, text, scale, options);
                if learned.is_empty() {
                    rooms::extract_rooms_seeded(&rendered, text, scale, options)
                } else {
                    learned
                }
            }
            None => rooms::extract_rooms_seeded(&rendered, text, scale, options),
        };
        if candidates.is_empty() {
            candidates = rooms::extract_rooms_geometric(
                &pre.binary,
                &rendered,
                &text_mask,
                graph.edges.len(),
                scale,
                options,
            );
        }

        validate::validate_rooms(&mut candidates, &rendered, options);
        let report = refine::refine(&mut graph, &mut candidates, width, height, scale, options);
        debug!(?report, "refinement complete");

        let (doors, windows) = openings::detect_openings(&edges, scale, options.contour_epsilon);

        let result = DetectionResult {
            rooms: finalize_rooms(&candidates, width, height),
            walls: finalize_walls(&graph, width, height, scale),
            doors,
            windows,
            image_width: pre.original_width,
            image_height: pre.original_height,
            processing_time: started.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            rooms = result.rooms.len(),
            walls = result.walls.len(),
            doors = result.doors.len(),
            windows = result.windows.len(),
            ms = result.processing_time,
            "detection complete"
        );
        Ok(result)
    }

    /// Produce the wall-likelihood mask and, when the learned path ran, a
    /// room mask for component extraction.
    fn wall_likelihood(
        &self,
        pre: &preprocess::Preprocessed,
        edges: &GrayImage,
        min_wall_px: f64,
        options: &DetectionOptions,
    ) -> (GrayImage, Option<GrayImage>) {
        if let Some(model) = &self.model {
            match model
                .segment(&pre.gray)
                .and_then(|maps| segmentation::postprocess_masks(&maps, edges, options))
            {
                Ok((wall, room)) => return (wall, Some(room)),
                Err(err) => {
                    warn!(%err, "segmentation failed, using morphological mask");
                }
            }
        }
        let element = (min_wall_px / 2.0).clamp(5.0, 25.0) as u32;
        (wall_mask::build_wall_mask(&pre.binary, element), None)
    }
}

/// One-shot detection without a learned model. Equivalent to
/// `Pipeline::new().detect(..)`.
pub fn detect_geometry(
    image: &DynamicImage,
    scale_factor: f64,
    options: &DetectionOptions,
    text: &[TextElement],
) -> Result<DetectionResult, DetectionError> {
    Pipeline::new().detect(image, text, scale_factor, options)
}

/// One-shot detection from encoded image bytes.
pub fn detect_geometry_from_bytes(
    bytes: &[u8],
    scale_factor: f64,
    options: &DetectionOptions,
    text: &[TextElement],
) -> Result<DetectionResult, DetectionError> {
    Pipeline::new().detect_from_bytes(bytes, text, scale_factor, options)
}

/// Project surviving candidates into the output contract, normalized to
/// the working image. Invalid regions are dropped; corridor-like regions
/// are kept with their discounted confidence.
fn finalize_rooms(candidates: &[RoomCandidate], width: u32, height: u32) -> Vec<Room> {
    let w = width as f64;
    let h = height as f64;
    candidates
        .iter()
        .filter(|c| c.status != RoomStatus::InvalidRegion)
        .map(|c| Room {
            points: c
                .polygon
                .iter()
                .map(|p| Point2D::new(p.x / w, p.y / h))
                .collect(),
            area: c.area,
            perimeter: c.perimeter,
            confidence: c.confidence,
            room_label: c.label_text.clone(),
            room_type: c.room_type,
        })
        .collect()
}

fn finalize_walls(
    graph: &graph::WallGraph,
    width: u32,
    height: u32,
    scale_factor: f64,
) -> Vec<WallSegment> {
    let w = width as f64;
    let h = height as f64;
    graph
        .edges
        .iter()
        .map(|edge| {
            let a = graph.nodes[edge.a].position;
            let b = graph.nodes[edge.b].position;
            WallSegment {
                start: Point2D::new(a.x / w, a.y / h),
                end: Point2D::new(b.x / w, b.y / h),
                length: graph.edge_length(edge) * scale_factor,
                confidence: edge.confidence,
                thickness: edge.thickness,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_drops_invalid_regions() {
        let mut good = RoomCandidate::from_polygon(
            vec![
                Point2D::new(10.0, 10.0),
                Point2D::new(90.0, 10.0),
                Point2D::new(90.0, 90.0),
                Point2D::new(10.0, 90.0),
            ],
            0.1,
        )
        .unwrap();
        good.status = RoomStatus::ValidEnclosedRoom;
        let bad = RoomCandidate::from_polygon(
            vec![
                Point2D::new(0.0, 0.0),
                Point2D::new(5.0, 0.0),
                Point2D::new(5.0, 5.0),
            ],
            0.1,
        )
        .unwrap();

        let rooms = finalize_rooms(&[good, bad], 100, 100);
        assert_eq!(rooms.len(), 1);
        for p in &rooms[0].points {
            assert!((0.0..=1.0).contains(&p.x));
            assert!((0.0..=1.0).contains(&p.y));
        }
    }

    #[test]
    fn test_finalize_walls_real_world_length() {
        use crate::graph::{Edge, Node, WallGraph};
        let graph = WallGraph {
            nodes: vec![
                Node {
                    position: Point2D::new(0.0, 50.0),
                },
                Node {
                    position: Point2D::new(200.0, 50.0),
                },
            ],
            edges: vec![Edge {
                a: 0,
                b: 1,
                confidence: 0.9,
                thickness: Some(0.5),
            }],
        };
        let walls = finalize_walls(&graph, 400, 100, 0.05);
        assert_eq!(walls.len(), 1);
        assert!((walls[0].length - 10.0).abs() < 1e-9);
        assert!((walls[0].start.x - 0.0).abs() < 1e-9);
        assert!((walls[0].end.x - 0.5).abs() < 1e-9);
    }
}

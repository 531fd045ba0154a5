// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Door/window opening detection.
//!
//! Single pass, independent of the wall graph: rectangular contours in the
//! raw edge map are classified by their real-world dimensions against
//! typical door and window size ranges. Confidence is fixed; openings are
//! never merged into the wall graph.

use crate::rooms::{grow_region, region_contour};
use crate::types::{
    polygon_bounds, BoundingBox, Opening, OpeningKind, OpeningSpan, Point2D,
};
use image::GrayImage;
use tracing::debug;

/// Typical door leaf widths (real-world length units).
const DOOR_WIDTH: (f64, f64) = (2.0, 4.0);
const DOOR_MIN_HEIGHT: f64 = 6.0;
/// Typical window widths.
const WINDOW_WIDTH: (f64, f64) = (1.0, 3.0);
const WINDOW_MAX_HEIGHT: f64 = 5.0;

const FIXED_CONFIDENCE: f32 = 0.7;

/// Minimum rectangle area in square units; smaller blobs are symbols.
const MIN_AREA: f64 = 1.0;

/// A contour must simplify to nearly a quadrilateral to count.
const MAX_VERTICES: usize = 6;

/// Fraction of the bounding box a rectangle's region must fill.
const MIN_FILL: f64 = 0.7;

/// Detect rectangular openings in the raw edge map.
///
/// Returns normalized geometry; classification that matches neither the
/// door nor the window ranges is dropped.
pub fn detect_openings(
    edges: &GrayImage,
    scale_factor: f64,
    contour_epsilon: f64,
) -> (Vec<Opening>, Vec<Opening>) {
    let width = edges.width();
    let height = edges.height();
    let mut doors = Vec::new();
    let mut windows = Vec::new();

    let mut visited = vec![false; (width * height) as usize];

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if visited[idx] || edges.get_pixel(x, y).0[0] > 128 {
                visited[idx] = true;
                continue;
            }

            let region = grow_region(edges, (x, y));
            for (seen, member) in visited.iter_mut().zip(region.members.iter()) {
                if *member {
                    *seen = true;
                }
            }

            // Enclosed interiors only; the outside component touches the
            // border.
            if region.touches_border || region.pixel_area < 4 {
                continue;
            }

            let area = region.pixel_area as f64 * scale_factor * scale_factor;
            if area < MIN_AREA {
                continue;
            }

            let contour = region_contour(&region, width, height, contour_epsilon.max(0.04));
            if contour.len() < 3 || contour.len() > MAX_VERTICES {
                continue;
            }

            let (min_x, min_y, max_x, max_y) = polygon_bounds(&contour);
            let bw_px = max_x - min_x;
            let bh_px = max_y - min_y;
            if bw_px < 1.0 || bh_px < 1.0 {
                continue;
            }
            // Rectangles fill their bounding box; L-shapes and blobs do not.
            let fill = region.pixel_area as f64 / (bw_px * bh_px);
            if fill < MIN_FILL {
                continue;
            }

            let bw = bw_px * scale_factor;
            let bh = bh_px * scale_factor;
            let narrow = bw.min(bh);
            let long = bw.max(bh);

            let kind = if narrow >= DOOR_WIDTH.0 && narrow <= DOOR_WIDTH.1 && long >= DOOR_MIN_HEIGHT
            {
                Some(OpeningKind::Door)
            } else if narrow >= WINDOW_WIDTH.0
                && narrow <= WINDOW_WIDTH.1
                && long <= WINDOW_MAX_HEIGHT
            {
                Some(OpeningKind::Window)
            } else {
                None
            };
            let Some(kind) = kind else { continue };

            let opening = make_opening(kind, min_x, min_y, max_x, max_y, width, height, long);
            match kind {
                OpeningKind::Door => doors.push(opening),
                OpeningKind::Window => windows.push(opening),
            }
        }
    }

    debug!(doors = doors.len(), windows = windows.len(), "openings detected");
    (doors, windows)
}

#[allow(clippy::too_many_arguments)]
fn make_opening(
    kind: OpeningKind,
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
    width: u32,
    height: u32,
    span_width: f64,
) -> Opening {
    let w = width as f64;
    let h = height as f64;
    let bbox = BoundingBox::new(
        min_x / w,
        min_y / h,
        (max_x - min_x) / w,
        (max_y - min_y) / h,
    );

    // Span across the long axis: midpoints of the two short sides.
    let (start, end) = if (max_x - min_x) >= (max_y - min_y) {
        let mid_y = (min_y + max_y) / 2.0 / h;
        (
            Point2D::new(min_x / w, mid_y),
            Point2D::new(max_x / w, mid_y),
        )
    } else {
        let mid_x = (min_x + max_x) / 2.0 / w;
        (
            Point2D::new(mid_x, min_y / h),
            Point2D::new(mid_x, max_y / h),
        )
    };

    Opening {
        kind,
        bbox,
        opening: OpeningSpan {
            start,
            end,
            width: span_width,
        },
        confidence: FIXED_CONFIDENCE,
    }
}

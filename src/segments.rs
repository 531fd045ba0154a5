// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Line segment extraction from the wall-likelihood mask and the filter
//! chain that removes non-wall artifacts: titleblock content, dimension
//! strings and dashed lines.

use crate::types::{BoundingBox, DetectionOptions, LineSegment, Point2D, TextElement, TextKind};
use image::{GrayImage, Luma};
use std::f64::consts::PI;
use tracing::debug;

/// Angular tolerance for "axis-aligned" checks in the filters (~10 deg).
const AXIS_TOLERANCE: f64 = 0.17;

/// Detect line segments in a binary mask using a probabilistic Hough
/// transform with gap handling.
pub fn detect_segments(
    mask: &GrayImage,
    threshold: u32,
    min_length: f64,
    max_gap: f64,
) -> Vec<LineSegment> {
    let width = mask.width() as i32;
    let height = mask.height() as i32;

    let theta_resolution = PI / 180.0;
    let num_thetas = (PI / theta_resolution) as usize;

    let mut cos_table = Vec::with_capacity(num_thetas);
    let mut sin_table = Vec::with_capacity(num_thetas);
    for i in 0..num_thetas {
        let theta = i as f64 * theta_resolution;
        cos_table.push(theta.cos());
        sin_table.push(theta.sin());
    }

    let max_rho = ((width * width + height * height) as f64).sqrt();
    let num_rhos = (2.0 * max_rho) as usize + 1;
    let rho_offset = max_rho;

    let mut accumulator = vec![0u32; num_thetas * num_rhos];

    let mut edge_points: Vec<(i32, i32)> = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if mask.get_pixel(x as u32, y as u32).0[0] > 128 {
                edge_points.push((x, y));
            }
        }
    }

    for &(x, y) in &edge_points {
        for theta_idx in 0..num_thetas {
            let rho = x as f64 * cos_table[theta_idx] + y as f64 * sin_table[theta_idx];
            let rho_idx = (rho + rho_offset) as usize;
            if rho_idx < num_rhos {
                accumulator[theta_idx * num_rhos + rho_idx] += 1;
            }
        }
    }

    let mut peaks: Vec<(usize, usize, u32)> = Vec::new();
    for theta_idx in 0..num_thetas {
        for rho_idx in 0..num_rhos {
            let votes = accumulator[theta_idx * num_rhos + rho_idx];
            if votes >= threshold {
                peaks.push((theta_idx, rho_idx, votes));
            }
        }
    }

    // Deterministic peak order: votes descending, then theta/rho.
    peaks.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)).then(a.1.cmp(&b.1)));

    let mut segments = Vec::new();
    let mut used_points = vec![false; edge_points.len()];

    for (theta_idx, rho_idx, _votes) in peaks.iter().take(500) {
        let rho = *rho_idx as f64 - rho_offset;
        let cos_t = cos_table[*theta_idx];
        let sin_t = sin_table[*theta_idx];

        let mut line_points: Vec<(i32, i32, usize)> = Vec::new();
        for (i, &(x, y)) in edge_points.iter().enumerate() {
            if used_points[i] {
                continue;
            }
            let point_rho = x as f64 * cos_t + y as f64 * sin_t;
            if (point_rho - rho).abs() < 2.0 {
                line_points.push((x, y, i));
            }
        }

        if line_points.len() < 2 {
            continue;
        }

        // Order points along the line direction, then split at gaps.
        line_points.sort_by(|a, b| {
            let proj_a = a.0 as f64 * (-sin_t) + a.1 as f64 * cos_t;
            let proj_b = b.0 as f64 * (-sin_t) + b.1 as f64 * cos_t;
            proj_a
                .partial_cmp(&proj_b)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut segment_start = 0;
        for i in 1..=line_points.len() {
            let split = if i == line_points.len() {
                true
            } else {
                let dx = (line_points[i].0 - line_points[i - 1].0) as f64;
                let dy = (line_points[i].1 - line_points[i - 1].1) as f64;
                (dx * dx + dy * dy).sqrt() > max_gap
            };

            if split {
                if i - segment_start >= 2 {
                    let start_pt = &line_points[segment_start];
                    let end_pt = &line_points[i - 1];
                    let segment = LineSegment::new(
                        Point2D::new(start_pt.0 as f64, start_pt.1 as f64),
                        Point2D::new(end_pt.0 as f64, end_pt.1 as f64),
                    );
                    if segment.length() >= min_length {
                        for point in &line_points[segment_start..i] {
                            used_points[point.2] = true;
                        }
                        segments.push(segment);
                    }
                }
                segment_start = i;
            }
        }
    }

    segments
}

/// Snap near-horizontal/vertical segments exactly onto the axis.
pub fn snap_to_axes(segments: &[LineSegment], angle_threshold: f64) -> Vec<LineSegment> {
    segments
        .iter()
        .map(|segment| {
            let angle = segment.angle();
            let abs_angle = angle.abs();

            if abs_angle < angle_threshold || abs_angle > PI - angle_threshold {
                let avg_y = (segment.start.y + segment.end.y) / 2.0;
                LineSegment::new(
                    Point2D::new(segment.start.x, avg_y),
                    Point2D::new(segment.end.x, avg_y),
                )
            } else if (abs_angle - PI / 2.0).abs() < angle_threshold {
                let avg_x = (segment.start.x + segment.end.x) / 2.0;
                LineSegment::new(
                    Point2D::new(avg_x, segment.start.y),
                    Point2D::new(avg_x, segment.end.y),
                )
            } else {
                segment.clone()
            }
        })
        .collect()
}

/// Merge groups of collinear segments into single spans.
///
/// `lateral_tolerance` bounds the perpendicular offset between the lines,
/// kept tight so parallel wall faces stay distinct for thickness
/// estimation; `gap_tolerance` bounds the end-to-end gap between spans so
/// fragments split by crossings re-join.
pub fn merge_collinear(
    segments: &[LineSegment],
    angle_tolerance: f64,
    lateral_tolerance: f64,
    gap_tolerance: f64,
) -> Vec<LineSegment> {
    if segments.is_empty() {
        return Vec::new();
    }

    let mut merged: Vec<LineSegment> = Vec::new();
    let mut used = vec![false; segments.len()];

    for (i, segment) in segments.iter().enumerate() {
        if used[i] {
            continue;
        }
        let mut group = vec![segment.clone()];
        used[i] = true;

        for (j, other) in segments.iter().enumerate() {
            if used[j] {
                continue;
            }
            if are_collinear(segment, other, angle_tolerance, lateral_tolerance, gap_tolerance) {
                group.push(other.clone());
                used[j] = true;
            }
        }

        merged.push(merge_group(&group));
    }

    merged
}

fn are_collinear(
    a: &LineSegment,
    b: &LineSegment,
    angle_tolerance: f64,
    lateral_tolerance: f64,
    gap_tolerance: f64,
) -> bool {
    let mut angle_diff = (a.angle() - b.angle()).abs();
    if angle_diff > PI / 2.0 {
        angle_diff = PI - angle_diff;
    }
    if angle_diff > angle_tolerance {
        return false;
    }
    if point_to_line_distance(&b.midpoint(), &a.start, &a.end) > lateral_tolerance {
        return false;
    }
    span_gap(a, b) <= gap_tolerance
}

/// Perpendicular distance from a point to the infinite line through a
/// segment, unclamped so endpoints past the span measure only offset.
fn point_to_line_distance(point: &Point2D, start: &Point2D, end: &Point2D) -> f64 {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length = (dx * dx + dy * dy).sqrt();
    if length < 1e-10 {
        return point.distance_to(start);
    }
    ((point.x - start.x) * dy - (point.y - start.y) * dx).abs() / length
}

/// End-to-end gap between the projections of two segments onto the first
/// segment's direction; zero when the spans overlap.
fn span_gap(a: &LineSegment, b: &LineSegment) -> f64 {
    let angle = a.angle();
    let (cos_a, sin_a) = (angle.cos(), angle.sin());
    let project = |p: &Point2D| p.x * cos_a + p.y * sin_a;

    let (a0, a1) = ordered(project(&a.start), project(&a.end));
    let (b0, b1) = ordered(project(&b.start), project(&b.end));
    (b0 - a1).max(a0 - b1).max(0.0)
}

fn ordered(u: f64, v: f64) -> (f64, f64) {
    if u <= v {
        (u, v)
    } else {
        (v, u)
    }
}

fn merge_group(group: &[LineSegment]) -> LineSegment {
    if group.len() == 1 {
        return group[0].clone();
    }

    let mut all_points: Vec<Point2D> = Vec::with_capacity(group.len() * 2);
    for segment in group {
        all_points.push(segment.start);
        all_points.push(segment.end);
    }

    let avg_angle = group.iter().map(|s| s.angle()).sum::<f64>() / group.len() as f64;
    let cos_a = avg_angle.cos();
    let sin_a = avg_angle.sin();

    let mut min_proj = f64::MAX;
    let mut max_proj = f64::MIN;
    let mut min_point = all_points[0];
    let mut max_point = all_points[0];
    for point in &all_points {
        let proj = point.x * cos_a + point.y * sin_a;
        if proj < min_proj {
            min_proj = proj;
            min_point = *point;
        }
        if proj > max_proj {
            max_proj = proj;
            max_point = *point;
        }
    }

    LineSegment::new(min_point, max_point)
}

/// Perpendicular distance from a point to a segment, clamped to the span.
pub fn point_to_segment_distance(point: &Point2D, start: &Point2D, end: &Point2D) -> f64 {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length_sq = dx * dx + dy * dy;
    if length_sq < 1e-10 {
        return point.distance_to(start);
    }
    let t = ((point.x - start.x) * dx + (point.y - start.y) * dy) / length_sq;
    let t = t.clamp(0.0, 1.0);
    let proj = Point2D::new(start.x + t * dx, start.y + t * dy);
    point.distance_to(&proj)
}

/// Render a foreground mask over the bounding boxes of dimension and
/// room-label text, inflated a little so lines hugging the text are caught.
pub fn build_text_mask(
    text: &[TextElement],
    width: u32,
    height: u32,
    inflate_px: f64,
) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let margin_x = inflate_px / width as f64;
    let margin_y = inflate_px / height as f64;

    for element in text {
        if !matches!(element.kind, TextKind::Dimension | TextKind::RoomLabel) {
            continue;
        }
        let bbox = BoundingBox {
            x: element.bbox.x - margin_x,
            y: element.bbox.y - margin_y,
            width: element.bbox.width + 2.0 * margin_x,
            height: element.bbox.height + 2.0 * margin_y,
        };
        let x0 = (bbox.x * width as f64).floor().max(0.0) as u32;
        let y0 = (bbox.y * height as f64).floor().max(0.0) as u32;
        let x1 = ((bbox.x + bbox.width) * width as f64).ceil().min(width as f64) as u32;
        let y1 = ((bbox.y + bbox.height) * height as f64)
            .ceil()
            .min(height as f64) as u32;
        for y in y0..y1 {
            for x in x0..x1 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }
    mask
}

/// Per-stage rejection counters, logged at debug level.
#[derive(Debug, Default)]
pub struct FilterStats {
    pub input: usize,
    pub removed_short: usize,
    pub removed_exclusion: usize,
    pub removed_dimension: usize,
    pub removed_dashed: usize,
    pub output: usize,
}

/// Apply the wall-candidate filter chain, in order: minimum length,
/// exclusion zone, dimension-string detection, dashed-line detection.
///
/// `strokes` must be the crisp stroke map: a binarization taken before any
/// denoising blur, so dash gaps are still open when continuity is measured.
pub fn filter_segments(
    segments: Vec<LineSegment>,
    strokes: &GrayImage,
    text_mask: &GrayImage,
    min_wall_px: f64,
    options: &DetectionOptions,
) -> Vec<LineSegment> {
    let width = strokes.width() as f64;
    let height = strokes.height() as f64;
    let mut stats = FilterStats {
        input: segments.len(),
        ..Default::default()
    };

    let mut kept = Vec::new();
    for segment in segments {
        if segment.length() < min_wall_px {
            stats.removed_short += 1;
            continue;
        }
        if in_exclusion_zone(&segment, width, height, options) {
            stats.removed_exclusion += 1;
            continue;
        }
        if is_dimension_string(&segment, text_mask, min_wall_px, width, height) {
            stats.removed_dimension += 1;
            continue;
        }
        if is_dashed(&segment, strokes) {
            stats.removed_dashed += 1;
            continue;
        }
        kept.push(segment);
    }

    stats.output = kept.len();
    debug!(?stats, "wall candidate filtering");
    kept
}

/// Segments whose midpoint lands in the titleblock/legend margins are not
/// structural walls.
fn in_exclusion_zone(
    segment: &LineSegment,
    width: f64,
    height: f64,
    options: &DetectionOptions,
) -> bool {
    let mid = segment.midpoint();
    let nx = mid.x / width;
    let ny = mid.y / height;
    nx < options.exclusion_left
        || nx > options.exclusion_right
        || ny < options.exclusion_top
        || ny > options.exclusion_bottom
}

/// Dimension strings are short axis-aligned strokes adjacent to dimension
/// text, or very long axis-aligned baselines near the sheet edge.
fn is_dimension_string(
    segment: &LineSegment,
    text_mask: &GrayImage,
    min_wall_px: f64,
    width: f64,
    height: f64,
) -> bool {
    if !segment.is_axis_aligned(AXIS_TOLERANCE) {
        return false;
    }

    // Short segment mostly covered by the text mask.
    if segment.length() < min_wall_px * 3.0 {
        let hits = sample_hits(segment, text_mask, 20, 2);
        if hits >= 12 {
            return true;
        }
    }

    // Long baseline hugging the image edge.
    if segment.length() > 0.5 * width.min(height) {
        let mid = segment.midpoint();
        let edge_distance = mid
            .x
            .min(width - mid.x)
            .min(mid.y)
            .min(height - mid.y);
        if edge_distance < 0.05 * width.min(height) {
            return true;
        }
    }

    false
}

/// Dashed lines show low hit continuity or a long gap run when the crisp
/// stroke map is sampled along the segment.
fn is_dashed(segment: &LineSegment, strokes: &GrayImage) -> bool {
    let samples = (segment.length() / 2.0).clamp(10.0, 100.0) as usize;
    let mut hits = 0usize;
    let mut gap_run = 0usize;
    let mut max_gap_run = 0usize;

    for i in 0..samples {
        let t = i as f64 / (samples - 1) as f64;
        let x = segment.start.x + t * (segment.end.x - segment.start.x);
        let y = segment.start.y + t * (segment.end.y - segment.start.y);
        if probe(strokes, x, y, 1) {
            hits += 1;
            gap_run = 0;
        } else {
            gap_run += 1;
            max_gap_run = max_gap_run.max(gap_run);
        }
    }

    let continuity = hits as f64 / samples as f64;
    continuity < 0.6 || max_gap_run as f64 > 0.3 * samples as f64
}

/// Count sampled points along the segment landing on the mask, with a
/// small search radius per sample.
fn sample_hits(segment: &LineSegment, mask: &GrayImage, samples: usize, radius: i32) -> usize {
    let mut hits = 0;
    for i in 0..samples {
        let t = i as f64 / (samples - 1) as f64;
        let x = segment.start.x + t * (segment.end.x - segment.start.x);
        let y = segment.start.y + t * (segment.end.y - segment.start.y);
        if probe(mask, x, y, radius) {
            hits += 1;
        }
    }
    hits
}

/// True when any foreground pixel lies within `radius` of (x, y).
pub fn probe(mask: &GrayImage, x: f64, y: f64, radius: i32) -> bool {
    let cx = x.round() as i32;
    let cy = y.round() as i32;
    let width = mask.width() as i32;
    let height = mask.height() as i32;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let nx = cx + dx;
            let ny = cy + dy;
            if nx >= 0
                && ny >= 0
                && nx < width
                && ny < height
                && mask.get_pixel(nx as u32, ny as u32).0[0] > 128
            {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw_h_line(img: &mut GrayImage, x0: u32, x1: u32, y: u32) {
        for x in x0..x1 {
            img.put_pixel(x, y, Luma([255]));
        }
    }

    #[test]
    fn test_detect_segments_finds_horizontal_line() {
        let mut mask = GrayImage::new(200, 200);
        draw_h_line(&mut mask, 20, 180, 100);

        let segments = detect_segments(&mask, 30, 50.0, 5.0);

        assert!(!segments.is_empty());
        let longest = segments
            .iter()
            .max_by(|a, b| a.length().partial_cmp(&b.length()).unwrap())
            .unwrap();
        assert!(longest.length() > 140.0);
        assert!(longest.is_axis_aligned(0.05));
    }

    #[test]
    fn test_snap_to_axes() {
        let segments = vec![LineSegment::new(
            Point2D::new(0.0, 0.2),
            Point2D::new(50.0, -0.2),
        )];
        let snapped = snap_to_axes(&segments, 0.05);
        assert!((snapped[0].start.y - snapped[0].end.y).abs() < 1e-9);
    }

    #[test]
    fn test_merge_collinear() {
        let segments = vec![
            LineSegment::new(Point2D::new(0.0, 10.0), Point2D::new(40.0, 10.0)),
            LineSegment::new(Point2D::new(45.0, 10.0), Point2D::new(90.0, 10.0)),
        ];
        let merged = merge_collinear(&segments, 0.1, 2.0, 8.0);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].length() - 90.0).abs() < 1.0);
    }

    #[test]
    fn test_merge_respects_gap_tolerance() {
        let segments = vec![
            LineSegment::new(Point2D::new(0.0, 10.0), Point2D::new(40.0, 10.0)),
            LineSegment::new(Point2D::new(60.0, 10.0), Point2D::new(90.0, 10.0)),
        ];
        let merged = merge_collinear(&segments, 0.1, 2.0, 8.0);
        assert_eq!(merged.len(), 2, "a 20 px gap is a real break");
    }

    #[test]
    fn test_parallel_wall_faces_not_merged() {
        // Two faces of one wall, 6 px apart: must stay separate so
        // thickness estimation can pair them up later.
        let segments = vec![
            LineSegment::new(Point2D::new(0.0, 10.0), Point2D::new(90.0, 10.0)),
            LineSegment::new(Point2D::new(0.0, 16.0), Point2D::new(90.0, 16.0)),
        ];
        let merged = merge_collinear(&segments, 0.1, 2.0, 8.0);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_exclusion_zone_rejects_titleblock_segment() {
        let strokes = GrayImage::new(200, 200);
        let text_mask = GrayImage::new(200, 200);
        // Midpoint at x = 0.95 * width: inside the right titleblock margin
        let segments = vec![LineSegment::new(
            Point2D::new(185.0, 50.0),
            Point2D::new(195.0, 150.0),
        )];
        let kept = filter_segments(
            segments,
            &strokes,
            &text_mask,
            5.0,
            &DetectionOptions::default(),
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn test_dashed_line_rejected() {
        let mut strokes = GrayImage::new(300, 300);
        // Dashed stroke: 6 px on, 14 px off
        let mut x = 50;
        while x < 250 {
            draw_h_line(&mut strokes, x, x + 6, 150);
            x += 20;
        }
        let text_mask = GrayImage::new(300, 300);
        let segments = vec![LineSegment::new(
            Point2D::new(50.0, 150.0),
            Point2D::new(250.0, 150.0),
        )];
        let kept = filter_segments(
            segments,
            &strokes,
            &text_mask,
            10.0,
            &DetectionOptions::default(),
        );
        assert!(kept.is_empty(), "dashed line must not survive filtering");
    }

    #[test]
    fn test_solid_line_survives() {
        let mut strokes = GrayImage::new(300, 300);
        draw_h_line(&mut strokes, 50, 250, 150);
        let text_mask = GrayImage::new(300, 300);
        let segments = vec![LineSegment::new(
            Point2D::new(50.0, 150.0),
            Point2D::new(249.0, 150.0),
        )];
        let kept = filter_segments(
            segments,
            &strokes,
            &text_mask,
            10.0,
            &DetectionOptions::default(),
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_dimension_string_near_text_rejected() {
        let mut strokes = GrayImage::new(400, 400);
        draw_h_line(&mut strokes, 100, 130, 200);
        let text = vec![TextElement {
            text: "12'-6\"".into(),
            bbox: BoundingBox::new(0.24, 0.48, 0.09, 0.04),
            confidence: 0.9,
            kind: TextKind::Dimension,
        }];
        let text_mask = build_text_mask(&text, 400, 400, 4.0);
        // Short axis-aligned segment running through the dimension text box
        let segments = vec![LineSegment::new(
            Point2D::new(100.0, 200.0),
            Point2D::new(130.0, 200.0),
        )];
        let kept = filter_segments(
            segments,
            &strokes,
            &text_mask,
            20.0,
            &DetectionOptions::default(),
        );
        assert!(kept.is_empty());
    }
}

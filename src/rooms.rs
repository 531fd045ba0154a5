// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Room extraction.
//!
//! Preferred strategy: seeded region growing from recognized room-label
//! positions, bounded by a wall mask rendered from the wall graph and
//! steered by a distance transform. Geometric fallback: enclosed free-space
//! regions of the drawing itself, used only when no text-seeded room was
//! found. A learned room mask (segmentation path) is consumed through the
//! same connected-component machinery.

use crate::graph::WallGraph;
use crate::segments::probe;
use crate::types::{
    polygon_perimeter, BoundingBox, DetectionOptions, Point2D, RoomCandidate, TextElement,
    TextKind,
};
use image::{GrayImage, Luma};
use tracing::debug;

/// Plausible real-world wall thickness band for mask rendering, in the
/// length unit of the scale factor (feet in the host system).
const MIN_WALL_THICKNESS: f64 = 0.3;
const MAX_WALL_THICKNESS: f64 = 1.5;

/// Edges below this confidence are not rendered into the wall mask; the
/// refinement loop can still find and promote them when a room gap lines
/// up with them.
pub const RENDER_CONFIDENCE: f32 = 0.25;

/// Render the wall graph into a binary wall mask. Edge confidence
/// modulates stroke thickness within the plausible wall-thickness band, so
/// weak edges still bound rooms but contribute thinner strokes.
pub fn render_wall_mask(graph: &WallGraph, width: u32, height: u32, scale_factor: f64) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for edge in &graph.edges {
        if edge.confidence < RENDER_CONFIDENCE {
            continue;
        }
        let a = graph.nodes[edge.a].position;
        let b = graph.nodes[edge.b].position;
        let base = edge.thickness.unwrap_or(0.6);
        let real = (base * (0.5 + 0.5 * edge.confidence as f64))
            .clamp(MIN_WALL_THICKNESS, MAX_WALL_THICKNESS);
        let radius = ((real / scale_factor) / 2.0).max(1.0) as i32;
        draw_thick_line(
            &mut mask,
            a.x as i32,
            a.y as i32,
            b.x as i32,
            b.y as i32,
            radius,
        );
    }
    mask
}

/// Draw a thick line (Bresenham with a disc brush).
pub fn draw_thick_line(img: &mut GrayImage, x0: i32, y0: i32, x1: i32, y1: i32, thickness: i32) {
    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;
    let mut x = x0;
    let mut y = y0;

    loop {
        for oy in -thickness..=thickness {
            for ox in -thickness..=thickness {
                if ox * ox + oy * oy <= thickness * thickness {
                    let px = x + ox;
                    let py = y + oy;
                    if px >= 0 && px < img.width() as i32 && py >= 0 && py < img.height() as i32 {
                        img.put_pixel(px as u32, py as u32, Luma([255]));
                    }
                }
            }
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x += sx;
        }
        if e2 < dx {
            err += dx;
            y += sy;
        }
    }
}

/// Chamfer (3-4) distance transform: per-pixel distance to the nearest
/// foreground pixel of `mask`, in approximate pixels.
pub fn distance_transform(mask: &GrayImage) -> Vec<f32> {
    let width = mask.width() as usize;
    let height = mask.height() as usize;
    let inf = (width + height) as f32 * 4.0;
    let mut dist = vec![inf; width * height];

    for y in 0..height {
        for x in 0..width {
            if mask.get_pixel(x as u32, y as u32).0[0] > 128 {
                dist[y * width + x] = 0.0;
            }
        }
    }

    // Forward pass
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            let mut d = dist[i];
            if x > 0 {
                d = d.min(dist[i - 1] + 3.0);
            }
            if y > 0 {
                d = d.min(dist[i - width] + 3.0);
                if x > 0 {
                    d = d.min(dist[i - width - 1] + 4.0);
                }
                if x + 1 < width {
                    d = d.min(dist[i - width + 1] + 4.0);
                }
            }
            dist[i] = d;
        }
    }
    // Backward pass
    for y in (0..height).rev() {
        for x in (0..width).rev() {
            let i = y * width + x;
            let mut d = dist[i];
            if x + 1 < width {
                d = d.min(dist[i + 1] + 3.0);
            }
            if y + 1 < height {
                d = d.min(dist[i + width] + 3.0);
                if x + 1 < width {
                    d = d.min(dist[i + width + 1] + 4.0);
                }
                if x > 0 {
                    d = d.min(dist[i + width - 1] + 4.0);
                }
            }
            dist[i] = d;
        }
    }

    for d in dist.iter_mut() {
        *d /= 3.0;
    }
    dist
}

/// Candidate seed points for one room label, ordered by strategy:
/// 1. label bounding-box center, when it already lies in free space;
/// 2. maximum distance-transform point inside the bounding box;
/// 3. maximum distance-transform point in a 2x expanded box;
/// 4. probe directly below the box (label-above-room layouts);
/// 5. nearest clearly-free pixel by ring search around the center.
///
/// Every entry carries its 1-based strategy index. The extractor tries
/// candidates in order until one grows a valid region, so a strategy whose
/// seed lands on the wrong side of a wall is recoverable.
pub fn seed_candidates(
    bbox: &BoundingBox,
    dist: &[f32],
    width: u32,
    height: u32,
) -> Vec<((u32, u32), usize)> {
    let clearance = 2.0_f32;
    let px_box = |b: &BoundingBox| {
        let x0 = (b.x * width as f64).floor().max(0.0) as u32;
        let y0 = (b.y * height as f64).floor().max(0.0) as u32;
        let x1 = (((b.x + b.width) * width as f64).ceil() as u32).min(width);
        let y1 = (((b.y + b.height) * height as f64).ceil() as u32).min(height);
        (x0, y0, x1, y1)
    };

    let center = bbox.center();
    let cx = ((center.x * width as f64) as u32).min(width - 1);
    let cy = ((center.y * height as f64) as u32).min(height - 1);

    let mut candidates = Vec::new();

    // 1: center already in free space
    if dist[(cy * width + cx) as usize] > clearance {
        candidates.push(((cx, cy), 1));
    }

    // 2: max distance transform within the box
    let (x0, y0, x1, y1) = px_box(bbox);
    if let Some(seed) = argmax_distance(dist, width, x0, y0, x1, y1, clearance) {
        candidates.push((seed, 2));
    }

    // 3: expanded box
    let expanded = BoundingBox {
        x: bbox.x - bbox.width / 2.0,
        y: bbox.y - bbox.height / 2.0,
        width: bbox.width * 2.0,
        height: bbox.height * 2.0,
    };
    let (x0, y0, x1, y1) = px_box(&expanded);
    if let Some(seed) = argmax_distance(dist, width, x0, y0, x1, y1, clearance) {
        candidates.push((seed, 3));
    }

    // 4: directly below the label (labels are often drawn above the room)
    let below_y = (((bbox.y + bbox.height * 2.0) * height as f64) as u32).min(height - 1);
    if dist[(below_y * width + cx) as usize] > clearance {
        candidates.push(((cx, below_y), 4));
    }

    // 5: ring search around the center
    let max_radius = ((bbox.width.max(bbox.height) * width as f64) * 3.0) as i32;
    'rings: for radius in 2..max_radius.max(8) {
        let mut best: Option<(u32, u32, f32)> = None;
        for (dx, dy) in ring_offsets(radius) {
            let nx = cx as i32 + dx;
            let ny = cy as i32 + dy;
            if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                continue;
            }
            let d = dist[(ny as u32 * width + nx as u32) as usize];
            if d > clearance && best.map_or(true, |(_, _, bd)| d > bd) {
                best = Some((nx as u32, ny as u32, d));
            }
        }
        if let Some((x, y, _)) = best {
            candidates.push(((x, y), 5));
            break 'rings;
        }
    }

    candidates
}

fn argmax_distance(
    dist: &[f32],
    width: u32,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    clearance: f32,
) -> Option<(u32, u32)> {
    let mut best: Option<(u32, u32, f32)> = None;
    for y in y0..y1 {
        for x in x0..x1 {
            let d = dist[(y * width + x) as usize];
            if d > clearance && best.map_or(true, |(_, _, bd)| d > bd) {
                best = Some((x, y, d));
            }
        }
    }
    best.map(|(x, y, _)| (x, y))
}

fn ring_offsets(radius: i32) -> Vec<(i32, i32)> {
    let mut offsets = Vec::new();
    for d in -radius..=radius {
        offsets.push((d, -radius));
        offsets.push((d, radius));
        if d.abs() != radius {
            offsets.push((-radius, d));
            offsets.push((radius, d));
        }
    }
    offsets
}

/// A filled free-space region produced by flood fill.
pub struct Region {
    /// Row-major membership flags, working-image sized.
    pub members: Vec<bool>,
    pub pixel_area: usize,
    pub touches_border: bool,
}

/// Flood-fill region growing from a seed, bounded by the wall mask.
pub fn grow_region(wall_mask: &GrayImage, seed: (u32, u32)) -> Region {
    let width = wall_mask.width();
    let height = wall_mask.height();
    let mut members = vec![false; (width * height) as usize];
    let mut touches_border = false;
    let mut pixel_area = 0usize;

    if wall_mask.get_pixel(seed.0, seed.1).0[0] > 128 {
        return Region {
            members,
            pixel_area,
            touches_border,
        };
    }

    let mut stack = vec![seed];
    while let Some((x, y)) = stack.pop() {
        let idx = (y * width + x) as usize;
        if members[idx] || wall_mask.get_pixel(x, y).0[0] > 128 {
            continue;
        }
        members[idx] = true;
        pixel_area += 1;
        if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
            touches_border = true;
        }
        if x > 0 {
            stack.push((x - 1, y));
        }
        if x + 1 < width {
            stack.push((x + 1, y));
        }
        if y > 0 {
            stack.push((x, y - 1));
        }
        if y + 1 < height {
            stack.push((x, y + 1));
        }
    }

    Region {
        members,
        pixel_area,
        touches_border,
    }
}

/// Outer contour of a region: boundary pixels ordered by angle around the
/// centroid, then simplified with Douglas-Peucker.
pub fn region_contour(region: &Region, width: u32, height: u32, epsilon_fraction: f64) -> Vec<Point2D> {
    let mut boundary = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if !region.members[idx] {
                continue;
            }
            let on_border = x == 0
                || y == 0
                || x == width - 1
                || y == height - 1
                || !region.members[idx - 1]
                || !region.members[idx + 1]
                || !region.members[idx - width as usize]
                || !region.members[idx + width as usize];
            if on_border {
                boundary.push(Point2D::new(x as f64, y as f64));
            }
        }
    }
    if boundary.len() < 3 {
        return boundary;
    }

    let ordered = order_boundary_points(&boundary);
    let epsilon = (polygon_perimeter(&ordered) * epsilon_fraction).max(1.5);
    douglas_peucker(&ordered, epsilon)
}

/// Order boundary points by angle from their centroid to form a ring.
fn order_boundary_points(points: &[Point2D]) -> Vec<Point2D> {
    let cx = points.iter().map(|p| p.x).sum::<f64>() / points.len() as f64;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / points.len() as f64;

    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| {
        let angle_a = (a.y - cy).atan2(a.x - cx);
        let angle_b = (b.y - cy).atan2(b.x - cx);
        angle_a
            .partial_cmp(&angle_b)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
}

/// Douglas-Peucker ring simplification.
pub fn douglas_peucker(points: &[Point2D], epsilon: f64) -> Vec<Point2D> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let first = &points[0];
    let last = &points[points.len() - 1];

    let mut max_dist = 0.0;
    let mut max_idx = 0;
    for (i, point) in points.iter().enumerate().skip(1).take(points.len() - 2) {
        let dist = perpendicular_distance(point, first, last);
        if dist > max_dist {
            max_dist = dist;
            max_idx = i;
        }
    }

    if max_dist > epsilon {
        let left = douglas_peucker(&points[..=max_idx], epsilon);
        let right = douglas_peucker(&points[max_idx..], epsilon);
        let mut result = left;
        result.extend_from_slice(&right[1..]);
        result
    } else {
        vec![*first, *last]
    }
}

fn perpendicular_distance(point: &Point2D, start: &Point2D, end: &Point2D) -> f64 {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length_sq = dx * dx + dy * dy;
    if length_sq < 1e-10 {
        return point.distance_to(start);
    }
    ((point.x - start.x) * dy - (point.y - start.y) * dx).abs() / length_sq.sqrt()
}

/// Text-seeded room extraction (preferred strategy).
pub fn extract_rooms_seeded(
    wall_mask: &GrayImage,
    text: &[TextElement],
    scale_factor: f64,
    options: &DetectionOptions,
) -> Vec<RoomCandidate> {
    let width = wall_mask.width();
    let height = wall_mask.height();
    let dist = distance_transform(wall_mask);

    let mut claimed = vec![false; (width * height) as usize];
    let mut rooms = Vec::new();

    let min_area_px = options.min_room_area / (scale_factor * scale_factor);
    let max_area_px = options.max_room_area / (scale_factor * scale_factor);

    for element in text {
        if element.kind != TextKind::RoomLabel {
            continue;
        }
        let candidates = seed_candidates(&element.bbox, &dist, width, height);
        if candidates.is_empty() {
            debug!(label = %element.text, "no usable seed for room label");
            continue;
        }

        // Try strategies in order until one grows a plausible region.
        let mut grown: Option<(Region, usize)> = None;
        for (seed, strategy) in candidates {
            let seed_idx = (seed.1 * width + seed.0) as usize;
            if claimed[seed_idx] {
                grown = None;
                break; // another label already produced this region
            }
            let region = grow_region(wall_mask, seed);
            let area = region.pixel_area as f64;
            if region.pixel_area == 0
                || region.touches_border
                || area < min_area_px
                || area > max_area_px
            {
                continue;
            }
            grown = Some((region, strategy));
            break;
        }
        let Some((region, strategy)) = grown else {
            continue;
        };

        for (claim, member) in claimed.iter_mut().zip(region.members.iter()) {
            if *member {
                *claim = true;
            }
        }

        let contour = region_contour(&region, width, height, options.contour_epsilon);
        let Some(mut candidate) = RoomCandidate::from_polygon(contour, scale_factor) else {
            continue;
        };
        // Region pixel count is the truthful area; the simplified contour
        // can cut corners.
        candidate.area = region.pixel_area as f64 * scale_factor * scale_factor;

        if candidate.aspect_ratio() > options.max_room_aspect_ratio {
            continue;
        }

        candidate.label_text = Some(element.text.clone());
        candidate.room_type = Some(crate::types::RoomType::from_label(&element.text));
        debug!(label = %element.text, strategy, area = candidate.area, "room seeded");
        rooms.push(candidate);
    }

    rooms
}

/// Geometric fallback: enclosed free-space regions of the drawing, used
/// only when text seeding produced nothing.
///
/// Oversized regions (building outline/background), regions mostly covered
/// by text or titleblock exclusion masks, and regions with no wall support
/// are rejected. The wall-support constraint is skipped when fewer than 4
/// wall edges are known, to avoid over-rejecting on sparse graphs.
pub fn extract_rooms_geometric(
    binary: &GrayImage,
    wall_mask: &GrayImage,
    text_mask: &GrayImage,
    wall_edge_count: usize,
    scale_factor: f64,
    options: &DetectionOptions,
) -> Vec<RoomCandidate> {
    let width = binary.width();
    let height = binary.height();
    let image_px = (width * height) as f64;

    let mut visited = vec![false; (width * height) as usize];
    let mut rooms = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if visited[idx] || binary.get_pixel(x, y).0[0] > 128 {
                visited[idx] = true;
                continue;
            }

            let region = grow_region(binary, (x, y));
            for (seen, member) in visited.iter_mut().zip(region.members.iter()) {
                if *member {
                    *seen = true;
                }
            }

            // The component containing the sheet border is outside space.
            if region.touches_border {
                continue;
            }
            if region.pixel_area as f64 > 0.5 * image_px {
                continue;
            }

            let contour = region_contour(&region, width, height, options.contour_epsilon);
            let Some(mut candidate) = RoomCandidate::from_polygon(contour, scale_factor) else {
                continue;
            };
            candidate.area = region.pixel_area as f64 * scale_factor * scale_factor;

            if candidate.area < options.min_room_area || candidate.area > options.max_room_area {
                continue;
            }
            if candidate.aspect_ratio() > options.max_room_aspect_ratio {
                continue;
            }
            if exclusion_overlap(&candidate, text_mask, width, height, options) > 0.95 {
                continue;
            }
            if wall_edge_count >= 4 && wall_alignment(&candidate, wall_mask) < 0.15 {
                continue;
            }
            rooms.push(candidate);
        }
    }

    debug!(count = rooms.len(), "geometric fallback rooms");
    rooms
}

/// Connected-component room extraction from a learned room-probability
/// mask (segmentation path). Replaces flood-fill growing; labels are
/// attached to the component containing their center.
pub fn extract_rooms_from_mask(
    room_mask: &GrayImage,
    text: &[TextElement],
    scale_factor: f64,
    options: &DetectionOptions,
) -> Vec<RoomCandidate> {
    let width = room_mask.width();
    let height = room_mask.height();

    // Components of the mask foreground; reuse flood fill over the
    // inverted image.
    let mut inverted = room_mask.clone();
    for pixel in inverted.pixels_mut() {
        pixel.0[0] = 255 - pixel.0[0];
    }

    let mut visited = vec![false; (width * height) as usize];
    let mut rooms = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if visited[idx] || room_mask.get_pixel(x, y).0[0] <= 128 {
                visited[idx] = true;
                continue;
            }

            let region = grow_region(&inverted, (x, y));
            for (seen, member) in visited.iter_mut().zip(region.members.iter()) {
                if *member {
                    *seen = true;
                }
            }

            let contour = region_contour(&region, width, height, options.contour_epsilon);
            let Some(mut candidate) = RoomCandidate::from_polygon(contour, scale_factor) else {
                continue;
            };
            candidate.area = region.pixel_area as f64 * scale_factor * scale_factor;

            if candidate.area < options.min_room_area || candidate.area > options.max_room_area {
                continue;
            }
            if candidate.aspect_ratio() > options.max_room_aspect_ratio {
                continue;
            }

            // Attach the label whose center falls inside this component.
            for element in text {
                if element.kind != TextKind::RoomLabel {
                    continue;
                }
                let center = element.bbox.center();
                let cx = ((center.x * width as f64) as u32).min(width - 1);
                let cy = ((center.y * height as f64) as u32).min(height - 1);
                if region.members[(cy * width + cx) as usize] {
                    candidate.label_text = Some(element.text.clone());
                    candidate.room_type =
                        Some(crate::types::RoomType::from_label(&element.text));
                    break;
                }
            }

            rooms.push(candidate);
        }
    }

    rooms
}

/// Fraction of the candidate's boundary covered by the text/exclusion mask.
fn exclusion_overlap(
    candidate: &RoomCandidate,
    text_mask: &GrayImage,
    width: u32,
    height: u32,
    options: &DetectionOptions,
) -> f64 {
    let samples = sample_boundary(&candidate.polygon, 3.0);
    if samples.is_empty() {
        return 0.0;
    }
    let hits = samples
        .iter()
        .filter(|p| {
            let nx = p.x / width as f64;
            let ny = p.y / height as f64;
            let in_exclusion = nx < options.exclusion_left
                || nx > options.exclusion_right
                || ny < options.exclusion_top
                || ny > options.exclusion_bottom;
            in_exclusion || probe(text_mask, p.x, p.y, 0)
        })
        .count();
    hits as f64 / samples.len() as f64
}

/// Fraction of sampled boundary points within a small search radius of a
/// wall pixel.
pub fn wall_alignment(candidate: &RoomCandidate, wall_mask: &GrayImage) -> f64 {
    let samples = sample_boundary(&candidate.polygon, 3.0);
    if samples.is_empty() {
        return 0.0;
    }
    let hits = samples
        .iter()
        .filter(|p| probe(wall_mask, p.x, p.y, 5))
        .count();
    hits as f64 / samples.len() as f64
}

/// Evenly spaced samples along a closed polygon boundary.
pub fn sample_boundary(polygon: &[Point2D], spacing: f64) -> Vec<Point2D> {
    let n = polygon.len();
    if n < 2 {
        return Vec::new();
    }
    let mut samples = Vec::new();
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let length = a.distance_to(&b);
        let steps = (length / spacing).ceil().max(1.0) as usize;
        for s in 0..steps {
            let t = s as f64 / steps as f64;
            samples.push(Point2D::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y)));
        }
    }
    samples
}

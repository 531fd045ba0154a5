// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Iterative refinement: close wall gaps suggested by partially-enclosed
//! rooms, drop unsupported low-confidence edges, re-validate.
//!
//! The wall graph is owned and exclusively mutable here; edges are promoted
//! or removed in place, never rebuilt. The loop terminates at the iteration
//! cap or when the average enclosure score stops improving.

use crate::graph::WallGraph;
use crate::rooms::{draw_thick_line, render_wall_mask, sample_boundary, RENDER_CONFIDENCE};
use crate::segments::probe;
use crate::types::{clamp_confidence, DetectionOptions, Point2D, RoomCandidate, RoomStatus};
use crate::validate::{validate_rooms, WALL_SEARCH_RADIUS};
use image::GrayImage;
use tracing::debug;

/// Enclosure band in which a room is "almost enclosed" and worth repairing.
const GAP_BAND: (f64, f64) = (0.3, 0.7);

/// Minimum gap arc length, in boundary samples, to act on.
const MIN_GAP_SAMPLES: usize = 5;

/// Confidence boost applied to promoted edges; always enough to lift an
/// edge over the render threshold.
const PROMOTION: f32 = 0.25;

/// Edges below this confidence are removal candidates when nothing
/// supports them.
const SPURIOUS_CONFIDENCE: f32 = 0.3;

/// Outcome counters for one refinement run.
#[derive(Debug, Clone, Default)]
pub struct RefinementReport {
    pub iterations: usize,
    pub promoted_edges: usize,
    pub removed_edges: usize,
    pub final_avg_enclosure: f64,
}

/// A contiguous boundary arc not adjacent to any wall pixel.
struct Gap {
    midpoint: Point2D,
    angle: f64,
}

/// Run the refinement loop. Re-validates `rooms` against the refreshed
/// wall mask after each iteration; idempotent once converged.
pub fn refine(
    graph: &mut WallGraph,
    rooms: &mut [RoomCandidate],
    width: u32,
    height: u32,
    scale_factor: f64,
    options: &DetectionOptions,
) -> RefinementReport {
    let mut report = RefinementReport::default();
    let mut previous_avg = average_enclosure(rooms);

    for iteration in 0..options.max_refinement_iterations {
        report.iterations = iteration + 1;

        let wall_mask = render_wall_mask(graph, width, height, scale_factor);

        // 1-2: find gaps on almost-enclosed rooms, promote aligned
        // low-confidence edges near them.
        let mut promoted = 0;
        for room in rooms.iter() {
            if room.enclosure_score < GAP_BAND.0 || room.enclosure_score > GAP_BAND.1 {
                continue;
            }
            for gap in find_gaps(room, &wall_mask) {
                promoted += promote_edges_near_gap(graph, &gap);
            }
        }
        report.promoted_edges += promoted;

        // 3: refresh the mask from the updated graph.
        let wall_mask = render_wall_mask(graph, width, height, scale_factor);

        // 4: remove spurious edges with no room-boundary support.
        let removed = remove_spurious_edges(graph, rooms, width, height);
        report.removed_edges += removed;

        // 5: re-validate rooms against the refreshed walls.
        let wall_mask = if removed > 0 {
            render_wall_mask(graph, width, height, scale_factor)
        } else {
            wall_mask
        };
        validate_rooms(rooms, &wall_mask, options);

        let avg = average_enclosure(rooms);
        debug!(
            iteration,
            promoted,
            removed,
            avg_enclosure = avg,
            "refinement iteration"
        );
        if (avg - previous_avg).abs() < options.convergence_threshold {
            report.final_avg_enclosure = avg;
            return report;
        }
        previous_avg = avg;
    }

    report.final_avg_enclosure = previous_avg;
    report
}

/// Average enclosure over valid rooms; all rooms when none are valid yet.
fn average_enclosure(rooms: &[RoomCandidate]) -> f64 {
    let valid: Vec<_> = rooms
        .iter()
        .filter(|r| {
            matches!(
                r.status,
                RoomStatus::ValidEnclosedRoom | RoomStatus::ValidOpenSpaceRoom
            )
        })
        .collect();
    let pool: &[&RoomCandidate] = if valid.is_empty() {
        &[]
    } else {
        &valid
    };
    if pool.is_empty() {
        if rooms.is_empty() {
            return 0.0;
        }
        return rooms.iter().map(|r| r.enclosure_score).sum::<f64>() / rooms.len() as f64;
    }
    pool.iter().map(|r| r.enclosure_score).sum::<f64>() / pool.len() as f64
}

/// Contiguous boundary arcs with no wall pixel within the search radius.
fn find_gaps(room: &RoomCandidate, wall_mask: &GrayImage) -> Vec<Gap> {
    let samples = sample_boundary(&room.polygon, 3.0);
    if samples.is_empty() {
        return Vec::new();
    }

    let misses: Vec<bool> = samples
        .iter()
        .map(|p| !probe(wall_mask, p.x, p.y, WALL_SEARCH_RADIUS))
        .collect();

    let mut gaps = Vec::new();
    let n = samples.len();
    let mut i = 0;
    while i < n {
        if !misses[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && misses[i] {
            i += 1;
        }
        let end = i; // exclusive
        if end - start >= MIN_GAP_SAMPLES {
            let a = samples[start];
            let b = samples[end - 1];
            gaps.push(Gap {
                midpoint: Point2D::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0),
                angle: (b.y - a.y).atan2(b.x - a.x),
            });
        }
    }
    gaps
}

/// Promote unrendered edges geometrically aligned with a gap: they were
/// likely real walls initially under-scored.
///
/// Only edges below the render threshold are candidates. Gaps are measured
/// against the rendered mask, so an edge that already renders and still
/// leaves the gap open cannot close it; boosting it again would only make
/// re-running the loop on a converged state mutate the graph.
fn promote_edges_near_gap(graph: &mut WallGraph, gap: &Gap) -> usize {
    const SEARCH_RADIUS: f64 = 30.0;
    const ANGLE_TOLERANCE: f64 = 0.5;
    let pi = std::f64::consts::PI;

    let mut promoted = 0;
    let midpoints: Vec<Point2D> = graph
        .edges
        .iter()
        .map(|e| graph.edge_midpoint(e))
        .collect();
    let angles: Vec<f64> = graph.edges.iter().map(|e| graph.edge_angle(e)).collect();

    for (i, edge) in graph.edges.iter_mut().enumerate() {
        if edge.confidence >= RENDER_CONFIDENCE {
            continue;
        }
        if midpoints[i].distance_to(&gap.midpoint) > SEARCH_RADIUS {
            continue;
        }
        let mut diff = (angles[i] - gap.angle).abs() % pi;
        if diff > pi / 2.0 {
            diff = pi - diff;
        }
        if diff > ANGLE_TOLERANCE {
            continue;
        }
        edge.confidence = clamp_confidence(edge.confidence + PROMOTION);
        promoted += 1;
    }
    promoted
}

/// Remove low-confidence edges that are isolated (low endpoint degree) and
/// rarely near any room boundary.
fn remove_spurious_edges(
    graph: &mut WallGraph,
    rooms: &[RoomCandidate],
    width: u32,
    height: u32,
) -> usize {
    if graph.edges.is_empty() {
        return 0;
    }

    // Render all room boundaries once.
    let mut boundary_mask = GrayImage::new(width, height);
    for room in rooms {
        let n = room.polygon.len();
        for i in 0..n {
            let a = room.polygon[i];
            let b = room.polygon[(i + 1) % n];
            draw_thick_line(
                &mut boundary_mask,
                a.x as i32,
                a.y as i32,
                b.x as i32,
                b.y as i32,
                2,
            );
        }
    }

    let mut to_remove = Vec::new();
    for (i, edge) in graph.edges.iter().enumerate() {
        if edge.confidence >= SPURIOUS_CONFIDENCE {
            continue;
        }
        if graph.degree(edge.a) > 1 || graph.degree(edge.b) > 1 {
            continue; // connected into the wall fabric
        }
        let support = edge_boundary_support(graph, edge, &boundary_mask);
        if support < 0.2 {
            to_remove.push(i);
        }
    }

    for &i in to_remove.iter().rev() {
        graph.edges.remove(i);
    }
    to_remove.len()
}

/// Fraction of sampled points along an edge near any room boundary.
fn edge_boundary_support(
    graph: &WallGraph,
    edge: &crate::graph::Edge,
    boundary_mask: &GrayImage,
) -> f64 {
    let a = graph.nodes[edge.a].position;
    let b = graph.nodes[edge.b].position;
    let samples = (graph.edge_length(edge) / 3.0).clamp(8.0, 48.0) as usize;
    let mut hits = 0;
    for i in 0..samples {
        let t = i as f64 / (samples - 1) as f64;
        let x = a.x + t * (b.x - a.x);
        let y = a.y + t * (b.y - a.y);
        if probe(boundary_mask, x, y, WALL_SEARCH_RADIUS) {
            hits += 1;
        }
    }
    hits as f64 / samples as f64
}

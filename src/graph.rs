// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Planar wall graph: snapped segment endpoints as nodes, wall segments as
//! confidence-scored edges.
//!
//! The graph is the single source of truth for walls after segment
//! filtering. Refinement mutates it in place (confidence updates, edge
//! removal); it is never rebuilt mid-request.

use crate::segments::{point_to_segment_distance, probe};
use crate::types::{clamp_confidence, DetectionOptions, LineSegment, Point2D};
use image::GrayImage;
use rustc_hash::FxHashMap;
use std::f64::consts::PI;
use tracing::debug;

/// Role of a node, derived from degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Degree >= 3: walls meet.
    Junction,
    /// Degree == 2: wall turns.
    Corner,
    /// Degree <= 1: dangling end.
    Endpoint,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub position: Point2D,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub a: usize,
    pub b: usize,
    pub confidence: f32,
    /// Real-world thickness estimate when a parallel pair was found.
    pub thickness: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct WallGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl WallGraph {
    pub fn edge_length(&self, edge: &Edge) -> f64 {
        self.nodes[edge.a]
            .position
            .distance_to(&self.nodes[edge.b].position)
    }

    pub fn edge_angle(&self, edge: &Edge) -> f64 {
        let a = &self.nodes[edge.a].position;
        let b = &self.nodes[edge.b].position;
        (b.y - a.y).atan2(b.x - a.x)
    }

    pub fn edge_midpoint(&self, edge: &Edge) -> Point2D {
        let a = &self.nodes[edge.a].position;
        let b = &self.nodes[edge.b].position;
        Point2D::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
    }

    pub fn degree(&self, node: usize) -> usize {
        self.edges
            .iter()
            .filter(|e| e.a == node || e.b == node)
            .count()
    }

    pub fn node_role(&self, node: usize) -> NodeRole {
        match self.degree(node) {
            0 | 1 => NodeRole::Endpoint,
            2 => NodeRole::Corner,
            _ => NodeRole::Junction,
        }
    }
}

/// Build the wall graph from filtered segments.
///
/// Endpoints within the snap tolerance are merged by iterative clustering:
/// cluster membership is propagated and centroids recomputed until stable.
/// Duplicate and zero-length edges are dropped. Each edge's confidence is
/// the weighted sum of four normalized sub-scores (length, mask overlap,
/// local density, axis alignment); segments shorter than 1.5x the minimum
/// have their final confidence halved.
pub fn build_wall_graph(
    segments: &[LineSegment],
    mask: &GrayImage,
    min_wall_px: f64,
    scale_factor: f64,
    options: &DetectionOptions,
) -> WallGraph {
    if segments.is_empty() {
        return WallGraph::default();
    }

    // Collect endpoints: 2 per segment, even index = start.
    let mut endpoints: Vec<Point2D> = Vec::with_capacity(segments.len() * 2);
    for segment in segments {
        endpoints.push(segment.start);
        endpoints.push(segment.end);
    }

    let cluster_of = cluster_endpoints(&endpoints, options.snap_tolerance);

    // Node positions are cluster centroids.
    let num_clusters = cluster_of.iter().copied().max().map_or(0, |m| m + 1);
    let mut sums = vec![(0.0f64, 0.0f64, 0usize); num_clusters];
    for (i, &c) in cluster_of.iter().enumerate() {
        sums[c].0 += endpoints[i].x;
        sums[c].1 += endpoints[i].y;
        sums[c].2 += 1;
    }
    let nodes: Vec<Node> = sums
        .iter()
        .map(|&(sx, sy, n)| Node {
            position: Point2D::new(sx / n as f64, sy / n as f64),
        })
        .collect();

    let mut graph = WallGraph {
        nodes,
        edges: Vec::new(),
    };

    // One edge per segment, deduplicated on the snapped node pair.
    let mut seen: FxHashMap<(usize, usize), ()> = FxHashMap::default();
    for (i, segment) in segments.iter().enumerate() {
        let a = cluster_of[i * 2];
        let b = cluster_of[i * 2 + 1];
        if a == b {
            continue; // zero-length after snapping
        }
        let key = (a.min(b), a.max(b));
        if seen.insert(key, ()).is_some() {
            continue;
        }
        let thickness = estimate_thickness(segment, segments, scale_factor);
        graph.edges.push(Edge {
            a,
            b,
            confidence: 0.0,
            thickness,
        });
    }

    // Score after the full edge set exists: local density needs neighbors.
    let scores: Vec<f32> = graph
        .edges
        .iter()
        .map(|edge| score_edge(&graph, edge, mask, min_wall_px, options))
        .collect();
    for (edge, score) in graph.edges.iter_mut().zip(scores) {
        edge.confidence = score;
    }

    debug!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "wall graph built"
    );
    graph
}

/// Iterative endpoint clustering: merge clusters whose centroids are within
/// the tolerance, recompute centroids, repeat until stable.
fn cluster_endpoints(endpoints: &[Point2D], tolerance: f64) -> Vec<usize> {
    let mut cluster_of: Vec<usize> = (0..endpoints.len()).collect();

    for _ in 0..10 {
        // Centroids of current clusters.
        let mut sums: FxHashMap<usize, (f64, f64, usize)> = FxHashMap::default();
        for (i, &c) in cluster_of.iter().enumerate() {
            let entry = sums.entry(c).or_insert((0.0, 0.0, 0));
            entry.0 += endpoints[i].x;
            entry.1 += endpoints[i].y;
            entry.2 += 1;
        }
        let mut centroids: Vec<(usize, Point2D)> = sums
            .iter()
            .map(|(&c, &(sx, sy, n))| (c, Point2D::new(sx / n as f64, sy / n as f64)))
            .collect();
        centroids.sort_by_key(|&(c, _)| c);

        // Merge close centroid pairs (lowest id wins, deterministically).
        let mut remap: FxHashMap<usize, usize> = FxHashMap::default();
        for i in 0..centroids.len() {
            for j in (i + 1)..centroids.len() {
                let (ci, pi) = centroids[i];
                let (cj, pj) = centroids[j];
                if pi.distance_to(&pj) <= tolerance {
                    let target = *remap.get(&ci).unwrap_or(&ci);
                    remap.entry(cj).or_insert(target);
                }
            }
        }

        if remap.is_empty() {
            break;
        }
        for c in cluster_of.iter_mut() {
            if let Some(&target) = remap.get(c) {
                *c = target;
            }
        }
    }

    // Compact cluster ids to 0..n.
    let mut compact: FxHashMap<usize, usize> = FxHashMap::default();
    let mut ordered: Vec<usize> = cluster_of.clone();
    ordered.sort_unstable();
    ordered.dedup();
    for (new_id, &old_id) in ordered.iter().enumerate() {
        compact.insert(old_id, new_id);
    }
    cluster_of.iter().map(|c| compact[c]).collect()
}

/// Weighted confidence score for one edge.
fn score_edge(
    graph: &WallGraph,
    edge: &Edge,
    mask: &GrayImage,
    min_wall_px: f64,
    options: &DetectionOptions,
) -> f32 {
    let length = graph.edge_length(edge);

    // Length: step function favoring long segments.
    let length_score: f32 = if length >= 2.0 * min_wall_px {
        1.0
    } else if length >= min_wall_px {
        0.6
    } else {
        0.3
    };

    let overlap_score = mask_overlap(graph, edge, mask);
    let density_score = local_density(graph, edge);
    let axis_score = axis_alignment(graph.edge_angle(edge));

    let w = options.confidence_weights;
    let mut confidence =
        w[0] * length_score + w[1] * overlap_score + w[2] * density_score + w[3] * axis_score;

    if length < 1.5 * min_wall_px {
        confidence *= 0.5;
    }
    clamp_confidence(confidence)
}

/// Fraction of sampled points along the edge landing on the wall mask.
fn mask_overlap(graph: &WallGraph, edge: &Edge, mask: &GrayImage) -> f32 {
    let a = graph.nodes[edge.a].position;
    let b = graph.nodes[edge.b].position;
    let samples = (graph.edge_length(edge) / 2.0).clamp(8.0, 64.0) as usize;
    let mut hits = 0;
    for i in 0..samples {
        let t = i as f64 / (samples - 1) as f64;
        let x = a.x + t * (b.x - a.x);
        let y = a.y + t * (b.y - a.y);
        if probe(mask, x, y, 1) {
            hits += 1;
        }
    }
    hits as f32 / samples as f32
}

/// Count roughly parallel or perpendicular neighboring edges, capped and
/// normalized. Drawings with a dense orthogonal wall fabric support each
/// member edge.
fn local_density(graph: &WallGraph, edge: &Edge) -> f32 {
    const RADIUS: f64 = 60.0;
    const CAP: usize = 6;
    let mid = graph.edge_midpoint(edge);
    let angle = graph.edge_angle(edge);

    let mut count = 0;
    for other in &graph.edges {
        if other.a == edge.a && other.b == edge.b {
            continue;
        }
        if graph.edge_midpoint(other).distance_to(&mid) > RADIUS {
            continue;
        }
        let mut diff = (graph.edge_angle(other) - angle).abs() % PI;
        if diff > PI / 2.0 {
            diff = PI - diff;
        }
        // Parallel (diff ~ 0) or perpendicular (diff ~ PI/2).
        if diff < 0.26 || (PI / 2.0 - diff) < 0.26 {
            count += 1;
        }
    }
    count.min(CAP) as f32 / CAP as f32
}

/// Bonus for near-horizontal/vertical orientation: construction drawings
/// are predominantly orthogonal.
fn axis_alignment(angle: f64) -> f32 {
    let a = angle.abs();
    let to_axis = a.min((a - PI / 2.0).abs()).min((a - PI).abs());
    if to_axis < 0.09 {
        1.0
    } else if to_axis < 0.26 {
        0.5
    } else {
        0.0
    }
}

/// Thickness from the nearest roughly parallel segment within a plausible
/// wall band (real-world units).
fn estimate_thickness(
    segment: &LineSegment,
    all: &[LineSegment],
    scale_factor: f64,
) -> Option<f64> {
    const MIN_THICKNESS_PX: f64 = 2.0;
    let angle = segment.angle();
    let mid = segment.midpoint();
    let max_thickness_px = (1.5 / scale_factor).max(MIN_THICKNESS_PX + 1.0);

    let mut best: Option<f64> = None;
    for other in all {
        if std::ptr::eq(segment, other) {
            continue;
        }
        let mut diff = (angle - other.angle()).abs();
        if diff > PI / 2.0 {
            diff = PI - diff;
        }
        if diff > 0.15 {
            continue;
        }
        let distance = point_to_segment_distance(&mid, &other.start, &other.end);
        if distance > MIN_THICKNESS_PX && distance < max_thickness_px {
            best = Some(best.map_or(distance, |b: f64| b.min(distance)));
        }
    }
    best.map(|px| px * scale_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn mask_with_rect_outline(size: u32, lo: u32, hi: u32) -> GrayImage {
        let mut mask = GrayImage::new(size, size);
        for i in lo..=hi {
            mask.put_pixel(i, lo, Luma([255]));
            mask.put_pixel(i, hi, Luma([255]));
            mask.put_pixel(lo, i, Luma([255]));
            mask.put_pixel(hi, i, Luma([255]));
        }
        mask
    }

    fn square_segments(lo: f64, hi: f64) -> Vec<LineSegment> {
        vec![
            LineSegment::new(Point2D::new(lo, lo), Point2D::new(hi, lo)),
            LineSegment::new(Point2D::new(hi, lo), Point2D::new(hi, hi)),
            LineSegment::new(Point2D::new(hi, hi), Point2D::new(lo, hi)),
            LineSegment::new(Point2D::new(lo, hi), Point2D::new(lo, lo)),
        ]
    }

    #[test]
    fn test_snapping_merges_square_corners() {
        let mask = mask_with_rect_outline(200, 20, 180);
        // Endpoints jittered within the snap tolerance
        let segments = vec![
            LineSegment::new(Point2D::new(20.0, 20.0), Point2D::new(180.0, 21.0)),
            LineSegment::new(Point2D::new(181.0, 19.0), Point2D::new(180.0, 180.0)),
            LineSegment::new(Point2D::new(179.0, 181.0), Point2D::new(20.0, 180.0)),
            LineSegment::new(Point2D::new(21.0, 179.0), Point2D::new(20.0, 21.0)),
        ];
        let graph = build_wall_graph(&segments, &mask, 30.0, 0.1, &DetectionOptions::default());

        assert_eq!(graph.nodes.len(), 4, "four corners expected");
        assert_eq!(graph.edges.len(), 4);
        for node in 0..graph.nodes.len() {
            assert_eq!(graph.node_role(node), NodeRole::Corner);
        }
    }

    #[test]
    fn test_duplicate_and_zero_length_edges_dropped() {
        let mask = GrayImage::new(100, 100);
        let segments = vec![
            LineSegment::new(Point2D::new(10.0, 10.0), Point2D::new(90.0, 10.0)),
            // Duplicate of the first, jittered within tolerance
            LineSegment::new(Point2D::new(10.5, 10.5), Point2D::new(89.5, 9.5)),
            // Collapses to a point after snapping
            LineSegment::new(Point2D::new(50.0, 50.0), Point2D::new(51.0, 50.5)),
        ];
        let graph = build_wall_graph(&segments, &mask, 20.0, 0.1, &DetectionOptions::default());
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn test_confidence_on_mask_beats_off_mask() {
        let mask = mask_with_rect_outline(200, 20, 180);
        let on_mask = vec![LineSegment::new(
            Point2D::new(20.0, 20.0),
            Point2D::new(180.0, 20.0),
        )];
        let off_mask = vec![LineSegment::new(
            Point2D::new(20.0, 100.0),
            Point2D::new(180.0, 100.0),
        )];
        let options = DetectionOptions::default();
        let g1 = build_wall_graph(&on_mask, &mask, 30.0, 0.1, &options);
        let g2 = build_wall_graph(&off_mask, &mask, 30.0, 0.1, &options);
        assert!(g1.edges[0].confidence > g2.edges[0].confidence);
    }

    #[test]
    fn test_short_segment_confidence_halved() {
        let mask = mask_with_rect_outline(200, 20, 180);
        let long = vec![LineSegment::new(
            Point2D::new(20.0, 20.0),
            Point2D::new(180.0, 20.0),
        )];
        // Same support but barely above minimum length
        let short = vec![LineSegment::new(
            Point2D::new(20.0, 20.0),
            Point2D::new(55.0, 20.0),
        )];
        let options = DetectionOptions::default();
        let g_long = build_wall_graph(&long, &mask, 30.0, 0.1, &options);
        let g_short = build_wall_graph(&short, &mask, 30.0, 0.1, &options);
        assert!(g_short.edges[0].confidence < g_long.edges[0].confidence * 0.75);
    }

    #[test]
    fn test_confidence_clamped() {
        let mask = mask_with_rect_outline(400, 20, 380);
        let segments = square_segments(20.0, 380.0);
        let graph = build_wall_graph(&segments, &mask, 30.0, 0.1, &DetectionOptions::default());
        for edge in &graph.edges {
            assert!((0.0..=1.0).contains(&edge.confidence));
        }
    }

    #[test]
    fn test_junction_classification() {
        let mask = GrayImage::new(200, 200);
        // T-junction at (100, 100)
        let segments = vec![
            LineSegment::new(Point2D::new(20.0, 100.0), Point2D::new(100.0, 100.0)),
            LineSegment::new(Point2D::new(100.0, 100.0), Point2D::new(180.0, 100.0)),
            LineSegment::new(Point2D::new(100.0, 100.0), Point2D::new(100.0, 180.0)),
        ];
        let graph = build_wall_graph(&segments, &mask, 30.0, 0.1, &DetectionOptions::default());
        let junction = (0..graph.nodes.len())
            .find(|&n| graph.nodes[n].position.distance_to(&Point2D::new(100.0, 100.0)) < 2.0)
            .unwrap();
        assert_eq!(graph.node_role(junction), NodeRole::Junction);
    }
}

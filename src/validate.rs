// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Room validation and classification.
//!
//! Enclosure quality is the fraction of boundary samples adjacent to wall
//! pixels. Corridor-like and degenerate shapes are tagged so the caller
//! and the refinement loop can treat them differently from real rooms.

use crate::rooms::sample_boundary;
use crate::segments::probe;
use crate::types::{clamp_confidence, DetectionOptions, RoomCandidate, RoomStatus};
use image::GrayImage;
use tracing::debug;

/// Search radius (px) around a boundary sample when testing wall adjacency.
pub const WALL_SEARCH_RADIUS: i32 = 5;

/// Enclosure score: fraction of sampled boundary points within the search
/// radius of a wall pixel. Always in [0, 1].
pub fn enclosure_score(candidate: &RoomCandidate, wall_mask: &GrayImage) -> f64 {
    let samples = sample_boundary(&candidate.polygon, 3.0);
    if samples.is_empty() {
        return 0.0;
    }
    let hits = samples
        .iter()
        .filter(|p| probe(wall_mask, p.x, p.y, WALL_SEARCH_RADIUS))
        .count();
    hits as f64 / samples.len() as f64
}

/// Validate and classify every candidate in place: enclosure score, status
/// tag, confidence, then pairwise adjacency.
pub fn validate_rooms(
    candidates: &mut [RoomCandidate],
    wall_mask: &GrayImage,
    options: &DetectionOptions,
) {
    let image_diag = ((wall_mask.width() as f64).powi(2) + (wall_mask.height() as f64).powi(2)).sqrt();

    for candidate in candidates.iter_mut() {
        candidate.enclosure_score = enclosure_score(candidate, wall_mask);
        candidate.status = classify(candidate, options);
        // Confidence follows enclosure quality, discounted for suspect shapes.
        let base = 0.3 + 0.6 * candidate.enclosure_score as f32;
        candidate.confidence = clamp_confidence(match candidate.status {
            RoomStatus::ValidEnclosedRoom => base,
            RoomStatus::ValidOpenSpaceRoom => base * 0.8,
            RoomStatus::CorridorLikeRegion => base * 0.5,
            RoomStatus::InvalidRegion => base * 0.3,
        });
    }

    compute_adjacency(candidates, image_diag);

    debug!(
        enclosed = candidates
            .iter()
            .filter(|c| c.status == RoomStatus::ValidEnclosedRoom)
            .count(),
        open = candidates
            .iter()
            .filter(|c| c.status == RoomStatus::ValidOpenSpaceRoom)
            .count(),
        corridor = candidates
            .iter()
            .filter(|c| c.status == RoomStatus::CorridorLikeRegion)
            .count(),
        total = candidates.len(),
        "room validation"
    );
}

fn classify(candidate: &RoomCandidate, options: &DetectionOptions) -> RoomStatus {
    // Perimeter/area is evaluated in pixel space so the threshold is
    // independent of the drawing's scale factor.
    let px_area = crate::types::polygon_area(&candidate.polygon);
    let px_perimeter = crate::types::polygon_perimeter(&candidate.polygon);
    let corridor_like = candidate.aspect_ratio() > options.corridor_aspect_ratio
        || (px_area > 0.0 && px_perimeter / px_area > options.corridor_perimeter_area_ratio);
    if corridor_like {
        return RoomStatus::CorridorLikeRegion;
    }

    let in_area_bounds =
        candidate.area >= options.min_room_area && candidate.area <= options.max_room_area;
    if !in_area_bounds {
        return RoomStatus::InvalidRegion;
    }

    if candidate.enclosure_score > 0.75 {
        RoomStatus::ValidEnclosedRoom
    } else if candidate.enclosure_score < 0.5 {
        // Open-plan space: weak wall adjacency but otherwise plausible.
        RoomStatus::ValidOpenSpaceRoom
    } else {
        RoomStatus::InvalidRegion
    }
}

/// Adjacency approximated by centroid proximity, normalized by the image
/// diagonal.
fn compute_adjacency(candidates: &mut [RoomCandidate], image_diag: f64) {
    const ADJACENCY_THRESHOLD: f64 = 0.1;

    let centroids: Vec<_> = candidates.iter().map(|c| c.centroid()).collect();
    for candidate in candidates.iter_mut() {
        candidate.adjacent_rooms.clear();
    }
    for i in 0..centroids.len() {
        for j in (i + 1)..centroids.len() {
            let normalized = centroids[i].distance_to(&centroids[j]) / image_diag;
            if normalized < ADJACENCY_THRESHOLD {
                candidates[i].adjacent_rooms.push(j);
                candidates[j].adjacent_rooms.push(i);
            }
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core types for the detection pipeline and its output contract.
//!
//! All externally visible geometry uses normalized (0-1) coordinates
//! relative to the original, pre-resize image. Internal stages work in
//! pixel space of the (possibly downscaled) working image.

use serde::{Deserialize, Serialize};

/// A 2D point (simplified for serialization)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point2D) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Straight line candidate in working-image pixel space.
///
/// Ephemeral: produced by the segment extractor, consumed by the graph
/// builder, never emitted to callers.
#[derive(Debug, Clone)]
pub struct LineSegment {
    pub start: Point2D,
    pub end: Point2D,
}

impl LineSegment {
    pub fn new(start: Point2D, end: Point2D) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.start.distance_to(&self.end)
    }

    pub fn angle(&self) -> f64 {
        (self.end.y - self.start.y).atan2(self.end.x - self.start.x)
    }

    pub fn midpoint(&self) -> Point2D {
        Point2D::new(
            (self.start.x + self.end.x) / 2.0,
            (self.start.y + self.end.y) / 2.0,
        )
    }

    /// True when within `tolerance` radians of horizontal or vertical.
    pub fn is_axis_aligned(&self, tolerance: f64) -> bool {
        let a = self.angle().abs();
        let pi = std::f64::consts::PI;
        a < tolerance || a > pi - tolerance || (a - pi / 2.0).abs() < tolerance
    }
}

/// Coarse classification attached to recognized text by the OCR collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    RoomLabel,
    Dimension,
    Note,
    Annotation,
    Other,
}

/// Recognized text element supplied by the external OCR stage.
///
/// Read-only input: `RoomLabel` elements seed room extraction, `Dimension`
/// elements feed the dimension-string exclusion mask. Bounding boxes are
/// normalized (0-1) like all external geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextElement {
    pub text: String,
    /// Normalized bounding box: x, y of top-left corner plus width/height.
    pub bbox: BoundingBox,
    pub confidence: f32,
    #[serde(rename = "type")]
    pub kind: TextKind,
}

/// Axis-aligned bounding box in normalized coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> Point2D {
        Point2D::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, p: &Point2D) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    /// Grow the box by `margin` on every side.
    pub fn inflate(&self, margin: f64) -> Self {
        Self {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + 2.0 * margin,
            height: self.height + 2.0 * margin,
        }
    }
}

/// Validation status assigned to a room candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    ValidEnclosedRoom,
    ValidOpenSpaceRoom,
    CorridorLikeRegion,
    InvalidRegion,
}

/// Room usage classified from label text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Bedroom,
    Kitchen,
    Bathroom,
    LivingRoom,
    DiningRoom,
    Office,
    Closet,
    Hallway,
    Garage,
    Laundry,
    Other,
}

impl RoomType {
    /// Keyword classification against a room label. Case-insensitive,
    /// first match wins; unlabeled or unrecognized text maps to `Other`.
    pub fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        const KEYWORDS: &[(&[&str], RoomType)] = &[
            (&["bed", "master", "guest room"], RoomType::Bedroom),
            (&["kitchen", "pantry"], RoomType::Kitchen),
            (&["bath", "toilet", "wc", "powder"], RoomType::Bathroom),
            (&["living", "family", "lounge", "great room"], RoomType::LivingRoom),
            (&["dining", "breakfast"], RoomType::DiningRoom),
            (&["office", "study", "den"], RoomType::Office),
            (&["closet", "storage", "wardrobe"], RoomType::Closet),
            (&["hall", "corridor", "foyer", "entry"], RoomType::Hallway),
            (&["garage", "carport"], RoomType::Garage),
            (&["laundry", "utility", "mud"], RoomType::Laundry),
        ];
        for (words, kind) in KEYWORDS {
            if words.iter().any(|w| lower.contains(w)) {
                return *kind;
            }
        }
        RoomType::Other
    }
}

/// Room candidate flowing through extraction, validation and refinement.
///
/// Polygon points are in working-image pixel space until the pipeline
/// finalizes candidates into [`Room`] values.
#[derive(Debug, Clone)]
pub struct RoomCandidate {
    /// Ordered boundary ring in working-image pixels, >= 3 points.
    pub polygon: Vec<Point2D>,
    /// Real-world area (square units of the scale factor).
    pub area: f64,
    /// Real-world perimeter.
    pub perimeter: f64,
    pub confidence: f32,
    pub label_text: Option<String>,
    pub room_type: Option<RoomType>,
    pub status: RoomStatus,
    /// Fraction of the boundary adjacent to detected wall pixels.
    pub enclosure_score: f64,
    /// Indices of adjacent candidates in the same extraction batch.
    pub adjacent_rooms: Vec<usize>,
}

impl RoomCandidate {
    /// Build a candidate from a pixel-space polygon, computing real-world
    /// area and perimeter via the working scale factor. Returns `None` for
    /// degenerate polygons (< 3 points or zero area).
    pub fn from_polygon(polygon: Vec<Point2D>, scale_factor: f64) -> Option<Self> {
        if polygon.len() < 3 {
            return None;
        }
        let px_area = polygon_area(&polygon);
        if px_area <= 0.0 {
            return None;
        }
        let area = px_area * scale_factor * scale_factor;
        let perimeter = polygon_perimeter(&polygon) * scale_factor;
        Some(Self {
            polygon,
            area,
            perimeter,
            confidence: 0.5,
            label_text: None,
            room_type: None,
            status: RoomStatus::InvalidRegion,
            enclosure_score: 0.0,
            adjacent_rooms: Vec::new(),
        })
    }

    pub fn centroid(&self) -> Point2D {
        polygon_centroid(&self.polygon)
    }

    /// Width/height ratio of the axis-aligned bounding box, always >= 1.
    pub fn aspect_ratio(&self) -> f64 {
        let (min_x, min_y, max_x, max_y) = polygon_bounds(&self.polygon);
        let w = (max_x - min_x).max(1e-9);
        let h = (max_y - min_y).max(1e-9);
        (w / h).max(h / w)
    }
}

/// Area of a polygon ring via the shoelace formula (absolute value).
pub fn polygon_area(points: &[Point2D]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x * points[j].y;
        area -= points[j].x * points[i].y;
    }
    (area / 2.0).abs()
}

/// Closed-ring perimeter.
pub fn polygon_perimeter(points: &[Point2D]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        total += points[i].distance_to(&points[j]);
    }
    total
}

/// Arithmetic mean of the ring's vertices.
pub fn polygon_centroid(points: &[Point2D]) -> Point2D {
    if points.is_empty() {
        return Point2D::new(0.0, 0.0);
    }
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    Point2D::new(cx, cy)
}

/// Axis-aligned bounds of a ring: (min_x, min_y, max_x, max_y).
pub fn polygon_bounds(points: &[Point2D]) -> (f64, f64, f64, f64) {
    let mut min_x = f64::MAX;
    let mut min_y = f64::MAX;
    let mut max_x = f64::MIN;
    let mut max_y = f64::MIN;
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    (min_x, min_y, max_x, max_y)
}

/// Finalized room in the output contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Boundary ring, normalized 0-1.
    pub points: Vec<Point2D>,
    /// Real-world area (square units of the scale factor).
    pub area: f64,
    /// Real-world perimeter.
    pub perimeter: f64,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_type: Option<RoomType>,
}

/// Finalized wall in the output contract: the external projection of a
/// wall-graph edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WallSegment {
    /// Normalized 0-1.
    pub start: Point2D,
    /// Normalized 0-1.
    pub end: Point2D,
    /// Real-world length.
    pub length: f64,
    pub confidence: f32,
    /// Real-world thickness when a parallel pair was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thickness: Option<f64>,
}

/// Door vs window classification for a detected opening.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OpeningKind {
    Door,
    Window,
}

/// Opening span across a detected rectangle, normalized endpoints with
/// real-world width.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpeningSpan {
    pub start: Point2D,
    pub end: Point2D,
    pub width: f64,
}

/// Detected door or window. Independent of the wall graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opening {
    #[serde(rename = "type")]
    pub kind: OpeningKind,
    /// Normalized bounding box.
    pub bbox: BoundingBox,
    pub opening: OpeningSpan,
    pub confidence: f32,
}

/// Detection options exposed to the caller. All fields have documented
/// defaults; real-world thresholds are in the same length unit as the
/// scale factor (feet in the host system).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionOptions {
    /// Minimum room area in square units. Default 50.
    pub min_room_area: f64,
    /// Maximum room area in square units; larger regions are treated as
    /// building outline or background. Default 5000.
    pub max_room_area: f64,
    /// Minimum wall length in linear units. Default 2.
    pub min_wall_length: f64,
    /// Canny low threshold. Default 50.
    pub edge_threshold1: f32,
    /// Canny high threshold. Default 150.
    pub edge_threshold2: f32,
    /// Polygon simplification epsilon as a fraction of the perimeter.
    /// Default 0.02.
    #[serde(rename = "contourApproximationEpsilon")]
    pub contour_epsilon: f64,
    /// Titleblock/legend exclusion margins as image fractions:
    /// segments are kept only when their midpoint lies inside
    /// x in [left, right], y in [top, bottom].
    pub exclusion_left: f64,
    pub exclusion_right: f64,
    pub exclusion_top: f64,
    pub exclusion_bottom: f64,
    /// Endpoint snap tolerance in pixels. Default 3.
    pub snap_tolerance: f64,
    /// Edge-confidence weights: length, mask overlap, local density,
    /// axis alignment. Default 0.3/0.3/0.2/0.2.
    pub confidence_weights: [f32; 4],
    /// Refinement iteration cap. Default 3.
    pub max_refinement_iterations: usize,
    /// Refinement stops when average enclosure improves less than this.
    /// Default 0.05.
    pub convergence_threshold: f64,
    /// Maximum room bounding-box aspect ratio at extraction time. Default 15.
    pub max_room_aspect_ratio: f64,
    /// Aspect ratio above which a candidate is corridor-like. Default 5.
    pub corridor_aspect_ratio: f64,
    /// Perimeter/area ratio above which a candidate is corridor-like.
    /// Default 0.3.
    pub corridor_perimeter_area_ratio: f64,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            min_room_area: 50.0,
            max_room_area: 5000.0,
            min_wall_length: 2.0,
            edge_threshold1: 50.0,
            edge_threshold2: 150.0,
            contour_epsilon: 0.02,
            exclusion_left: 0.05,
            exclusion_right: 0.85,
            exclusion_top: 0.10,
            exclusion_bottom: 0.90,
            snap_tolerance: 3.0,
            confidence_weights: [0.3, 0.3, 0.2, 0.2],
            max_refinement_iterations: 3,
            convergence_threshold: 0.05,
            max_room_aspect_ratio: 15.0,
            corridor_aspect_ratio: 5.0,
            corridor_perimeter_area_ratio: 0.3,
        }
    }
}

impl DetectionOptions {
    /// Reject option sets that cannot produce meaningful geometry.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_room_area <= 0.0 || self.max_room_area <= self.min_room_area {
            return Err("room area bounds must satisfy 0 < min < max".into());
        }
        if self.min_wall_length <= 0.0 {
            return Err("minWallLength must be positive".into());
        }
        if self.edge_threshold1 <= 0.0 || self.edge_threshold2 <= self.edge_threshold1 {
            return Err("edge thresholds must satisfy 0 < low < high".into());
        }
        if self.contour_epsilon <= 0.0 || self.contour_epsilon >= 1.0 {
            return Err("contourApproximationEpsilon must be in (0, 1)".into());
        }
        let weight_sum: f32 = self.confidence_weights.iter().sum();
        if (weight_sum - 1.0).abs() > 0.01 {
            return Err("confidence weights must sum to 1".into());
        }
        Ok(())
    }
}

/// Complete detection result: the only contract the surrounding system
/// depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub rooms: Vec<Room>,
    pub walls: Vec<WallSegment>,
    pub doors: Vec<Opening>,
    pub windows: Vec<Opening>,
    /// Original (pre-resize) image width in pixels.
    pub image_width: u32,
    /// Original (pre-resize) image height in pixels.
    pub image_height: u32,
    /// Wall-clock processing time in milliseconds.
    pub processing_time: f64,
}

/// Clamp a confidence to [0, 1]; intermediate math may overflow the range.
pub fn clamp_confidence(c: f32) -> f32 {
    c.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_polygon_area_square() {
        let square = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(10.0, 0.0),
            Point2D::new(10.0, 10.0),
            Point2D::new(0.0, 10.0),
        ];
        assert_relative_eq!(polygon_area(&square), 100.0);
        assert_relative_eq!(polygon_perimeter(&square), 40.0);
    }

    #[test]
    fn test_room_candidate_real_world_units() {
        // 100x100 px square at 0.1 units/px -> 10x10 units -> 100 sq units
        let square = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(100.0, 0.0),
            Point2D::new(100.0, 100.0),
            Point2D::new(0.0, 100.0),
        ];
        let room = RoomCandidate::from_polygon(square, 0.1).unwrap();
        assert_relative_eq!(room.area, 100.0, epsilon = 1e-9);
        assert_relative_eq!(room.perimeter, 40.0, epsilon = 1e-9);
    }

    #[test]
    fn test_room_candidate_rejects_degenerate() {
        assert!(RoomCandidate::from_polygon(vec![], 1.0).is_none());
        let line = vec![Point2D::new(0.0, 0.0), Point2D::new(5.0, 0.0)];
        assert!(RoomCandidate::from_polygon(line, 1.0).is_none());
        let collinear = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(5.0, 0.0),
            Point2D::new(10.0, 0.0),
        ];
        assert!(RoomCandidate::from_polygon(collinear, 1.0).is_none());
    }

    #[test]
    fn test_room_type_keywords() {
        assert_eq!(RoomType::from_label("Master Bedroom"), RoomType::Bedroom);
        assert_eq!(RoomType::from_label("KITCHEN"), RoomType::Kitchen);
        assert_eq!(RoomType::from_label("Bath 2"), RoomType::Bathroom);
        assert_eq!(RoomType::from_label("Mech. Room"), RoomType::Other);
    }

    #[test]
    fn test_options_validation() {
        assert!(DetectionOptions::default().validate().is_ok());
        let bad = DetectionOptions {
            min_room_area: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad_weights = DetectionOptions {
            confidence_weights: [0.5, 0.5, 0.5, 0.5],
            ..Default::default()
        };
        assert!(bad_weights.validate().is_err());
    }

    #[test]
    fn test_options_wire_names() {
        let options: DetectionOptions = serde_json::from_value(serde_json::json!({
            "contourApproximationEpsilon": 0.05,
            "minRoomArea": 80.0,
        }))
        .unwrap();
        assert!((options.contour_epsilon - 0.05).abs() < 1e-12);
        assert!((options.min_room_area - 80.0).abs() < 1e-12);

        let json = serde_json::to_value(&DetectionOptions::default()).unwrap();
        assert!(json.get("contourApproximationEpsilon").is_some());
        assert!(json.get("contourEpsilon").is_none());
    }

    #[test]
    fn test_aspect_ratio_corridor() {
        let corridor = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(200.0, 0.0),
            Point2D::new(200.0, 10.0),
            Point2D::new(0.0, 10.0),
        ];
        let room = RoomCandidate::from_polygon(corridor, 1.0).unwrap();
        assert!(room.aspect_ratio() > 15.0);
    }

    #[test]
    fn test_result_serialization_contract() {
        let result = DetectionResult {
            rooms: vec![Room {
                points: vec![
                    Point2D::new(0.1, 0.1),
                    Point2D::new(0.9, 0.1),
                    Point2D::new(0.9, 0.9),
                ],
                area: 100.0,
                perimeter: 40.0,
                confidence: 0.8,
                room_label: Some("Kitchen".into()),
                room_type: Some(RoomType::Kitchen),
            }],
            walls: Vec::new(),
            doors: Vec::new(),
            windows: Vec::new(),
            image_width: 1000,
            image_height: 800,
            processing_time: 12.5,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["imageWidth"], 1000);
        assert_eq!(json["rooms"][0]["roomLabel"], "Kitchen");
        assert_eq!(json["rooms"][0]["roomType"], "kitchen");
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy for the detection engine.
//!
//! Only unrecoverable input errors surface here. Stage failures degrade
//! to fallback strategies inside the pipeline, and empty detection
//! results are valid outputs, not errors.

use thiserror::Error;

/// Fatal input errors; the request fails with no partial output.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("image could not be decoded: {0}")]
    UndecodableImage(String),

    #[error("image {width}x{height} is below the minimum usable size {min}x{min}")]
    ImageTooSmall { width: u32, height: u32, min: u32 },

    #[error("scale factor must be positive and finite, got {0}")]
    InvalidScaleFactor(f64),

    #[error("invalid detection options: {0}")]
    InvalidOptions(String),
}

/// Failure loading or running a learned segmentation model. Recoverable:
/// the pipeline falls back to the morphological mask path.
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("segmentation model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("segmentation inference failed: {0}")]
    InferenceFailed(String),

    #[error("segmentation output shape mismatch: {0}")]
    BadOutput(String),
}

//! Point-source detection: background estimation, thresholding, connected components.

mod background;
mod detection;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Detection, GrayFrame};

use detection::DetectionParams;

/// Detector configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Foreground threshold in σ above background.
    pub detection_sigma: f32,
    /// Explicit threshold above background, in frame units. Overrides `detection_sigma`.
    pub absolute_threshold: Option<f32>,
    /// Reject connected components with fewer pixels than this (filters hot pixels).
    pub min_star_area: usize,
    /// Reject connected components with more pixels than this (filters galaxies/nebulae).
    pub max_star_area: usize,
    /// Reject blobs whose bounding box is more elongated than this.
    pub max_aspect_ratio: f32,
    /// Keep only the brightest N detections.
    pub max_stars: usize,
    /// Peak at or above `fraction × white_level` marks a detection saturated.
    pub saturation_fraction: f32,
    /// Drop saturated blobs instead of flagging them.
    pub reject_saturated: bool,
    /// Mesh-grid background cell size (handles gradients). `None` = global background.
    pub background_mesh: Option<usize>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            detection_sigma: 5.0,
            absolute_threshold: None,
            min_star_area: 5,
            max_star_area: 2000,
            max_aspect_ratio: 3.0,
            max_stars: 200,
            saturation_fraction: 0.95,
            reject_saturated: false,
            background_mesh: None,
        }
    }
}

/// Whether the frame carries usable signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputQuality {
    Good,
    /// Every pixel is zero (or non-finite).
    Blank,
    /// No spatial variation at all.
    Uniform,
    /// Every pixel is at the saturation level.
    Saturated,
}

impl InputQuality {
    pub fn is_degenerate(self) -> bool {
        self != InputQuality::Good
    }
}

/// Full detection result for a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    /// Sorted by flux descending, capped at `max_stars`.
    pub detections: Vec<Detection>,
    /// Total detections before the `max_stars` cap.
    pub stars_detected: usize,
    /// Global background level.
    pub background: f32,
    /// Background noise sigma.
    pub noise: f32,
    /// Actual detection threshold used (above background).
    pub threshold: f32,
    pub quality: InputQuality,
}

/// Detect point sources in `frame`.
///
/// Zero blobs is a valid result. Degenerate frames yield no detections and a
/// non-`Good` [`InputQuality`].
pub fn detect_points(frame: &GrayFrame, config: &DetectionConfig) -> DetectionResult {
    let (data, width, height) = (frame.data(), frame.width(), frame.height());
    let white_level = frame.white_level();
    let saturation_limit = config.saturation_fraction * white_level;

    let quality = assess_quality(data, saturation_limit);
    if quality.is_degenerate() {
        warn!(?quality, "Degenerate input frame, skipping detection");
        return DetectionResult {
            detections: Vec::new(),
            stars_detected: 0,
            background: data.first().copied().filter(|v| v.is_finite()).unwrap_or(0.0),
            noise: 0.0,
            threshold: 0.0,
            quality,
        };
    }

    // Quantization-level floor so noise-free frames still get a finite threshold
    let noise_floor = white_level / 4096.0;
    let bg = match config.background_mesh {
        Some(cell_size) => {
            background::estimate_background_mesh(data, width, height, cell_size, noise_floor)
        }
        None => background::estimate_background(data, width, height, noise_floor),
    };

    let threshold = config
        .absolute_threshold
        .unwrap_or(config.detection_sigma * bg.noise);

    let params = DetectionParams {
        threshold,
        min_star_area: config.min_star_area.max(1),
        max_star_area: config.max_star_area,
        saturation_limit,
        reject_saturated: config.reject_saturated,
        max_aspect_ratio: config.max_aspect_ratio.max(1.0),
        max_stars: config.max_stars.max(1),
        min_separation: 1.0,
    };

    let (detections, stars_detected) = detection::detect_stars(data, width, height, &bg, &params);
    debug!(
        background = bg.background,
        noise = bg.noise,
        threshold,
        stars_detected,
        "Detection pass finished"
    );

    DetectionResult {
        detections,
        stars_detected,
        background: bg.background,
        noise: bg.noise,
        threshold,
        quality,
    }
}

fn assess_quality(data: &[f32], saturation_limit: f32) -> InputQuality {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in data.iter().filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }

    if min > max || (min == 0.0 && max == 0.0) {
        InputQuality::Blank
    } else if min >= saturation_limit {
        InputQuality::Saturated
    } else if max - min <= f32::EPSILON * max.abs().max(1.0) {
        InputQuality::Uniform
    } else {
        InputQuality::Good
    }
}

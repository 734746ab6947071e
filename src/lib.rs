//! Star identification for night-sky photographs.
//!
//! Bright point sources are detected in a luminance frame, matched against a star
//! catalog by triangle similarity, named with a confidence score and drawn onto an
//! annotated copy of the image.

pub mod analysis;
pub mod annotate;
pub mod catalog;
pub mod error;
mod glyphs;
pub mod matching;
pub mod pipeline;
pub mod processing;
pub mod resolve;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use analysis::{detect_points, DetectionConfig, DetectionResult, InputQuality};
pub use annotate::{annotate, annotate_dynamic, compute_annotations, AnnotationConfig, StarAnnotation};
pub use catalog::{CatalogIndex, CatalogStar};
pub use error::{FailureKind, SolveError};
pub use matching::transform::{Parity, SkyTransform};
pub use matching::{
    match_transform, solve, solve_with_cancel, CancelToken, CandidateTransform, Correspondence,
    Solution, SolveStats, ToleranceConfig,
};
pub use pipeline::{AnnotatedIdentification, Identified, PipelineStage, StarIdentifier, DEFAULT_SCALING_FACTOR};
pub use resolve::{confidence_score, ConfidenceParams};
pub use types::{
    load_frame, Detection, GrayFrame, Identification, ReportParameters, SolveReport, StarReport,
};

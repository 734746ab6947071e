use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use tracing::{debug, info, warn};

use crate::analysis::{detect_points, DetectionConfig, DetectionResult};
use crate::annotate::{annotate_dynamic, AnnotationConfig};
use crate::catalog::CatalogIndex;
use crate::error::SolveError;
use crate::matching::{match_transform, CancelToken, Solution, ToleranceConfig};
use crate::resolve::resolve;
use crate::types::{GrayFrame, ReportParameters, SolveReport};

/// Default camera scaling factor (pixels per degree).
pub const DEFAULT_SCALING_FACTOR: f64 = 18.18;

/// Where an identification run is, or where it stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Detecting,
    Matching,
    Resolving,
    Annotated,
    Failed,
}

/// Detection plus solve output for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Identified {
    pub detection: DetectionResult,
    pub solution: Solution,
}

/// [`Identified`] with the rendered overlay.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedIdentification {
    pub identified: Identified,
    pub annotated: RgbImage,
}

/// Star identifier with builder pattern.
pub struct StarIdentifier {
    scaling_factor: f64,
    detection: DetectionConfig,
    tolerance: ToleranceConfig,
    annotation: AnnotationConfig,
    thread_pool: Option<Arc<rayon::ThreadPool>>,
}

impl StarIdentifier {
    pub fn new() -> Self {
        StarIdentifier {
            scaling_factor: DEFAULT_SCALING_FACTOR,
            detection: DetectionConfig::default(),
            tolerance: ToleranceConfig::default(),
            annotation: AnnotationConfig::default(),
            thread_pool: None,
        }
    }

    /// Nominal image scale in pixels per degree.
    pub fn with_scaling_factor(mut self, pixels_per_degree: f64) -> Self {
        self.scaling_factor = pixels_per_degree;
        self
    }

    /// Global tolerance multiplier for matching and identification.
    pub fn with_match_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance.match_tolerance = tolerance;
        self
    }

    /// Star detection threshold in σ above background.
    pub fn with_detection_sigma(mut self, sigma: f32) -> Self {
        self.detection.detection_sigma = sigma.max(1.0);
        self
    }

    /// Reject connected components with fewer pixels than this (filters hot pixels).
    pub fn with_min_star_area(mut self, area: usize) -> Self {
        self.detection.min_star_area = area.max(1);
        self
    }

    /// Reject connected components with more pixels than this (filters galaxies/nebulae).
    pub fn with_max_star_area(mut self, area: usize) -> Self {
        self.detection.max_star_area = area;
        self
    }

    /// Keep only the brightest N detections.
    pub fn with_max_stars(mut self, n: usize) -> Self {
        self.detection.max_stars = n.max(1);
        self
    }

    /// Enable mesh-grid background estimation with given cell size (handles gradients).
    pub fn with_background_mesh(mut self, cell_size: usize) -> Self {
        self.detection.background_mesh = Some(cell_size.max(16));
        self
    }

    /// Give up on the triangle search after this long.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.tolerance.timeout = Some(timeout);
        self
    }

    pub fn with_detection_config(mut self, config: DetectionConfig) -> Self {
        self.detection = config;
        self
    }

    pub fn with_tolerance_config(mut self, config: ToleranceConfig) -> Self {
        self.tolerance = config;
        self
    }

    pub fn with_annotation_config(mut self, config: AnnotationConfig) -> Self {
        self.annotation = config;
        self
    }

    /// Use a custom rayon thread pool.
    pub fn with_thread_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
        self.thread_pool = Some(pool);
        self
    }

    pub fn scaling_factor(&self) -> f64 {
        self.scaling_factor
    }

    pub fn report_parameters(&self) -> ReportParameters {
        ReportParameters {
            camera_scaling_factor: self.scaling_factor,
            al_parameter: self.tolerance.match_tolerance,
        }
    }

    /// Detect, match, and resolve stars in a luminance frame.
    pub fn identify(&self, frame: &GrayFrame, index: &CatalogIndex) -> Result<Identified, SolveError> {
        self.identify_with_cancel(frame, index, &CancelToken::new())
    }

    pub fn identify_with_cancel(
        &self,
        frame: &GrayFrame,
        index: &CatalogIndex,
        cancel: &CancelToken,
    ) -> Result<Identified, SolveError> {
        match &self.thread_pool {
            Some(pool) => pool.install(|| self.run(frame, index, cancel)),
            None => self.run(frame, index, cancel),
        }
    }

    /// Full run on a decoded image, ending with the annotated copy.
    pub fn identify_image(
        &self,
        image: &DynamicImage,
        index: &CatalogIndex,
    ) -> Result<AnnotatedIdentification, SolveError> {
        let frame = GrayFrame::from_image(image).map_err(|e| SolveError::InputError(format!("{:#}", e)))?;
        let identified = self.identify(&frame, index)?;
        let annotated = annotate_dynamic(image, &identified.solution.identifications, &self.annotation);
        debug!(stage = ?PipelineStage::Annotated, "Annotation rendered");
        Ok(AnnotatedIdentification {
            identified,
            annotated,
        })
    }

    /// Decode an image file and run [`identify_image`](Self::identify_image).
    ///
    /// File errors surface as `Err`; identification failures come back inside the report.
    pub fn identify_file<P: AsRef<Path>>(
        &self,
        path: P,
        index: &CatalogIndex,
    ) -> Result<(SolveReport, Option<RgbImage>)> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to decode image {}", path.display()))?;
        Ok(self.report(&image, index))
    }

    /// Run on a decoded image and package the outcome as a [`SolveReport`].
    pub fn report(&self, image: &DynamicImage, index: &CatalogIndex) -> (SolveReport, Option<RgbImage>) {
        match self.identify_image(image, index) {
            Ok(done) => (
                SolveReport::success(&done.identified.solution.identifications, self.report_parameters()),
                Some(done.annotated),
            ),
            Err(e) => (SolveReport::failure(&e, self.report_parameters()), None),
        }
    }

    fn run(&self, frame: &GrayFrame, index: &CatalogIndex, cancel: &CancelToken) -> Result<Identified, SolveError> {
        let mut stage = PipelineStage::Idle;
        let result = self.run_stages(frame, index, cancel, &mut stage);
        if let Err(e) = &result {
            warn!(failed_at = ?stage, kind = ?e.kind(), "Identification failed: {}", e);
            debug!(stage = ?PipelineStage::Failed, "Pipeline stopped");
        }
        result
    }

    fn run_stages(
        &self,
        frame: &GrayFrame,
        index: &CatalogIndex,
        cancel: &CancelToken,
        stage: &mut PipelineStage,
    ) -> Result<Identified, SolveError> {
        if index.is_empty() {
            return Err(SolveError::CatalogUnavailable);
        }

        *stage = PipelineStage::Detecting;
        let detection = detect_points(frame, &self.detection);
        if detection.quality.is_degenerate() {
            return Err(SolveError::InputError(format!(
                "degenerate image ({:?})",
                detection.quality
            )));
        }
        info!("Detected {} stars", detection.detections.len());

        *stage = PipelineStage::Matching;
        let (transform, stats) = match_transform(
            &detection.detections,
            index,
            self.scaling_factor,
            &self.tolerance,
            cancel,
        )?;

        *stage = PipelineStage::Resolving;
        let identifications = resolve(
            &detection.detections,
            &transform.transform,
            index,
            self.tolerance.identify_tolerance(),
            &self.tolerance.confidence,
        )?;
        info!("Identified {} stars", identifications.len());

        let solution = Solution {
            transform,
            identifications,
            stats,
        };
        Ok(Identified {
            detection,
            solution,
        })
    }
}

impl Default for StarIdentifier {
    fn default() -> Self {
        Self::new()
    }
}

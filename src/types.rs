use std::path::Path;

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogStar;
use crate::processing::color;

/// Single-channel intensity image handed to the detector.
///
/// Fields are private so that `data` always holds `width × height` values.
#[derive(Clone, Debug, PartialEq)]
pub struct GrayFrame {
    /// Row-major luminance values.
    data: Vec<f32>,
    width: usize,
    height: usize,
    /// Value of a fully saturated pixel (1.0 for normalized data, 255 for 8-bit, ...).
    white_level: f32,
}

impl GrayFrame {
    /// Wrap row-major mono data.
    pub fn new(data: Vec<f32>, width: usize, height: usize, white_level: f32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("Frame dimensions must be non-zero, got {}x{}", width, height);
        }
        if data.len() != width * height {
            bail!(
                "Frame data length {} does not match {}x{}",
                data.len(),
                width,
                height
            );
        }
        if white_level.is_nan() || white_level <= 0.0 {
            bail!("White level must be positive, got {}", white_level);
        }
        Ok(GrayFrame {
            data,
            width,
            height,
            white_level,
        })
    }

    /// Build a frame from planar f32 data (for 3-channel: RRRGGGBBB layout).
    pub fn from_planar(
        data: &[f32],
        width: usize,
        height: usize,
        channels: usize,
        white_level: f32,
    ) -> Result<Self> {
        let plane = width * height;
        let lum = match channels {
            1 if data.len() >= plane => data[..plane].to_vec(),
            3 if data.len() >= 3 * plane => color::extract_luminance(data, width, height),
            1 | 3 => bail!(
                "Planar data too short: {} values for {}x{}x{}",
                data.len(),
                width,
                height,
                channels
            ),
            n => bail!("Unsupported channel count: {}", n),
        };
        GrayFrame::new(lum, width, height, white_level)
    }

    /// Luminance of a decoded image, normalized to [0, 1].
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        let luma = image.to_luma32f();
        let (width, height) = (luma.width() as usize, luma.height() as usize);
        GrayFrame::new(luma.into_raw(), width, height, 1.0)
    }

    /// Row-major luminance values.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn white_level(&self) -> f32 {
        self.white_level
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

/// Decode an image file (png, jpeg, gif, bmp, tiff).
pub fn load_frame<P: AsRef<Path>>(path: P) -> Result<(DynamicImage, GrayFrame)> {
    let path = path.as_ref();
    let image = image::open(path)
        .with_context(|| format!("Failed to decode image {}", path.display()))?;
    let frame = GrayFrame::from_image(&image).context("Failed to extract luminance")?;
    Ok((image, frame))
}

/// A point source found by the detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Flux-weighted centroid X (subpixel).
    pub pixel_x: f64,
    /// Flux-weighted centroid Y (subpixel).
    pub pixel_y: f64,
    /// Total background-subtracted flux.
    pub flux: f64,
    /// Flux-weighted RMS radius (pixels).
    pub radius: f64,
    /// Background-subtracted peak value.
    pub peak: f64,
    /// Number of connected pixels above threshold.
    pub area: usize,
    /// Flux over the background noise integrated across the blob.
    pub snr: f64,
    /// Peak reached the saturation level.
    pub saturated: bool,
    /// Blob touches the image border; its centroid is biased.
    pub touches_border: bool,
}

impl Detection {
    /// Bare detection at a pixel position, used for pre-measured point lists.
    pub fn at(pixel_x: f64, pixel_y: f64, flux: f64) -> Self {
        Detection {
            pixel_x,
            pixel_y,
            flux,
            radius: 1.0,
            peak: flux,
            area: 1,
            snr: f64::MAX,
            saturated: false,
            touches_border: false,
        }
    }

    #[inline]
    pub fn position(&self) -> (f64, f64) {
        (self.pixel_x, self.pixel_y)
    }
}

/// A detection resolved to a catalog star.
#[derive(Clone, Debug, PartialEq)]
pub struct Identification {
    pub detection: Detection,
    pub star: CatalogStar,
    /// Angular distance between the re-projected detection and the star (radians).
    pub residual: f64,
    /// In [0, 1]; see [`crate::resolve::confidence_score`].
    pub confidence: f64,
}

impl Identification {
    pub fn report(&self) -> StarReport {
        StarReport {
            name: self.star.name.clone(),
            x: self.detection.pixel_x,
            y: self.detection.pixel_y,
            confidence: self.confidence,
            hr: self.star.id,
        }
    }
}

/// Output record consumed by presentation layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StarReport {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    /// Catalog identifier.
    pub hr: u32,
}

/// Parameters echoed back with every report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportParameters {
    pub camera_scaling_factor: f64,
    pub al_parameter: f64,
}

/// Response envelope for a finished identification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub success: bool,
    pub message: String,
    pub detected_stars: Vec<StarReport>,
    pub parameters: ReportParameters,
}

impl SolveReport {
    pub fn success(identifications: &[Identification], parameters: ReportParameters) -> Self {
        SolveReport {
            success: true,
            message: format!("Identified {} stars in image", identifications.len()),
            detected_stars: identifications.iter().map(Identification::report).collect(),
            parameters,
        }
    }

    pub fn failure(error: &crate::SolveError, parameters: ReportParameters) -> Self {
        SolveReport {
            success: false,
            message: error.to_string(),
            detected_stars: Vec::new(),
            parameters,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize report")
    }
}

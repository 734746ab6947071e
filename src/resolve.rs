//! Identity resolution: re-project detections through a solved transform and name them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::CatalogIndex;
use crate::error::SolveError;
use crate::matching::transform::SkyTransform;
use crate::types::{Detection, Identification};

/// Shape of the photometric confidence term.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceParams {
    /// SNR at which the photometric term reaches one half.
    pub faint_snr: f64,
    /// Multiplier applied to saturated detections.
    pub saturation_penalty: f64,
    /// Share of the confidence governed by photometry, in [0, 1].
    pub photometric_weight: f64,
}

impl Default for ConfidenceParams {
    fn default() -> Self {
        ConfidenceParams {
            faint_snr: 3.0,
            saturation_penalty: 0.75,
            photometric_weight: 0.3,
        }
    }
}

/// Confidence in [0, 1] for a detection matched at `residual` (radians).
///
/// `positional = max(0, 1 - (residual / tolerance)²)`
/// `photometric = snr / (snr + faint_snr)`, times `saturation_penalty` when saturated
/// `confidence = positional · (1 - w + w · photometric)`
///
/// Decreases with residual, increases with signal.
pub fn confidence_score(
    residual: f64,
    tolerance: f64,
    snr: f64,
    saturated: bool,
    params: &ConfidenceParams,
) -> f64 {
    if !(residual.is_finite() && tolerance > 0.0) {
        return 0.0;
    }
    let positional = (1.0 - (residual / tolerance).powi(2)).max(0.0);

    let snr = if snr.is_nan() { 0.0 } else { snr.max(0.0) };
    let mut photometric = if snr.is_infinite() {
        1.0
    } else {
        snr / (snr + params.faint_snr.max(f64::MIN_POSITIVE))
    };
    if saturated {
        photometric *= params.saturation_penalty;
    }

    let w = params.photometric_weight.clamp(0.0, 1.0);
    let confidence = positional * (1.0 - w + w * photometric);
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Name every detection whose re-projection lands within `tolerance` (radians) of a star.
///
/// A star goes to the closest detection. Output keeps the detections' input order.
pub fn resolve(
    detections: &[Detection],
    transform: &SkyTransform,
    index: &CatalogIndex,
    tolerance: f64,
    params: &ConfidenceParams,
) -> Result<Vec<Identification>, SolveError> {
    let mut claims: BTreeMap<usize, (usize, f64)> = BTreeMap::new();
    for (i, det) in detections.iter().enumerate() {
        if !(det.pixel_x.is_finite() && det.pixel_y.is_finite()) {
            continue;
        }
        let v = transform.pixel_to_vector(det.pixel_x, det.pixel_y);
        let Some((star, residual)) = index.nearest_to(&v) else {
            continue;
        };
        if residual > tolerance {
            continue;
        }
        claims
            .entry(star)
            .and_modify(|held| {
                if residual < held.1 {
                    *held = (i, residual);
                }
            })
            .or_insert((i, residual));
    }

    let mut picked: Vec<(usize, usize, f64)> = claims
        .into_iter()
        .map(|(star, (det, residual))| (det, star, residual))
        .collect();
    picked.sort_by_key(|p| p.0);

    let identifications: Vec<Identification> = picked
        .into_iter()
        .map(|(det, star, residual)| {
            let detection = detections[det].clone();
            let confidence =
                confidence_score(residual, tolerance, detection.snr, detection.saturated, params);
            Identification {
                detection,
                star: index.star(star).clone(),
                residual,
                confidence,
            }
        })
        .collect();

    debug!(
        detections = detections.len(),
        identified = identifications.len(),
        "Resolved identities"
    );

    if identifications.is_empty() {
        return Err(SolveError::NoStarsIdentified);
    }
    Ok(identifications)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::transform::Parity;
    use crate::test_utils::{project_detections, stars_by_hr, transform_about, ursa_major, DIPPER_HR};

    const TOL: f64 = 0.5 * std::f64::consts::PI / 180.0;

    #[test]
    fn test_confidence_monotonic() {
        let p = ConfidenceParams::default();
        let exact = confidence_score(0.0, TOL, 100.0, false, &p);
        let off = confidence_score(0.5 * TOL, TOL, 100.0, false, &p);
        let faint = confidence_score(0.0, TOL, 2.0, false, &p);
        let saturated = confidence_score(0.0, TOL, 100.0, true, &p);
        assert!(exact > off && exact > faint && exact > saturated);
        assert!(exact <= 1.0 && exact > 0.95);
        assert_eq!(confidence_score(TOL, TOL, 100.0, false, &p), 0.0);
        assert_eq!(confidence_score(2.0 * TOL, TOL, 100.0, false, &p), 0.0);
    }

    #[test]
    fn test_confidence_guards() {
        let p = ConfidenceParams::default();
        assert_eq!(confidence_score(0.0, TOL, f64::INFINITY, false, &p), 1.0);
        assert_eq!(confidence_score(0.0, TOL, f64::MAX, false, &p), 1.0);
        assert_eq!(confidence_score(f64::NAN, TOL, 10.0, false, &p), 0.0);
        assert_eq!(confidence_score(0.0, 0.0, 10.0, false, &p), 0.0);
        let c = confidence_score(0.0, TOL, f64::NAN, false, &p);
        assert!((0.0..=1.0).contains(&c));
    }

    #[test]
    fn test_resolve_names_and_order() {
        let catalog = ursa_major();
        let stars = stars_by_hr(&catalog, &DIPPER_HR);
        let t = transform_about(&stars, 18.18, 0.25, Parity::Normal, (200.0, 150.0));
        let mut dets = project_detections(&stars, &t);
        // Unmatched detection far from every star
        let (fx, fy) = (dets[0].pixel_x + 400.0, dets[0].pixel_y + 400.0);
        dets.insert(2, Detection::at(fx, fy, 10.0));
        let index = CatalogIndex::new(catalog);

        let ids = resolve(&dets, &t, &index, TOL, &ConfidenceParams::default()).unwrap();
        let hrs: Vec<u32> = ids.iter().map(|i| i.star.id).collect();
        assert_eq!(hrs, DIPPER_HR.to_vec());
        for id in &ids {
            assert!(dets.contains(&id.detection));
            assert!(id.confidence > 0.99);
            assert!(id.residual < 1e-9);
        }
    }

    #[test]
    fn test_resolve_no_duplicate_stars() {
        let catalog = ursa_major();
        let stars = stars_by_hr(&catalog, &DIPPER_HR[..3]);
        let t = transform_about(&stars, 18.18, 0.0, Parity::Normal, (200.0, 150.0));
        let mut dets = project_detections(&stars, &t);
        let (x, y) = dets[1].position();
        dets.insert(0, Detection::at(x + 3.0, y - 1.0, 50.0));
        let index = CatalogIndex::new(catalog);

        let ids = resolve(&dets, &t, &index, TOL, &ConfidenceParams::default()).unwrap();
        assert_eq!(ids.len(), 3);
        let mut star_ids: Vec<u32> = ids.iter().map(|i| i.star.id).collect();
        star_ids.sort_unstable();
        star_ids.dedup();
        assert_eq!(star_ids.len(), 3);
        // The exact detection wins over the offset one
        assert!(ids.iter().all(|i| i.detection.pixel_x != x + 3.0));
    }

    #[test]
    fn test_resolve_nothing_matches() {
        let catalog = ursa_major();
        let t = SkyTransform::new(0.0, -1.0, 18.18, 0.0, Parity::Normal, (0.0, 0.0));
        let dets = vec![Detection::at(5.0, 5.0, 1.0)];
        assert_eq!(
            resolve(&dets, &t, &CatalogIndex::new(catalog), TOL, &ConfidenceParams::default()),
            Err(SolveError::NoStarsIdentified)
        );
    }
}

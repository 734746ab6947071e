//! Pattern matching: recover the pixel → sky transform from detection triangles.

pub mod transform;
mod triangle;
mod verify;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::CatalogIndex;
use crate::error::SolveError;
use crate::resolve::{self, ConfidenceParams};
use crate::types::{Detection, Identification};

use transform::SkyTransform;
use triangle::{PixelTriangle, TriangleLimits};
use verify::Leaderboard;

/// Triangles evaluated in parallel between early-stop checks.
const TRIPLE_BATCH: usize = 32;
/// Search ends once the best transform explains this share of the usable detections.
const EARLY_STOP_FRACTION: f64 = 0.9;
/// Early stop needs at least this many usable detections.
const EARLY_STOP_MIN_DETECTIONS: usize = 6;

/// Matcher and resolver tolerances.
///
/// The relative bands and angular tolerances are multiplied by `match_tolerance`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// Global multiplier on every tolerance below.
    pub match_tolerance: f64,
    /// Allowed deviation of triangle side ratios.
    pub ratio_tolerance: f64,
    /// Allowed relative deviation of the fitted scale from the nominal scaling factor.
    pub scale_tolerance: f64,
    /// Angular distance (degrees) within which a re-projected detection counts as an inlier.
    pub inlier_tolerance_deg: f64,
    /// Angular distance (degrees) within which the resolver accepts a star.
    pub identify_tolerance_deg: f64,
    /// Minimum inliers for a transform to be accepted.
    pub min_inliers: usize,
    /// Residual difference, as a fraction of the inlier tolerance, below which two
    /// distinct transforms are indistinguishable.
    pub tie_band: f64,
    /// Brightest N usable detections enter the triangle search.
    pub max_match_detections: usize,
    /// Shortest triangle side considered (pixels).
    pub min_side_px: f64,
    /// Minimum difference between triangle sides, as a fraction of the longest.
    pub min_side_separation: f64,
    /// Leave border-touching detections out of the search.
    pub exclude_border: bool,
    /// Time budget for the triangle search. `None` searches until every triangle is tried.
    pub timeout: Option<Duration>,
    pub confidence: ConfidenceParams,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        ToleranceConfig {
            match_tolerance: 1.0,
            ratio_tolerance: 0.05,
            scale_tolerance: 0.15,
            inlier_tolerance_deg: 0.5,
            identify_tolerance_deg: 0.5,
            min_inliers: 3,
            tie_band: 0.05,
            max_match_detections: 15,
            min_side_px: 8.0,
            min_side_separation: 0.01,
            exclude_border: true,
            timeout: Some(Duration::from_secs(30)),
            confidence: ConfidenceParams::default(),
        }
    }
}

impl ToleranceConfig {
    pub fn inlier_tolerance(&self) -> f64 {
        (self.inlier_tolerance_deg * self.match_tolerance).to_radians()
    }

    pub fn identify_tolerance(&self) -> f64 {
        (self.identify_tolerance_deg * self.match_tolerance).to_radians()
    }

    fn validate(&self) -> Result<(), SolveError> {
        let positive = [
            ("match_tolerance", self.match_tolerance),
            ("ratio_tolerance", self.ratio_tolerance),
            ("scale_tolerance", self.scale_tolerance),
            ("inlier_tolerance_deg", self.inlier_tolerance_deg),
            ("identify_tolerance_deg", self.identify_tolerance_deg),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(SolveError::InvalidParameter {
                    name,
                    reason: format!("must be positive and finite, got {}", value),
                });
            }
        }
        if self.min_inliers < 3 {
            return Err(SolveError::InvalidParameter {
                name: "min_inliers",
                reason: format!("must be at least 3, got {}", self.min_inliers),
            });
        }
        Ok(())
    }
}

/// Cooperative cancellation flag, checked before every hypothesis.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One detection ↔ catalog star pairing under a transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correspondence {
    /// Index into the detections passed to [`solve`].
    pub detection: usize,
    /// Index into [`CatalogIndex::stars`].
    pub star: usize,
    /// Angular distance after re-projection (radians).
    pub separation: f64,
}

/// A verified pixel → sky transform.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateTransform {
    pub transform: SkyTransform,
    pub inlier_count: usize,
    /// Mean inlier separation (radians).
    pub residual: f64,
    /// Sorted by detection index.
    pub inliers: Vec<Correspondence>,
}

impl CandidateTransform {
    /// Pixels per degree.
    pub fn scale(&self) -> f64 {
        self.transform.scale
    }

    /// Radians.
    pub fn rotation(&self) -> f64 {
        self.transform.rotation
    }

    /// Pixel position of the tangent point.
    pub fn translation(&self) -> (f64, f64) {
        self.transform.translation
    }
}

/// Search counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveStats {
    pub usable_detections: usize,
    /// Triangles in the catalog pattern table.
    pub catalog_patterns: usize,
    pub triples_evaluated: usize,
    pub hypotheses_verified: usize,
    /// Distinct transforms sharing the best inlier count.
    pub tied_candidates: usize,
}

/// A successful solve.
#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub transform: CandidateTransform,
    pub identifications: Vec<Identification>,
    pub stats: SolveStats,
}

/// Identify `detections` against `index`.
///
/// `scaling_factor` is the nominal image scale in pixels per degree.
pub fn solve(
    detections: &[Detection],
    index: &CatalogIndex,
    scaling_factor: f64,
    config: &ToleranceConfig,
) -> Result<Solution, SolveError> {
    solve_with_cancel(detections, index, scaling_factor, config, &CancelToken::new())
}

/// [`solve`] with a cancellation token.
pub fn solve_with_cancel(
    detections: &[Detection],
    index: &CatalogIndex,
    scaling_factor: f64,
    config: &ToleranceConfig,
    cancel: &CancelToken,
) -> Result<Solution, SolveError> {
    let (transform, stats) = match_transform(detections, index, scaling_factor, config, cancel)?;
    let identifications = resolve::resolve(
        detections,
        &transform.transform,
        index,
        config.identify_tolerance(),
        &config.confidence,
    )?;

    Ok(Solution {
        transform,
        identifications,
        stats,
    })
}

/// Triangle search only: the best verified transform without identity resolution.
pub fn match_transform(
    detections: &[Detection],
    index: &CatalogIndex,
    scaling_factor: f64,
    config: &ToleranceConfig,
    cancel: &CancelToken,
) -> Result<(CandidateTransform, SolveStats), SolveError> {
    if index.is_empty() {
        return Err(SolveError::CatalogUnavailable);
    }
    if !scaling_factor.is_finite() || scaling_factor <= 0.0 {
        return Err(SolveError::InvalidParameter {
            name: "scaling_factor",
            reason: format!("must be positive and finite, got {}", scaling_factor),
        });
    }
    config.validate()?;

    let points = usable_points(detections, config);
    if points.len() < 3 {
        return Err(SolveError::InsufficientDetections {
            found: points.len(),
            needed: 3,
        });
    }

    let mt = config.match_tolerance;
    let ratio_tol = config.ratio_tolerance * mt;
    let scale_tol = (config.scale_tolerance * mt).min(0.9);
    let inlier_tol = config.inlier_tolerance();

    let table = index.patterns();
    let n = points.len();
    // Triangles of the brightest detections first
    let triples: Vec<[usize; 3]> = (2..n)
        .flat_map(|k| (1..k).flat_map(move |j| (0..j).map(move |i| [i, j, k])))
        .collect();
    debug!(usable = n, patterns = table.len(), triples = triples.len(), "Starting triangle search");

    let limits = TriangleLimits {
        min_side: config.min_side_px,
        min_separation: config.min_side_separation,
    };
    let deadline = config.timeout.map(|d| Instant::now() + d);
    let interrupted = || cancel.is_cancelled() || deadline.is_some_and(|dl| Instant::now() >= dl);
    let good_enough = config
        .min_inliers
        .max((n as f64 * EARLY_STOP_FRACTION).ceil() as usize);

    let mut board = Leaderboard::default();
    for batch in triples.chunks(TRIPLE_BATCH) {
        let part = batch
            .par_iter()
            .fold(Leaderboard::default, |mut board, &[i, j, k]| {
                if board.interrupted || interrupted() {
                    board.interrupted = true;
                    return board;
                }
                board.triples_evaluated += 1;

                let Some(tri) = PixelTriangle::new([i, j, k], [points[i].1, points[j].1, points[k].1], &limits)
                else {
                    return board;
                };
                let pixels = [points[tri.a].1, points[tri.b].1, points[tri.c].1];

                for stars in triangle::catalog_matches(&tri, table, scaling_factor, scale_tol, ratio_tol) {
                    if interrupted() {
                        board.interrupted = true;
                        break;
                    }
                    let vectors = stars.map(|s| *index.vector(s));
                    let Some((seed, rms)) = verify::fit_hypothesis(&vectors, &pixels) else {
                        continue;
                    };
                    if (seed.scale / scaling_factor - 1.0).abs() > scale_tol
                        || rms > inlier_tol.to_degrees() * seed.scale
                    {
                        continue;
                    }
                    board.hypotheses_verified += 1;
                    board.offer(verify::refine(seed, &points, index, inlier_tol));
                }
                board
            })
            .reduce(Leaderboard::default, Leaderboard::merge);
        board = board.merge(part);

        if board.interrupted {
            break;
        }
        if n >= EARLY_STOP_MIN_DETECTIONS && board.best_inliers >= good_enough {
            debug!(
                inliers = board.best_inliers,
                triples = board.triples_evaluated,
                "Stopping early, transform explains nearly every detection"
            );
            break;
        }
    }

    if board.interrupted {
        return Err(if cancel.is_cancelled() {
            SolveError::Cancelled
        } else {
            SolveError::TimedOut
        });
    }

    let stats = SolveStats {
        usable_detections: n,
        catalog_patterns: table.len(),
        triples_evaluated: board.triples_evaluated,
        hypotheses_verified: board.hypotheses_verified,
        tied_candidates: board.entries.len(),
    };
    debug!(?stats, "Triangle search finished");

    let Some(best) = board.best() else {
        return Err(SolveError::NoConsistentPattern { best_inliers: 0 });
    };
    if best.inlier_count < config.min_inliers {
        return Err(SolveError::NoConsistentPattern {
            best_inliers: best.inlier_count,
        });
    }

    let rivals = count_rivals(board.entries.values(), best, config.tie_band * inlier_tol);
    if rivals > 0 {
        return Err(SolveError::AmbiguousSolution {
            candidates: rivals + 1,
        });
    }

    info!(
        inliers = best.inlier_count,
        scale = best.scale(),
        rotation_deg = best.rotation().to_degrees(),
        residual_arcsec = best.residual.to_degrees() * 3600.0,
        "Found sky transform"
    );
    Ok((best.clone(), stats))
}

/// Candidates within `band` residual of `best` that disagree with it on the identities.
///
/// Sharing three or more correspondences with `best` counts as agreement.
fn count_rivals<'a>(
    candidates: impl IntoIterator<Item = &'a CandidateTransform>,
    best: &CandidateTransform,
    band: f64,
) -> usize {
    let best_key = verify::pair_key(best);
    candidates
        .into_iter()
        .filter(|c| !std::ptr::eq(*c, best))
        .filter(|c| (c.residual - best.residual).abs() <= band)
        .filter(|c| {
            verify::pair_key(c)
                .iter()
                .filter(|p| best_key.contains(p))
                .count()
                < 3
        })
        .count()
}

/// `(detection index, position)` for the brightest usable detections.
fn usable_points(detections: &[Detection], config: &ToleranceConfig) -> Vec<(usize, (f64, f64))> {
    let mut usable: Vec<(usize, &Detection)> = detections
        .iter()
        .enumerate()
        .filter(|(_, d)| d.pixel_x.is_finite() && d.pixel_y.is_finite())
        .filter(|(_, d)| !(config.exclude_border && d.touches_border))
        .collect();
    usable.sort_by(|a, b| b.1.flux.total_cmp(&a.1.flux).then(a.0.cmp(&b.0)));
    usable.truncate(config.max_match_detections.max(3));
    usable.into_iter().map(|(i, d)| (i, d.position())).collect()
}

//! Hypothesis verification: inlier scoring, iterative refit, and the best-candidate board.

use std::collections::BTreeMap;

use nalgebra::Vector3;

use super::transform::{Parity, SkyTransform};
use super::{CandidateTransform, Correspondence};
use crate::catalog::sphere::TangentPlane;
use crate::catalog::CatalogIndex;

const MAX_REFINE_ITERATIONS: usize = 4;

/// Match every point to its nearest catalog star within `tolerance` (radians).
///
/// `points` are `(detection index, pixel position)`. A star is claimed by at most one
/// point: the closer one, ties to the lower detection index. Output is ordered by
/// detection index.
pub(crate) fn score(
    transform: &SkyTransform,
    points: &[(usize, (f64, f64))],
    index: &CatalogIndex,
    tolerance: f64,
) -> Vec<Correspondence> {
    let mut claims: BTreeMap<usize, Correspondence> = BTreeMap::new();
    for &(detection, (x, y)) in points {
        let v = transform.pixel_to_vector(x, y);
        let Some((star, separation)) = index.nearest_to(&v) else {
            continue;
        };
        if separation > tolerance {
            continue;
        }
        let candidate = Correspondence {
            detection,
            star,
            separation,
        };
        claims
            .entry(star)
            .and_modify(|held| {
                if separation < held.separation
                    || (separation == held.separation && detection < held.detection)
                {
                    *held = candidate;
                }
            })
            .or_insert(candidate);
    }

    let mut inliers: Vec<Correspondence> = claims.into_values().collect();
    inliers.sort_by_key(|c| c.detection);
    inliers
}

fn mean_separation(inliers: &[Correspondence]) -> f64 {
    if inliers.is_empty() {
        return f64::INFINITY;
    }
    inliers.iter().map(|c| c.separation).sum::<f64>() / inliers.len() as f64
}

/// Fit from explicit correspondences, trying both parities about the stars' mean direction.
pub(crate) fn fit_hypothesis(
    stars: &[Vector3<f64>],
    pixels: &[(f64, f64)],
) -> Option<(SkyTransform, f64)> {
    let plane = TangentPlane::new(mean_direction(stars)?);
    let normal = SkyTransform::fit(plane, Parity::Normal, stars, pixels);
    let flipped = SkyTransform::fit(plane, Parity::Flipped, stars, pixels);
    match (normal, flipped) {
        (Some(n), Some(f)) => Some(if f.1 < n.1 { f } else { n }),
        (n, f) => n.or(f),
    }
}

fn mean_direction(stars: &[Vector3<f64>]) -> Option<Vector3<f64>> {
    let sum = stars.iter().fold(Vector3::zeros(), |acc, v| acc + v);
    (sum.norm() > 1e-12).then(|| sum.normalize())
}

/// Score a transform, then refit over its inliers until the inlier set stops changing.
///
/// Each refit places the tangent point at the inliers' mean direction, so a given
/// inlier set always yields the same transform regardless of the seeding triangle.
pub(crate) fn refine(
    seed: SkyTransform,
    points: &[(usize, (f64, f64))],
    index: &CatalogIndex,
    tolerance: f64,
) -> CandidateTransform {
    let mut transform = seed;
    let mut inliers = score(&transform, points, index, tolerance);

    for _ in 0..MAX_REFINE_ITERATIONS {
        if inliers.len() < 2 {
            break;
        }
        let stars: Vec<Vector3<f64>> = inliers.iter().map(|c| *index.vector(c.star)).collect();
        let pixels: Vec<(f64, f64)> = inliers
            .iter()
            .map(|c| position_of(points, c.detection))
            .collect();
        let Some(plane_center) = mean_direction(&stars) else {
            break;
        };
        let Some((refit, _)) =
            SkyTransform::fit(TangentPlane::new(plane_center), transform.parity, &stars, &pixels)
        else {
            break;
        };

        let rescored = score(&refit, points, index, tolerance);
        if rescored.len() < inliers.len() {
            break;
        }
        let converged = same_pairs(&rescored, &inliers);
        transform = refit;
        inliers = rescored;
        if converged {
            break;
        }
    }

    CandidateTransform {
        transform,
        inlier_count: inliers.len(),
        residual: mean_separation(&inliers),
        inliers,
    }
}

fn position_of(points: &[(usize, (f64, f64))], detection: usize) -> (f64, f64) {
    points
        .iter()
        .find(|(d, _)| *d == detection)
        .map_or((f64::NAN, f64::NAN), |&(_, p)| p)
}

fn same_pairs(a: &[Correspondence], b: &[Correspondence]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.detection == y.detection && x.star == y.star)
}

/// Key identifying a candidate by its correspondence set.
pub(crate) type PairKey = Vec<(usize, usize)>;

pub(crate) fn pair_key(candidate: &CandidateTransform) -> PairKey {
    candidate.inliers.iter().map(|c| (c.detection, c.star)).collect()
}

/// Candidates sharing the current maximum inlier count, keyed by correspondence set.
///
/// Built per rayon worker and merged; the merge is order-independent.
#[derive(Default)]
pub(crate) struct Leaderboard {
    pub best_inliers: usize,
    pub entries: BTreeMap<PairKey, CandidateTransform>,
    pub triples_evaluated: usize,
    pub hypotheses_verified: usize,
    pub interrupted: bool,
}

impl Leaderboard {
    pub fn offer(&mut self, candidate: CandidateTransform) {
        if candidate.inlier_count < self.best_inliers || candidate.inlier_count == 0 {
            return;
        }
        if candidate.inlier_count > self.best_inliers {
            self.best_inliers = candidate.inlier_count;
            self.entries.clear();
        }
        let key = pair_key(&candidate);
        match self.entries.get(&key) {
            Some(held) if !better(&candidate, held) => {}
            _ => {
                self.entries.insert(key, candidate);
            }
        }
    }

    pub fn merge(mut self, other: Leaderboard) -> Leaderboard {
        self.triples_evaluated += other.triples_evaluated;
        self.hypotheses_verified += other.hypotheses_verified;
        self.interrupted |= other.interrupted;
        for candidate in other.entries.into_values() {
            self.offer(candidate);
        }
        self
    }

    /// Best entry: lowest residual, then the total order of [`better`].
    pub fn best(&self) -> Option<&CandidateTransform> {
        self.entries
            .values()
            .reduce(|a, b| if better(b, a) { b } else { a })
    }
}

/// Strict total preference between candidates with equal inlier counts.
fn better(a: &CandidateTransform, b: &CandidateTransform) -> bool {
    let ta = &a.transform;
    let tb = &b.transform;
    a.residual
        .total_cmp(&b.residual)
        .then(ta.scale.total_cmp(&tb.scale))
        .then(ta.rotation.total_cmp(&tb.rotation))
        .then(ta.parity.cmp(&tb.parity))
        .then(ta.translation.0.total_cmp(&tb.translation.0))
        .then(ta.translation.1.total_cmp(&tb.translation.1))
        .then(pair_key(a).cmp(&pair_key(b)))
        .is_lt()
}

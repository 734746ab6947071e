//! Reference star catalog with spatial lookups on the celestial sphere.

pub mod bsc;
pub mod pairs;
pub mod patterns;
pub mod sphere;

use std::collections::HashMap;
use std::sync::OnceLock;

use nalgebra::Vector3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pairs::{PairIndex, StarPair};
use patterns::{PatternConfig, PatternTable};
use sphere::{angular_separation, radec_to_vec};

/// A catalog entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogStar {
    /// Catalog number (HR for the Bright Star Catalogue).
    pub id: u32,
    pub name: String,
    /// Right ascension (radians).
    pub ra: f64,
    /// Declination (radians).
    pub dec: f64,
    /// Visual magnitude.
    pub magnitude: f64,
}

type CellKey = [i32; 3];

/// Read-only index over catalog stars.
///
/// Unit vectors are bucketed into a cubic grid over [-1, 1]³, so neighbor queries
/// only visit the cells overlapping the query's chord-distance box. The triangle
/// table used by the matcher is built on first use and shared by every later solve.
pub struct CatalogIndex {
    stars: Vec<CatalogStar>,
    vectors: Vec<Vector3<f64>>,
    cells: HashMap<CellKey, Vec<u32>>,
    cells_per_axis: i32,
    cell_size: f64,
    pattern_config: PatternConfig,
    patterns: OnceLock<PatternTable>,
}

impl CatalogIndex {
    pub fn new(stars: Vec<CatalogStar>) -> Self {
        CatalogIndex::with_pattern_config(stars, PatternConfig::default())
    }

    pub fn with_pattern_config(stars: Vec<CatalogStar>, pattern_config: PatternConfig) -> Self {
        let vectors: Vec<Vector3<f64>> = stars.iter().map(|s| radec_to_vec(s.ra, s.dec)).collect();

        // ~6 stars per occupied cell on average (the sphere touches ~6n² cells)
        let cells_per_axis = ((stars.len() as f64 / 36.0).sqrt().ceil() as i32).clamp(1, 128);
        let cell_size = 2.0 / cells_per_axis as f64;

        let mut index = CatalogIndex {
            stars,
            vectors,
            cells: HashMap::new(),
            cells_per_axis,
            cell_size,
            pattern_config,
            patterns: OnceLock::new(),
        };
        for (i, v) in index.vectors.iter().enumerate() {
            let key = index.cell_of(v);
            index.cells.entry(key).or_default().push(i as u32);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    pub fn stars(&self) -> &[CatalogStar] {
        &self.stars
    }

    #[inline]
    pub fn star(&self, idx: usize) -> &CatalogStar {
        &self.stars[idx]
    }

    #[inline]
    pub(crate) fn vector(&self, idx: usize) -> &Vector3<f64> {
        &self.vectors[idx]
    }

    pub fn pattern_config(&self) -> &PatternConfig {
        &self.pattern_config
    }

    /// Triangle table for the matcher, built on the first call.
    pub fn patterns(&self) -> &PatternTable {
        self.patterns.get_or_init(|| {
            let table = PatternTable::build(self, &self.pattern_config);
            debug!(
                stars = self.len(),
                triangles = table.len(),
                max_fov_deg = self.pattern_config.max_fov_deg,
                "Built catalog triangle table"
            );
            table
        })
    }

    pub fn find_id(&self, id: u32) -> Option<&CatalogStar> {
        self.stars.iter().find(|s| s.id == id)
    }

    /// Closest star to (ra, dec). Ties go to the lower catalog index.
    pub fn nearest(&self, ra: f64, dec: f64) -> Option<&CatalogStar> {
        self.nearest_to(&radec_to_vec(ra, dec))
            .map(|(idx, _)| &self.stars[idx])
    }

    /// Index of the closest star to `v` and its angular distance.
    pub(crate) fn nearest_to(&self, v: &Vector3<f64>) -> Option<(usize, f64)> {
        if self.stars.is_empty() {
            return None;
        }

        let mut chord = self.cell_size;
        loop {
            let mut best: Option<(usize, f64)> = None;
            self.scan_box(v, chord, |i| {
                let d = (self.vectors[i] - v).norm_squared();
                let better = match best {
                    None => true,
                    Some((bi, bd)) => d < bd || (d == bd && i < bi),
                };
                if better {
                    best = Some((i, d));
                }
            });

            // A hit inside the chord ball is final: anything closer lies in the same box
            if let Some((i, d)) = best {
                if d.sqrt() <= chord || chord >= 2.0 {
                    return Some((i, angular_separation(&self.vectors[i], v)));
                }
            }
            if chord >= 2.0 {
                return None;
            }
            chord = (chord * 2.0).min(2.0);
        }
    }

    /// Stars within `max_angle` (radians) of (ra, dec), closest first.
    pub fn within_angle(&self, ra: f64, dec: f64, max_angle: f64) -> Vec<&CatalogStar> {
        let v = radec_to_vec(ra, dec);
        let mut hits: Vec<(usize, f64)> = self
            .neighbors(&v, max_angle)
            .into_iter()
            .map(|i| (i, angular_separation(&self.vectors[i], &v)))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits.into_iter().map(|(i, _)| &self.stars[i]).collect()
    }

    /// Indices of stars within `max_angle` of `v`, ascending.
    pub(crate) fn neighbors(&self, v: &Vector3<f64>, max_angle: f64) -> Vec<usize> {
        if max_angle < 0.0 || !max_angle.is_finite() {
            return Vec::new();
        }
        let chord = 2.0 * (0.5 * max_angle.min(std::f64::consts::PI)).sin();
        let mut out = Vec::new();
        self.scan_box(v, chord, |i| {
            if angular_separation(&self.vectors[i], v) <= max_angle {
                out.push(i);
            }
        });
        out.sort_unstable();
        out
    }

    /// Every unordered pair of stars separated by at most `max_angle`.
    pub fn all_pairs_within(&self, max_angle: f64) -> Vec<StarPair> {
        self.collect_pairs(max_angle, None)
    }

    /// Angle-sorted pair table, optionally limited to stars no fainter than `max_magnitude`.
    pub fn pairs_within(&self, max_angle: f64, max_magnitude: Option<f64>) -> PairIndex {
        PairIndex::new(self.collect_pairs(max_angle, max_magnitude))
    }

    fn collect_pairs(&self, max_angle: f64, max_magnitude: Option<f64>) -> Vec<StarPair> {
        let bright = |i: usize| max_magnitude.map_or(true, |m| self.stars[i].magnitude <= m);
        (0..self.stars.len())
            .into_par_iter()
            .filter(|&a| bright(a))
            .flat_map_iter(|a| {
                self.neighbors(&self.vectors[a], max_angle)
                    .into_iter()
                    .filter(move |&b| b > a && bright(b))
                    .map(move |b| StarPair {
                        a,
                        b,
                        angle: angular_separation(&self.vectors[a], &self.vectors[b]),
                    })
            })
            .collect()
    }

    fn cell_of(&self, v: &Vector3<f64>) -> CellKey {
        let axis = |c: f64| (((c + 1.0) / self.cell_size).floor() as i32).clamp(0, self.cells_per_axis - 1);
        [axis(v.x), axis(v.y), axis(v.z)]
    }

    /// Visit every star in cells overlapping the box of half-width `chord` around `v`.
    fn scan_box(&self, v: &Vector3<f64>, chord: f64, mut visit: impl FnMut(usize)) {
        let lo = self.cell_of(&v.add_scalar(-chord));
        let hi = self.cell_of(&v.add_scalar(chord));
        for x in lo[0]..=hi[0] {
            for y in lo[1]..=hi[1] {
                for z in lo[2]..=hi[2] {
                    if let Some(members) = self.cells.get(&[x, y, z]) {
                        for &i in members {
                            visit(i as usize);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ursa_major, ursa_major_index, Lcg};
    use approx::assert_relative_eq;

    fn random_catalog(n: usize, seed: u64) -> Vec<CatalogStar> {
        let mut rng = Lcg::new(seed);
        (0..n)
            .map(|i| {
                let ra = rng.uniform() * std::f64::consts::TAU;
                let dec = (2.0 * rng.uniform() - 1.0).asin();
                CatalogStar {
                    id: i as u32,
                    name: format!("S{}", i),
                    ra,
                    dec,
                    magnitude: 1.0 + 5.0 * rng.uniform(),
                }
            })
            .collect()
    }

    #[test]
    fn test_nearest_returns_self() {
        let index = ursa_major_index();
        for star in index.stars() {
            assert_eq!(index.nearest(star.ra, star.dec), Some(star));
        }
    }

    #[test]
    fn test_nearest_matches_brute_force() {
        let index = CatalogIndex::new(random_catalog(2000, 7));
        let mut rng = Lcg::new(8);
        for _ in 0..200 {
            let ra = rng.uniform() * std::f64::consts::TAU;
            let dec = (2.0 * rng.uniform() - 1.0).asin();
            let q = radec_to_vec(ra, dec);
            let brute = (0..index.len())
                .min_by(|&a, &b| {
                    angular_separation(index.vector(a), &q).total_cmp(&angular_separation(index.vector(b), &q))
                })
                .unwrap();
            assert_eq!(index.nearest(ra, dec).unwrap().id, brute as u32);
        }
    }

    #[test]
    fn test_empty_index() {
        let index = CatalogIndex::new(Vec::new());
        assert!(index.is_empty());
        assert!(index.nearest(0.0, 0.0).is_none());
        assert!(index.all_pairs_within(1.0).is_empty());
    }

    #[test]
    fn test_within_angle() {
        let index = ursa_major_index();
        let dubhe = index.find_id(4301).unwrap();
        let near = index.within_angle(dubhe.ra, dubhe.dec, 10f64.to_radians());
        assert_eq!(near[0].id, 4301);
        // Merak sits ~5.4° from Dubhe; Alkaid is ~26° away
        assert!(near.iter().any(|s| s.id == 4295));
        assert!(near.iter().all(|s| s.id != 5191));
    }

    #[test]
    fn test_pairs_match_brute_force() {
        let index = CatalogIndex::new(random_catalog(500, 11));
        let max = 12f64.to_radians();
        let mut expected = 0;
        for a in 0..index.len() {
            for b in a + 1..index.len() {
                if angular_separation(index.vector(a), index.vector(b)) <= max {
                    expected += 1;
                }
            }
        }
        let pairs = index.all_pairs_within(max);
        assert_eq!(pairs.len(), expected);
        assert!(pairs.iter().all(|p| p.a < p.b && p.angle <= max));
    }

    #[test]
    fn test_pairs_magnitude_limit() {
        let stars = ursa_major();
        let index = CatalogIndex::new(stars);
        let all = index.pairs_within(40f64.to_radians(), None);
        let bright = index.pairs_within(40f64.to_radians(), Some(2.5));
        assert!(bright.len() < all.len());
        assert!(bright
            .pairs()
            .iter()
            .all(|p| index.star(p.a).magnitude <= 2.5 && index.star(p.b).magnitude <= 2.5));

        // Sorted ascending
        let angles: Vec<f64> = all.pairs().iter().map(|p| p.angle).collect();
        assert!(angles.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_nearest_distance() {
        let index = ursa_major_index();
        let merak = index.find_id(4295).unwrap();
        let (idx, dist) = index
            .nearest_to(&radec_to_vec(merak.ra + 1e-4, merak.dec))
            .unwrap();
        assert_eq!(index.star(idx).id, 4295);
        assert_relative_eq!(dist, 1e-4 * merak.dec.cos(), max_relative = 1e-3);
    }

    #[test]
    fn test_patterns_built_once() {
        let index = ursa_major_index();
        let first = index.patterns() as *const PatternTable;
        let second = index.patterns() as *const PatternTable;
        assert_eq!(first, second);
        assert!(!index.patterns().is_empty());
    }

    #[test]
    fn test_index_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CatalogIndex>();
    }
}

//! Catalog triangle table keyed on quantized side ratios.
//!
//! Every catalog star contributes triangles formed with its brightest neighbors inside
//! the pattern field. Each triangle is stored once, vertices ordered so that `AB` is
//! the longest side and `|AC| <= |BC|`, under the bin of its two side ratios.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::sphere::angular_separation;
use super::CatalogIndex;

/// How the triangle table is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Largest triangle side (degrees). Images whose star triangles are wider than
    /// this cannot be matched.
    pub max_fov_deg: f64,
    /// Each star forms triangles with at most this many of its brightest neighbors.
    pub pattern_neighbors: usize,
    /// Only stars at least this bright take part.
    pub max_magnitude: Option<f64>,
    /// Width of a ratio bin.
    pub ratio_bin: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        PatternConfig {
            max_fov_deg: 30.0,
            pattern_neighbors: 12,
            max_magnitude: None,
            ratio_bin: 0.01,
        }
    }
}

/// One catalog triangle. `stars` are indices into the owning [`CatalogIndex`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CatalogTriangle {
    /// `[A, B, C]` with `AB` the longest side and `|AC| <= |BC|`.
    pub stars: [u32; 3],
    /// |AB| (radians).
    pub longest: f64,
    /// |AC| / |AB|.
    pub ratio_ac: f64,
    /// |BC| / |AB|.
    pub ratio_bc: f64,
}

type BinKey = [u16; 2];

/// Triangle table bucketed by `(ratio_ac, ratio_bc)`.
#[derive(Debug, Default)]
pub struct PatternTable {
    bins: HashMap<BinKey, Vec<CatalogTriangle>>,
    ratio_bin: f64,
    max_fov: f64,
    len: usize,
}

impl PatternTable {
    pub fn build(index: &CatalogIndex, config: &PatternConfig) -> Self {
        let max_fov = config.max_fov_deg.to_radians();
        let ratio_bin = if config.ratio_bin > 0.0 { config.ratio_bin } else { 0.01 };
        let bright = |i: usize| config.max_magnitude.map_or(true, |m| index.star(i).magnitude <= m);
        let by_brightness = |a: &usize, b: &usize| {
            index
                .star(*a)
                .magnitude
                .total_cmp(&index.star(*b).magnitude)
                .then(a.cmp(b))
        };

        let mut triples: Vec<[u32; 3]> = (0..index.len())
            .into_par_iter()
            .filter(|&a| bright(a))
            .flat_map_iter(|a| {
                let mut near: Vec<usize> = index
                    .neighbors(index.vector(a), max_fov)
                    .into_iter()
                    .filter(|&b| b != a && bright(b))
                    .collect();
                near.sort_by(by_brightness);
                near.truncate(config.pattern_neighbors);

                let mut out = Vec::with_capacity(near.len() * near.len() / 2);
                for (i, &b) in near.iter().enumerate() {
                    for &c in &near[i + 1..] {
                        if angular_separation(index.vector(b), index.vector(c)) <= max_fov {
                            let mut t = [a as u32, b as u32, c as u32];
                            t.sort_unstable();
                            out.push(t);
                        }
                    }
                }
                out
            })
            .collect();
        triples.par_sort_unstable();
        triples.dedup();

        let mut bins: HashMap<BinKey, Vec<CatalogTriangle>> = HashMap::new();
        let mut len = 0;
        for triangle in triples.iter().filter_map(|t| shape(index, *t)) {
            let key = [
                bin_of(triangle.ratio_ac, ratio_bin),
                bin_of(triangle.ratio_bc, ratio_bin),
            ];
            bins.entry(key).or_default().push(triangle);
            len += 1;
        }

        PatternTable {
            bins,
            ratio_bin,
            max_fov,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Largest side held in the table (radians).
    pub fn max_fov(&self) -> f64 {
        self.max_fov
    }

    /// Visit triangles whose ratios lie within `tolerance` of `(ratio_ac, ratio_bc)`
    /// and whose longest side lies in `[longest_lo, longest_hi]` radians.
    pub fn query(
        &self,
        (ratio_ac, ratio_bc): (f64, f64),
        tolerance: f64,
        (longest_lo, longest_hi): (f64, f64),
        mut visit: impl FnMut(&CatalogTriangle),
    ) {
        if longest_lo > self.max_fov {
            return;
        }
        let range = |r: f64| {
            (
                bin_of(r - tolerance, self.ratio_bin),
                bin_of(r + tolerance, self.ratio_bin),
            )
        };
        let (ac_lo, ac_hi) = range(ratio_ac);
        let (bc_lo, bc_hi) = range(ratio_bc);
        for ac in ac_lo..=ac_hi {
            for bc in bc_lo..=bc_hi {
                let Some(bucket) = self.bins.get(&[ac, bc]) else {
                    continue;
                };
                for t in bucket {
                    if (t.ratio_ac - ratio_ac).abs() <= tolerance
                        && (t.ratio_bc - ratio_bc).abs() <= tolerance
                        && t.longest >= longest_lo
                        && t.longest <= longest_hi
                    {
                        visit(t);
                    }
                }
            }
        }
    }
}

fn bin_of(ratio: f64, width: f64) -> u16 {
    (ratio.max(0.0) / width).floor().min(u16::MAX as f64) as u16
}

/// Order the vertices of a catalog triple and measure its ratios.
fn shape(index: &CatalogIndex, t: [u32; 3]) -> Option<CatalogTriangle> {
    let v = |i: usize| index.vector(t[i] as usize);
    // Side k is opposite vertex k
    let sides = [
        angular_separation(v(1), v(2)),
        angular_separation(v(0), v(2)),
        angular_separation(v(0), v(1)),
    ];
    let c = (0..3)
        .max_by(|&i, &j| sides[i].total_cmp(&sides[j]).then(j.cmp(&i)))
        .unwrap_or(2);
    let longest = sides[c];
    if longest <= 0.0 {
        return None;
    }
    let (mut a, mut b) = match c {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };
    // |AC| is the side opposite B
    if sides[b] > sides[a] {
        std::mem::swap(&mut a, &mut b);
    }
    Some(CatalogTriangle {
        stars: [t[a], t[b], t[c]],
        longest,
        ratio_ac: sides[b] / longest,
        ratio_bc: sides[a] / longest,
    })
}

//! Triangle signatures and catalog triangle lookup.

use crate::catalog::patterns::PatternTable;

/// Detection triangle in the same vertex order as the catalog table: `AB` is the
/// longest side and `|AC| <= |BC|`.
///
/// `a`, `b`, `c` are positions in the caller's detection list; `c` is opposite the
/// longest side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PixelTriangle {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    /// Longest side (pixels).
    pub longest: f64,
    /// |AC| / |AB|.
    pub ratio_ac: f64,
    /// |BC| / |AB|.
    pub ratio_bc: f64,
}

/// Shape limits applied before a triangle is matched.
pub(crate) struct TriangleLimits {
    /// Shortest allowed side (pixels).
    pub min_side: f64,
    /// Sides must differ by at least this fraction of the longest side.
    pub min_separation: f64,
}

impl PixelTriangle {
    /// Build from three pixel positions; `None` for degenerate or near-isosceles shapes.
    pub fn new(idx: [usize; 3], pts: [(f64, f64); 3], limits: &TriangleLimits) -> Option<Self> {
        let dist = |p: (f64, f64), q: (f64, f64)| ((p.0 - q.0).powi(2) + (p.1 - q.1).powi(2)).sqrt();
        // Side k is opposite vertex k
        let sides = [dist(pts[1], pts[2]), dist(pts[0], pts[2]), dist(pts[0], pts[1])];

        let opposite = (0..3)
            .max_by(|&i, &j| sides[i].total_cmp(&sides[j]).then(j.cmp(&i)))
            .unwrap_or(2);
        let longest = sides[opposite];
        let shortest = sides.iter().copied().fold(f64::INFINITY, f64::min);
        if shortest < limits.min_side {
            return None;
        }

        let mut sorted = sides;
        sorted.sort_by(|x, y| x.total_cmp(y));
        if (sorted[1] - sorted[0]) < limits.min_separation * longest
            || (sorted[2] - sorted[1]) < limits.min_separation * longest
        {
            return None;
        }

        let (mut ia, mut ib) = match opposite {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        };
        // |AC| is the side opposite B
        if sides[ib] > sides[ia] {
            std::mem::swap(&mut ia, &mut ib);
        }
        let (pa, pb, pc) = (pts[ia], pts[ib], pts[opposite]);

        // Height of C above AB; a flat triangle fixes no orientation
        let cross = (pb.0 - pa.0) * (pc.1 - pa.1) - (pb.1 - pa.1) * (pc.0 - pa.0);
        if cross.abs() / longest < 0.5 {
            return None;
        }

        Some(PixelTriangle {
            a: idx[ia],
            b: idx[ib],
            c: idx[opposite],
            longest,
            ratio_ac: sides[ib] / longest,
            ratio_bc: sides[ia] / longest,
        })
    }
}

/// Catalog star triples `[A, B, C]` whose shape matches `tri`, in table order.
///
/// `scale` is the nominal pixels per degree; `scale_tol` and `ratio_tol` are the
/// relative bands on the longest side and the absolute band on the two side ratios.
/// When `|AC|` and `|BC|` are too close to order reliably, the swapped assignment
/// is looked up as well.
pub(crate) fn catalog_matches(
    tri: &PixelTriangle,
    table: &PatternTable,
    scale: f64,
    scale_tol: f64,
    ratio_tol: f64,
) -> Vec<[usize; 3]> {
    let longest_rad = (tri.longest / scale).to_radians();
    let band = (
        longest_rad * (1.0 - scale_tol).max(0.0),
        longest_rad * (1.0 + scale_tol),
    );

    let mut out = Vec::new();
    table.query((tri.ratio_ac, tri.ratio_bc), ratio_tol, band, |t| {
        out.push(t.stars.map(|s| s as usize));
    });
    if tri.ratio_bc - tri.ratio_ac <= 2.0 * ratio_tol {
        // Stored with the roles of A and B exchanged
        table.query((tri.ratio_bc, tri.ratio_ac), ratio_tol, band, |t| {
            let [a, b, c] = t.stars.map(|s| s as usize);
            out.push([b, a, c]);
        });
    }
    out
}

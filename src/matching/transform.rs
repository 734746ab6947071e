//! Pixel ↔ sky similarity transform on a gnomonic tangent plane.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::catalog::sphere::{radec_to_vec, vec_to_radec, TangentPlane};

/// Whether the image is mirrored relative to the sky.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Parity {
    Normal,
    Flipped,
}

impl Parity {
    #[inline]
    fn apply(self, (xi, eta): (f64, f64)) -> (f64, f64) {
        match self {
            Parity::Normal => (xi, eta),
            Parity::Flipped => (xi, -eta),
        }
    }
}

/// Similarity transform from tangent-plane degrees to pixels:
/// `pixel = scale · R(rotation) · P(ξ°, η°) + translation`, where `P` mirrors η for
/// flipped parity. `translation` is therefore the pixel position of the tangent point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkyTransform {
    plane: TangentPlane,
    /// Pixels per degree.
    pub scale: f64,
    /// Radians, counter-clockwise in pixel coordinates.
    pub rotation: f64,
    pub parity: Parity,
    pub translation: (f64, f64),
}

impl SkyTransform {
    pub fn new(
        tangent_ra: f64,
        tangent_dec: f64,
        scale: f64,
        rotation: f64,
        parity: Parity,
        translation: (f64, f64),
    ) -> Self {
        SkyTransform::from_plane(
            TangentPlane::from_radec(tangent_ra, tangent_dec),
            scale,
            rotation,
            parity,
            translation,
        )
    }

    pub(crate) fn from_plane(
        plane: TangentPlane,
        scale: f64,
        rotation: f64,
        parity: Parity,
        translation: (f64, f64),
    ) -> Self {
        SkyTransform {
            plane,
            scale,
            rotation: wrap_angle(rotation),
            parity,
            translation,
        }
    }

    /// Tangent point (ra, dec) in radians.
    pub fn tangent_point(&self) -> (f64, f64) {
        vec_to_radec(self.plane.center())
    }

    pub(crate) fn plane(&self) -> &TangentPlane {
        &self.plane
    }

    /// Pixel position of a sky direction; `None` when it lies 90° or more off the tangent point.
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> Option<(f64, f64)> {
        self.vector_to_pixel(&radec_to_vec(ra, dec))
    }

    pub fn vector_to_pixel(&self, v: &Vector3<f64>) -> Option<(f64, f64)> {
        let (xi, eta) = self.plane.project(v)?;
        let (qx, qy) = self.parity.apply((xi.to_degrees(), eta.to_degrees()));
        let (sin, cos) = self.rotation.sin_cos();
        Some((
            self.scale * (cos * qx - sin * qy) + self.translation.0,
            self.scale * (sin * qx + cos * qy) + self.translation.1,
        ))
    }

    /// Unit vector seen at pixel (x, y).
    pub fn pixel_to_vector(&self, x: f64, y: f64) -> Vector3<f64> {
        let dx = (x - self.translation.0) / self.scale;
        let dy = (y - self.translation.1) / self.scale;
        let (sin, cos) = self.rotation.sin_cos();
        let q = (cos * dx + sin * dy, -sin * dx + cos * dy);
        let (xi, eta) = self.parity.apply(q);
        self.plane.deproject(xi.to_radians(), eta.to_radians())
    }

    /// (ra, dec) in radians seen at pixel (x, y).
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        vec_to_radec(&self.pixel_to_vector(x, y))
    }

    /// Least-squares fit of scale, rotation and translation mapping `stars` onto
    /// `pixels` about a fixed tangent plane and parity. Returns the transform and
    /// its RMS pixel residual.
    pub(crate) fn fit(
        plane: TangentPlane,
        parity: Parity,
        stars: &[Vector3<f64>],
        pixels: &[(f64, f64)],
    ) -> Option<(SkyTransform, f64)> {
        if stars.len() < 2 || stars.len() != pixels.len() {
            return None;
        }
        let plane_pts = stars
            .iter()
            .map(|v| {
                plane
                    .project(v)
                    .map(|(xi, eta)| parity.apply((xi.to_degrees(), eta.to_degrees())))
            })
            .collect::<Option<Vec<_>>>()?;

        let sim = Similarity::fit(&plane_pts, pixels)?;
        let transform = SkyTransform::from_plane(plane, sim.scale, sim.rotation, parity, sim.translation);
        Some((transform, sim.rms))
    }
}

/// 2D similarity `p = s·R(θ)·q + t` (closed-form least squares, Umeyama).
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Similarity {
    pub scale: f64,
    pub rotation: f64,
    pub translation: (f64, f64),
    /// RMS residual in destination units.
    pub rms: f64,
}

impl Similarity {
    pub fn fit(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Similarity> {
        let n = src.len();
        if n < 2 || n != dst.len() {
            return None;
        }
        let inv_n = 1.0 / n as f64;
        let mean = |pts: &[(f64, f64)]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx * inv_n, sy * inv_n)
        };
        let (qmx, qmy) = mean(src);
        let (pmx, pmy) = mean(dst);

        let mut a = 0.0;
        let mut b = 0.0;
        let mut qq = 0.0;
        for (&(qx, qy), &(px, py)) in src.iter().zip(dst) {
            let (qx, qy) = (qx - qmx, qy - qmy);
            let (px, py) = (px - pmx, py - pmy);
            a += qx * px + qy * py;
            b += qx * py - qy * px;
            qq += qx * qx + qy * qy;
        }
        if qq < 1e-18 {
            return None;
        }

        let rotation = b.atan2(a);
        let scale = (a * a + b * b).sqrt() / qq;
        if !scale.is_finite() || scale <= 0.0 {
            return None;
        }
        let (sin, cos) = rotation.sin_cos();
        let translation = (
            pmx - scale * (cos * qmx - sin * qmy),
            pmy - scale * (sin * qmx + cos * qmy),
        );

        let sq: f64 = src
            .iter()
            .zip(dst)
            .map(|(&(qx, qy), &(px, py))| {
                let ex = scale * (cos * qx - sin * qy) + translation.0 - px;
                let ey = scale * (sin * qx + cos * qy) + translation.1 - py;
                ex * ex + ey * ey
            })
            .sum();

        Some(Similarity {
            scale,
            rotation,
            translation,
            rms: (sq * inv_n).sqrt(),
        })
    }
}

/// Wrap to (-π, π].
pub(crate) fn wrap_angle(a: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let w = (a + PI).rem_euclid(TAU) - PI;
    if w <= -PI {
        w + TAU
    } else {
        w
    }
}

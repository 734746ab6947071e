//! Unit-vector geometry on the celestial sphere and gnomonic projection.

use nalgebra::Vector3;

/// Unit vector for (ra, dec) in radians.
#[inline]
pub fn radec_to_vec(ra: f64, dec: f64) -> Vector3<f64> {
    let (sin_ra, cos_ra) = ra.sin_cos();
    let (sin_dec, cos_dec) = dec.sin_cos();
    Vector3::new(cos_dec * cos_ra, cos_dec * sin_ra, sin_dec)
}

/// (ra, dec) in radians, ra wrapped to [0, 2π).
pub fn vec_to_radec(v: &Vector3<f64>) -> (f64, f64) {
    let n = v.normalize();
    let dec = n.z.clamp(-1.0, 1.0).asin();
    let ra = n.y.atan2(n.x).rem_euclid(std::f64::consts::TAU);
    (ra, dec)
}

/// Angle between two directions (radians). Stable for both tiny and near-π angles.
#[inline]
pub fn angular_separation(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    a.cross(b).norm().atan2(a.dot(b))
}

/// Gnomonic projection about a tangent point.
///
/// Plane axes: ξ toward increasing RA (east), η toward the north pole. Plane units
/// are tangent-of-angle, so small offsets read as radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TangentPlane {
    center: Vector3<f64>,
    east: Vector3<f64>,
    north: Vector3<f64>,
}

impl TangentPlane {
    pub fn new(center: Vector3<f64>) -> Self {
        let center = center.normalize();
        let east = Vector3::z().cross(&center);
        // At the poles east is undefined; any perpendicular axis will do
        let east = if east.norm() < 1e-12 {
            Vector3::y()
        } else {
            east.normalize()
        };
        let north = center.cross(&east);
        TangentPlane {
            center,
            east,
            north,
        }
    }

    pub fn from_radec(ra: f64, dec: f64) -> Self {
        TangentPlane::new(radec_to_vec(ra, dec))
    }

    #[inline]
    pub fn center(&self) -> &Vector3<f64> {
        &self.center
    }

    pub fn ra(&self) -> f64 {
        vec_to_radec(&self.center).0
    }

    pub fn dec(&self) -> f64 {
        vec_to_radec(&self.center).1
    }

    /// Plane coordinates of `v`, or `None` for directions 90° or more from the center.
    pub fn project(&self, v: &Vector3<f64>) -> Option<(f64, f64)> {
        let z = v.dot(&self.center);
        if z <= 1e-9 {
            return None;
        }
        Some((v.dot(&self.east) / z, v.dot(&self.north) / z))
    }

    pub fn deproject(&self, xi: f64, eta: f64) -> Vector3<f64> {
        (self.center + self.east * xi + self.north * eta).normalize()
    }
}

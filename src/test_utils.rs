//! Synthetic star fields and fixture catalogs shared by unit tests.

use crate::catalog::sphere::{radec_to_vec, TangentPlane};
use crate::catalog::{bsc, CatalogIndex, CatalogStar};
use crate::matching::transform::{Parity, SkyTransform};
use crate::types::{Detection, GrayFrame};

/// The Ursa Major reference set in BSC JSON form.
pub(crate) const URSA_MAJOR_JSON: &str = include_str!("../testdata/ursa_major.json");

/// Big Dipper bowl and handle start: Dubhe, Merak, Phecda, Megrez, Alioth.
pub(crate) const DIPPER_HR: [u32; 5] = [4301, 4295, 4554, 4660, 4905];

pub(crate) fn ursa_major() -> Vec<CatalogStar> {
    bsc::parse_bsc_json(URSA_MAJOR_JSON).unwrap()
}

pub(crate) fn ursa_major_index() -> CatalogIndex {
    CatalogIndex::new(ursa_major())
}

pub(crate) fn stars_by_hr(stars: &[CatalogStar], hrs: &[u32]) -> Vec<CatalogStar> {
    hrs.iter()
        .map(|hr| stars.iter().find(|s| s.id == *hr).unwrap().clone())
        .collect()
}

/// Transform with its tangent point at the mean direction of `stars`.
pub(crate) fn transform_about(
    stars: &[CatalogStar],
    scale: f64,
    rotation: f64,
    parity: Parity,
    translation: (f64, f64),
) -> SkyTransform {
    let sum = stars
        .iter()
        .fold(nalgebra::Vector3::zeros(), |acc, s| acc + radec_to_vec(s.ra, s.dec));
    let plane = TangentPlane::new(sum.normalize());
    SkyTransform::new(plane.ra(), plane.dec(), scale, rotation, parity, translation)
}

/// Exact pixel positions of `stars` under `transform`, as detections with descending flux.
pub(crate) fn project_detections(stars: &[CatalogStar], transform: &SkyTransform) -> Vec<Detection> {
    stars
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let (x, y) = transform.sky_to_pixel(s.ra, s.dec).unwrap();
            Detection::at(x, y, 1000.0 - i as f64)
        })
        .collect()
}

/// Deterministic generator (64-bit LCG) with Box-Muller normals.
pub(crate) struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed)
    }

    pub fn uniform(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn gaussian(&mut self) -> f64 {
        let u1 = self.uniform().max(1e-15);
        let u2 = self.uniform();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

/// Render Gaussian stars `(x, y, amplitude, sigma)` over a flat background.
pub(crate) fn make_star_field(
    width: usize,
    height: usize,
    stars: &[(f64, f64, f64, f64)],
    background: f32,
    noise_sigma: f32,
) -> Vec<f32> {
    let mut data = vec![background; width * height];

    for &(sx, sy, amp, sigma) in stars {
        let r = (4.0 * sigma).ceil() as i64;
        let inv_2s2 = 1.0 / (2.0 * sigma * sigma);
        for dy in -r..=r {
            for dx in -r..=r {
                let px = sx.round() as i64 + dx;
                let py = sy.round() as i64 + dy;
                if px >= 0 && px < width as i64 && py >= 0 && py < height as i64 {
                    let ddx = px as f64 - sx;
                    let ddy = py as f64 - sy;
                    data[py as usize * width + px as usize] +=
                        (amp * (-inv_2s2 * (ddx * ddx + ddy * ddy)).exp()) as f32;
                }
            }
        }
    }

    if noise_sigma > 0.0 {
        let mut rng = Lcg::new(99);
        for val in data.iter_mut() {
            *val += noise_sigma * rng.gaussian() as f32;
        }
    }

    data
}

pub(crate) fn star_frame(
    width: usize,
    height: usize,
    stars: &[(f64, f64, f64, f64)],
    background: f32,
    noise_sigma: f32,
) -> GrayFrame {
    let data = make_star_field(width, height, stars, background, noise_sigma);
    GrayFrame::new(data, width, height, 255.0).unwrap()
}

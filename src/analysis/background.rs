//! Background estimation: sigma-clipped statistics and optional mesh-grid spatial background.

use rayon::prelude::*;

use crate::processing::stats::{find_median, mad_sigma};

/// Result of background estimation.
pub(crate) struct BackgroundEstimate {
    /// Global background level.
    pub background: f32,
    /// Background spread (MAD sigma), floored at `noise_floor`.
    pub noise: f32,
    /// Per-pixel background map (only if mesh-grid mode was used).
    pub background_map: Option<Vec<f32>>,
}

impl BackgroundEstimate {
    #[inline]
    pub fn at(&self, idx: usize) -> f32 {
        self.background_map
            .as_ref()
            .map_or(self.background, |m| m[idx])
    }
}

const CLIP_ROUNDS: usize = 3;
const CLIP_KAPPA: f32 = 3.0;
/// Global estimation looks at roughly this many pixels.
const GLOBAL_SAMPLE_TARGET: usize = 500_000;
/// A mesh cell losing more than this share of its pixels to clipping holds a star.
const MAX_CLIPPED_SHARE: f32 = 0.3;

/// Global sky level and noise from a strided sample of the frame.
pub(crate) fn estimate_background(
    data: &[f32],
    width: usize,
    height: usize,
    noise_floor: f32,
) -> BackgroundEstimate {
    let stride = ((width * height) as f64 / GLOBAL_SAMPLE_TARGET as f64)
        .sqrt()
        .max(1.0) as usize;
    // Edge rows and columns often carry readout artifacts
    let margin = if width > 16 && height > 16 { 2 } else { 0 };

    let mut samples: Vec<f32> = (margin..height - margin)
        .step_by(stride)
        .flat_map(|y| {
            (margin..width - margin)
                .step_by(stride)
                .map(move |x| data[y * width + x])
        })
        .filter(|v| v.is_finite())
        .collect();

    let (background, sigma) = if samples.is_empty() {
        (0.0, 0.0)
    } else {
        sigma_clipped_stats(&mut samples, CLIP_ROUNDS, CLIP_KAPPA)
    };
    BackgroundEstimate {
        background,
        noise: sigma.max(noise_floor),
        background_map: None,
    }
}

/// Spatially varying sky for frames with gradients.
///
/// The frame is tiled into `cell_size` squares, each tile gets clipped statistics,
/// star-contaminated tiles borrow from their nearest clean neighbor, the tile grid is
/// median-smoothed and then interpolated back to full resolution.
pub(crate) fn estimate_background_mesh(
    data: &[f32],
    width: usize,
    height: usize,
    cell_size: usize,
    noise_floor: f32,
) -> BackgroundEstimate {
    let mut grid = MeshGrid::measure(data, width, height, cell_size.max(16));
    let noise = grid.median_noise();
    grid.fill_contaminated();
    grid.smooth();

    let background_map = grid.interpolate();
    let background = find_median(&mut grid.level.clone());
    BackgroundEstimate {
        background,
        noise: noise.max(noise_floor),
        background_map: Some(background_map),
    }
}

/// Per-tile sky statistics, row-major over `nx × ny` tiles.
struct MeshGrid {
    nx: usize,
    ny: usize,
    cell: usize,
    width: usize,
    height: usize,
    level: Vec<f32>,
    sigma: Vec<f32>,
    clean: Vec<bool>,
}

impl MeshGrid {
    fn measure(data: &[f32], width: usize, height: usize, cell: usize) -> Self {
        let nx = width.div_ceil(cell);
        let ny = height.div_ceil(cell);

        let tiles: Vec<Option<(f32, f32, bool)>> = (0..nx * ny)
            .into_par_iter()
            .map(|t| {
                let (tx, ty) = (t % nx, t / nx);
                let (x0, x1) = (tx * cell, ((tx + 1) * cell).min(width));
                let (y0, y1) = (ty * cell, ((ty + 1) * cell).min(height));
                let mut samples: Vec<f32> = (y0..y1)
                    .flat_map(|y| data[y * width + x0..y * width + x1].iter().copied())
                    .filter(|v| v.is_finite())
                    .collect();
                if samples.len() < 10 {
                    return None;
                }
                let before = samples.len() as f32;
                let (level, sigma) = sigma_clipped_stats(&mut samples, CLIP_ROUNDS, CLIP_KAPPA);
                let clean = (samples.len() as f32) >= before * (1.0 - MAX_CLIPPED_SHARE);
                Some((level, sigma, clean))
            })
            .collect();

        let mut grid = MeshGrid {
            nx,
            ny,
            cell,
            width,
            height,
            level: vec![0.0; nx * ny],
            sigma: vec![0.0; nx * ny],
            clean: vec![false; nx * ny],
        };
        for (t, tile) in tiles.into_iter().enumerate() {
            if let Some((level, sigma, clean)) = tile {
                grid.level[t] = level;
                grid.sigma[t] = sigma;
                grid.clean[t] = clean;
            }
        }
        grid
    }

    fn median_noise(&self) -> f32 {
        let mut sigmas: Vec<f32> = self
            .sigma
            .iter()
            .zip(&self.clean)
            .filter_map(|(&s, &ok)| ok.then_some(s))
            .collect();
        find_median(&mut sigmas)
    }

    /// Replace contaminated tiles with the closest clean tile (Manhattan distance,
    /// ties to the lower tile index).
    fn fill_contaminated(&mut self) {
        let clean: Vec<usize> = (0..self.clean.len()).filter(|&t| self.clean[t]).collect();
        if clean.is_empty() {
            return;
        }
        for t in 0..self.level.len() {
            if self.clean[t] {
                continue;
            }
            let (tx, ty) = (t % self.nx, t / self.nx);
            let donor = clean
                .iter()
                .copied()
                .min_by_key(|&c| (tx.abs_diff(c % self.nx) + ty.abs_diff(c / self.nx), c))
                .unwrap_or(t);
            self.level[t] = self.level[donor];
            self.sigma[t] = self.sigma[donor];
        }
    }

    /// 3×3 median over the tile levels.
    fn smooth(&mut self) {
        let (nx, ny) = (self.nx, self.ny);
        let mut window = Vec::with_capacity(9);
        let smoothed: Vec<f32> = (0..nx * ny)
            .map(|t| {
                let (tx, ty) = (t % nx, t / nx);
                window.clear();
                for y in ty.saturating_sub(1)..(ty + 2).min(ny) {
                    for x in tx.saturating_sub(1)..(tx + 2).min(nx) {
                        window.push(self.level[y * nx + x]);
                    }
                }
                find_median(&mut window)
            })
            .collect();
        self.level = smoothed;
    }

    /// Bilinear interpolation between tile centers.
    fn interpolate(&self) -> Vec<f32> {
        let (width, nx, ny) = (self.width, self.nx, self.ny);
        let mut map = vec![0.0_f32; width * self.height];
        if nx < 2 || ny < 2 {
            map.fill(self.level[0]);
            return map;
        }

        let cell = self.cell as f32;
        // Fractional tile index and the lower tile of the bracketing pair
        let locate = |p: usize, n: usize| {
            let f = (p as f32 + 0.5) / cell - 0.5;
            let i = (f.floor().max(0.0) as usize).min(n - 2);
            (i, (f - i as f32).clamp(0.0, 1.0))
        };

        map.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
            let (iy, fy) = locate(y, ny);
            let lower = &self.level[iy * nx..(iy + 1) * nx];
            let upper = &self.level[(iy + 1) * nx..(iy + 2) * nx];
            for (x, out) in row.iter_mut().enumerate() {
                let (ix, fx) = locate(x, nx);
                let top = lower[ix] + (lower[ix + 1] - lower[ix]) * fx;
                let bottom = upper[ix] + (upper[ix + 1] - upper[ix]) * fx;
                *out = top + (bottom - top) * fy;
            }
        });
        map
    }
}

/// Iterative sigma-clipped statistics. Returns (median, sigma_MAD).
/// Reorders and shrinks `samples` in place.
fn sigma_clipped_stats(samples: &mut Vec<f32>, rounds: usize, kappa: f32) -> (f32, f32) {
    let mut median = find_median(samples);
    let mut sigma = 0.0_f32;
    let mut abs_devs = Vec::with_capacity(samples.len());

    for _ in 0..rounds {
        if samples.len() < 10 {
            break;
        }
        median = find_median(samples);
        sigma = mad_sigma(samples, median, &mut abs_devs);

        // Zero spread: the median is exact, clipping would only discard signal
        if sigma < 1e-12 {
            return (median, 0.0);
        }

        let lo = median - kappa * sigma;
        let hi = median + kappa * sigma;
        samples.retain(|&x| x >= lo && x <= hi);
    }

    if samples.len() < 10 {
        return (median, sigma);
    }

    median = find_median(samples);
    sigma = mad_sigma(samples, median, &mut abs_devs);
    (median, sigma)
}

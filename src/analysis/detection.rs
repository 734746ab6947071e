//! Point-source detection: thresholding + 8-connected component labeling.

use super::background::BackgroundEstimate;
use crate::types::Detection;

/// Detection parameters.
pub(crate) struct DetectionParams {
    /// Foreground cut, in data units above the local background.
    pub threshold: f32,
    pub min_star_area: usize,
    pub max_star_area: usize,
    /// Raw pixel value at or above which a blob counts as saturated.
    pub saturation_limit: f32,
    pub reject_saturated: bool,
    pub max_aspect_ratio: f32,
    pub max_stars: usize,
    /// Centroids closer than this (pixels) are merged into the brighter one.
    pub min_separation: f64,
}

/// Running sums for one connected component.
#[derive(Clone)]
struct Blob {
    area: usize,
    sum_w: f64,
    sum_wx: f64,
    sum_wy: f64,
    sum_wxx: f64,
    sum_wyy: f64,
    peak: f32,
    peak_raw: f32,
    min_x: usize,
    max_x: usize,
    min_y: usize,
    max_y: usize,
    touches_border: bool,
}

impl Blob {
    fn new() -> Self {
        Blob {
            area: 0,
            sum_w: 0.0,
            sum_wx: 0.0,
            sum_wy: 0.0,
            sum_wxx: 0.0,
            sum_wyy: 0.0,
            peak: f32::MIN,
            peak_raw: f32::MIN,
            min_x: usize::MAX,
            max_x: 0,
            min_y: usize::MAX,
            max_y: 0,
            touches_border: false,
        }
    }

    fn add(&mut self, x: usize, y: usize, val: f32, raw: f32, border: bool) {
        let w = val.max(0.0) as f64;
        let (fx, fy) = (x as f64, y as f64);
        self.area += 1;
        self.sum_w += w;
        self.sum_wx += w * fx;
        self.sum_wy += w * fy;
        self.sum_wxx += w * fx * fx;
        self.sum_wyy += w * fy * fy;
        self.peak = self.peak.max(val);
        self.peak_raw = self.peak_raw.max(raw);
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
        self.touches_border |= border;
    }
}

/// Detect point sources in a single-channel image.
///
/// `data`: raw values, NOT background-subtracted.
/// Returns detections sorted by flux descending plus the count before the `max_stars` cap.
pub(crate) fn detect_stars(
    data: &[f32],
    width: usize,
    height: usize,
    bg: &BackgroundEstimate,
    params: &DetectionParams,
) -> (Vec<Detection>, usize) {
    // Pass 1: provisional labels, 8-connectivity (W, NW, N, NE already visited)
    let mut labels = vec![0u32; width * height];
    let mut parent = vec![0u32; 1]; // Index 0 unused (label 0 = background)

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let val = data[idx] - bg.at(idx);
            if !val.is_finite() || val <= params.threshold {
                continue;
            }

            let mut label = 0u32;
            let consider = |n: u32, label: &mut u32, parent: &mut Vec<u32>| {
                if n == 0 {
                    return;
                }
                if *label == 0 {
                    *label = find(parent, n);
                } else {
                    union(parent, *label, n);
                    *label = find(parent, *label);
                }
            };
            if x > 0 {
                consider(labels[idx - 1], &mut label, &mut parent);
            }
            if y > 0 {
                let up = idx - width;
                if x > 0 {
                    consider(labels[up - 1], &mut label, &mut parent);
                }
                consider(labels[up], &mut label, &mut parent);
                if x + 1 < width {
                    consider(labels[up + 1], &mut label, &mut parent);
                }
            }

            if label == 0 {
                label = parent.len() as u32;
                parent.push(label);
            }
            labels[idx] = label;
        }
    }

    // Pass 2: accumulate moments per root label, in order of first appearance
    let mut slot = vec![u32::MAX; parent.len()];
    let mut blobs: Vec<Blob> = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let l = labels[idx];
            if l == 0 {
                continue;
            }
            let root = find(&mut parent, l) as usize;
            if slot[root] == u32::MAX {
                slot[root] = blobs.len() as u32;
                blobs.push(Blob::new());
            }
            let border = x == 0 || y == 0 || x == width - 1 || y == height - 1;
            let raw = data[idx];
            blobs[slot[root] as usize].add(x, y, raw - bg.at(idx), raw, border);
        }
    }

    let mut stars = Vec::new();
    for blob in &blobs {
        if blob.area < params.min_star_area || blob.area > params.max_star_area {
            continue;
        }

        // Aspect ratio check (reject cosmic rays/satellite trails)
        let bbox_w = (blob.max_x - blob.min_x + 1) as f32;
        let bbox_h = (blob.max_y - blob.min_y + 1) as f32;
        if bbox_w.max(bbox_h) / bbox_w.min(bbox_h) > params.max_aspect_ratio {
            continue;
        }

        let saturated = blob.peak_raw >= params.saturation_limit;
        if saturated && params.reject_saturated {
            continue;
        }

        if blob.sum_w < 1e-12 {
            continue;
        }

        let cx = blob.sum_wx / blob.sum_w;
        let cy = blob.sum_wy / blob.sum_w;
        let mxx = blob.sum_wxx / blob.sum_w - cx * cx;
        let myy = blob.sum_wyy / blob.sum_w - cy * cy;
        let radius = (0.5 * (mxx + myy)).max(0.0).sqrt();
        let snr = blob.sum_w / (bg.noise as f64 * (blob.area as f64).sqrt());

        stars.push(Detection {
            pixel_x: cx,
            pixel_y: cy,
            flux: blob.sum_w,
            radius,
            peak: blob.peak as f64,
            area: blob.area,
            snr,
            saturated,
            touches_border: blob.touches_border,
        });
    }

    stars.sort_by(|a, b| {
        b.flux
            .total_cmp(&a.flux)
            .then(a.pixel_y.total_cmp(&b.pixel_y))
            .then(a.pixel_x.total_cmp(&b.pixel_x))
    });

    // No two centroids within `min_separation`: keep the brighter
    let min_sep_sq = params.min_separation * params.min_separation;
    let mut kept: Vec<Detection> = Vec::with_capacity(stars.len());
    for star in stars {
        let crowded = kept.iter().any(|k| {
            let dx = k.pixel_x - star.pixel_x;
            let dy = k.pixel_y - star.pixel_y;
            dx * dx + dy * dy < min_sep_sq
        });
        if !crowded {
            kept.push(star);
        }
    }

    let total = kept.len();
    kept.truncate(params.max_stars);
    (kept, total)
}

// ── Union-Find ──────────────────────────────────────────────────────────────

fn find(parent: &mut [u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        parent[x as usize] = parent[parent[x as usize] as usize]; // path halving
        x = parent[x as usize];
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[ra.max(rb) as usize] = ra.min(rb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_star_field;

    fn flat_background(level: f32, noise: f32) -> BackgroundEstimate {
        BackgroundEstimate {
            background: level,
            noise,
            background_map: None,
        }
    }

    fn params(threshold: f32) -> DetectionParams {
        DetectionParams {
            threshold,
            min_star_area: 5,
            max_star_area: 2000,
            saturation_limit: 60000.0,
            reject_saturated: false,
            max_aspect_ratio: 3.0,
            max_stars: 200,
            min_separation: 1.0,
        }
    }

    #[test]
    fn test_detect_synthetic_stars() {
        let star_defs = [
            (50.3, 50.7, 5000.0, 2.0),
            (100.0, 80.0, 3000.0, 2.0),
            (150.6, 120.2, 7000.0, 2.0),
            (30.0, 160.5, 4000.0, 2.0),
            (170.1, 40.9, 6000.0, 2.0),
        ];
        let data = make_star_field(200, 200, &star_defs, 1000.0, 0.0);
        let bg = flat_background(1000.0, 1.0);

        let (stars, total) = detect_stars(&data, 200, 200, &bg, &params(5.0));
        assert_eq!(stars.len(), 5);
        assert_eq!(total, 5);

        for &(sx, sy, _, _) in &star_defs {
            let closest = stars
                .iter()
                .map(|s| ((s.pixel_x - sx).powi(2) + (s.pixel_y - sy).powi(2)).sqrt())
                .fold(f64::INFINITY, f64::min);
            assert!(closest < 0.1, "star at ({}, {}) off by {}", sx, sy, closest);
        }

        // Sorted by flux, brightest first
        assert!((stars[0].pixel_x - 150.6).abs() < 0.1);
        assert!(stars.iter().all(|s| !s.touches_border && !s.saturated));
    }

    #[test]
    fn test_reject_hot_pixels() {
        let width = 100;
        let mut data = make_star_field(width, 100, &[(30.0, 30.0, 5000.0, 3.0)], 1000.0, 0.0);
        data[50 * width + 50] = 10000.0;

        let (stars, _) = detect_stars(&data, width, 100, &flat_background(1000.0, 1.0), &params(5.0));
        assert_eq!(stars.len(), 1);
        assert!((stars[0].pixel_x - 30.0).abs() < 0.1);
        assert!((stars[0].radius - 3.0).abs() < 0.3, "radius {}", stars[0].radius);
    }

    #[test]
    fn test_diagonal_pixels_join() {
        // Two pixels touching only at a corner form one blob under 8-connectivity
        let width = 20;
        let mut data = vec![0.0_f32; width * 20];
        for &(x, y) in &[(5, 5), (6, 5), (5, 6), (6, 6), (7, 7), (8, 7), (7, 8), (8, 8)] {
            data[y * width + x] = 100.0;
        }
        let (stars, _) = detect_stars(&data, width, 20, &flat_background(0.0, 1.0), &params(5.0));
        assert_eq!(stars.len(), 1);
        assert_eq!(stars[0].area, 8);
        assert!((stars[0].pixel_x - 6.5).abs() < 1e-9);
        assert!((stars[0].pixel_y - 6.5).abs() < 1e-9);
    }

    #[test]
    fn test_border_and_saturation_flags() {
        let width = 60;
        let mut data = make_star_field(width, 60, &[(1.0, 30.0, 500.0, 1.5)], 0.0, 0.0);
        // Saturated plateau in the middle
        for y in 28..33 {
            for x in 38..43 {
                data[y * width + x] = 65535.0;
            }
        }
        let (stars, _) = detect_stars(&data, width, 60, &flat_background(0.0, 1.0), &params(5.0));
        assert_eq!(stars.len(), 2);
        let sat = stars.iter().find(|s| s.saturated).unwrap();
        assert!((sat.pixel_x - 40.0).abs() < 1e-9);
        let edge = stars.iter().find(|s| s.touches_border).unwrap();
        assert!(edge.pixel_x < 3.0);

        let mut strict = params(5.0);
        strict.reject_saturated = true;
        let (stars, _) = detect_stars(&data, width, 60, &flat_background(0.0, 1.0), &strict);
        assert_eq!(stars.len(), 1);
    }

    #[test]
    fn test_elongated_blob_rejected() {
        let width = 80;
        let mut data = vec![0.0_f32; width * 40];
        for x in 10..40 {
            data[20 * width + x] = 100.0;
            data[21 * width + x] = 100.0;
        }
        let (stars, _) = detect_stars(&data, width, 40, &flat_background(0.0, 1.0), &params(5.0));
        assert!(stars.is_empty());
    }

    #[test]
    fn test_max_stars_cap_keeps_brightest() {
        let star_defs: Vec<_> = (0..6)
            .map(|i| (20.0 + 30.0 * i as f64, 50.0, 1000.0 + 100.0 * i as f64, 1.5))
            .collect();
        let data = make_star_field(200, 100, &star_defs, 0.0, 0.0);
        let mut p = params(5.0);
        p.max_stars = 2;
        let (stars, total) = detect_stars(&data, 200, 100, &flat_background(0.0, 1.0), &p);
        assert_eq!(total, 6);
        assert_eq!(stars.len(), 2);
        assert!((stars[0].pixel_x - 170.0).abs() < 0.1);
        assert!((stars[1].pixel_x - 140.0).abs() < 0.1);
    }
}

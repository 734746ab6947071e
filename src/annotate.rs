//! Identification overlay: circles and labels drawn onto a copy of the input image.

use image::{DynamicImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::glyphs::{glyph, text_size, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::types::Identification;

/// Configuration for annotation rendering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Marker circle radius in pixels.
    pub marker_radius: f32,
    /// Line thickness: 1 = single pixel, 2 = 3px cross kernel, 3 = 5px diamond.
    pub line_width: u8,
    pub marker_color: [u8; 3],
    pub label_color: [u8; 3],
    /// Bottom-left corner of the label relative to the detection.
    pub label_offset: (i32, i32),
    /// Integer magnification of the 5×7 label font.
    pub label_scale: u32,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        AnnotationConfig {
            marker_radius: 15.0,
            line_width: 2,
            marker_color: [255, 0, 0],
            label_color: [255, 255, 0],
            label_offset: (-30, -25),
            label_scale: 2,
        }
    }
}

/// Pre-computed annotation for one identification, in image coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StarAnnotation {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    /// `"{name} ({confidence:.2})"`.
    pub label: String,
    /// Bottom-left corner of the label.
    pub label_x: i32,
    pub label_y: i32,
    /// Rendered label width and height in pixels.
    pub label_size: (u32, u32),
    pub marker_color: [u8; 3],
    pub label_color: [u8; 3],
}

/// Label text for an identification.
pub fn label_for(id: &Identification) -> String {
    format!("{} ({:.2})", id.star.name, id.confidence)
}

// ── Tier 1: Raw geometry ──

/// Marker and label geometry for each identification.
pub fn compute_annotations(
    identifications: &[Identification],
    config: &AnnotationConfig,
) -> Vec<StarAnnotation> {
    identifications
        .iter()
        .map(|id| {
            let x = id.detection.pixel_x as f32;
            let y = id.detection.pixel_y as f32;
            let label = label_for(id);
            let label_size = text_size(&label, config.label_scale.max(1));
            StarAnnotation {
                x,
                y,
                radius: config.marker_radius,
                label,
                label_x: x.round() as i32 + config.label_offset.0,
                label_y: y.round() as i32 + config.label_offset.1,
                label_size,
                marker_color: config.marker_color,
                label_color: config.label_color,
            }
        })
        .collect()
}

// ── Tier 2: RGBA overlay layer ──

/// Rasterize annotations into a transparent RGBA layer.
pub fn create_annotation_layer(
    width: u32,
    height: u32,
    identifications: &[Identification],
    config: &AnnotationConfig,
) -> RgbaImage {
    let mut layer = RgbaImage::new(width, height);
    let mut canvas = Canvas::new(&mut layer, width, height, 4);
    draw_all(&mut canvas, identifications, config);
    layer
}

// ── Tier 3: Burn into a copy of the image ──

/// Draw identifications onto a copy of `image`. The input is never modified.
pub fn annotate(image: &RgbImage, identifications: &[Identification], config: &AnnotationConfig) -> RgbImage {
    let mut out = image.clone();
    let (width, height) = out.dimensions();
    let mut canvas = Canvas::new(&mut out, width, height, 3);
    draw_all(&mut canvas, identifications, config);
    out
}

/// [`annotate`] for any decoded image; the result is 8-bit RGB.
pub fn annotate_dynamic(
    image: &DynamicImage,
    identifications: &[Identification],
    config: &AnnotationConfig,
) -> RgbImage {
    let mut out = image.to_rgb8();
    let (width, height) = out.dimensions();
    let mut canvas = Canvas::new(&mut out, width, height, 3);
    draw_all(&mut canvas, identifications, config);
    out
}

fn draw_all(canvas: &mut Canvas, identifications: &[Identification], config: &AnnotationConfig) {
    let lw = config.line_width.max(1);
    for ann in compute_annotations(identifications, config) {
        canvas.draw_circle(ann.x, ann.y, ann.radius, ann.marker_color, lw);
        canvas.draw_text(&ann.label, ann.label_x, ann.label_y, config.label_scale.max(1), ann.label_color);
    }
}

// ── Drawing primitives (private) ──

/// Interleaved 8-bit pixel buffer; a 4-channel buffer gets alpha 255 on every write.
struct Canvas<'a> {
    buf: &'a mut [u8],
    width: usize,
    height: usize,
    bpp: usize,
}

impl<'a> Canvas<'a> {
    fn new(buf: &'a mut [u8], width: u32, height: u32, bpp: usize) -> Self {
        Canvas {
            buf,
            width: width as usize,
            height: height as usize,
            bpp,
        }
    }

    /// Bounds-checked single pixel write.
    #[inline]
    fn set_pixel_one(&mut self, x: i32, y: i32, color: [u8; 3]) {
        if x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height {
            let idx = (y as usize * self.width + x as usize) * self.bpp;
            self.buf[idx..idx + 3].copy_from_slice(&color);
            if self.bpp == 4 {
                self.buf[idx + 3] = 255;
            }
        }
    }

    /// Thick pixel write: lw=1 single pixel, lw=2 3px cross (+), lw>=3 5px diamond.
    #[inline]
    fn set_pixel(&mut self, x: i32, y: i32, color: [u8; 3], lw: u8) {
        self.set_pixel_one(x, y, color);
        for r in 1..=(lw.min(3) as i32 - 1) {
            self.set_pixel_one(x - r, y, color);
            self.set_pixel_one(x + r, y, color);
            self.set_pixel_one(x, y - r, color);
            self.set_pixel_one(x, y + r, color);
        }
    }

    /// Bresenham line with thickness.
    fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: [u8; 3], lw: u8) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let mut x = x0;
        let mut y = y0;

        loop {
            self.set_pixel(x, y, color, lw);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                if x == x1 {
                    break;
                }
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                if y == y1 {
                    break;
                }
                err += dx;
                y += sy;
            }
        }
    }

    /// Circle as a closed polyline through parametric samples.
    fn draw_circle(&mut self, cx: f32, cy: f32, radius: f32, color: [u8; 3], lw: u8) {
        let steps = ((radius * 4.0).ceil() as usize).clamp(16, 256);
        let point = |i: usize| {
            let t = i as f32 * std::f32::consts::TAU / steps as f32;
            (
                (cx + radius * t.cos()).round() as i32,
                (cy + radius * t.sin()).round() as i32,
            )
        };
        let mut prev = point(0);
        for i in 1..=steps {
            let next = point(i);
            self.draw_line(prev.0, prev.1, next.0, next.1, color, lw);
            prev = next;
        }
    }

    /// Bitmap text with its bottom-left corner at (x, y).
    fn draw_text(&mut self, text: &str, x: i32, y: i32, scale: u32, color: [u8; 3]) {
        let s = scale as i32;
        let top = y - (GLYPH_HEIGHT * scale) as i32 + 1;
        for (ci, c) in text.chars().enumerate() {
            let x0 = x + (ci as u32 * GLYPH_ADVANCE * scale) as i32;
            for (row, bits) in glyph(c).iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (0x10 >> col) == 0 {
                        continue;
                    }
                    let px = x0 + col as i32 * s;
                    let py = top + row as i32 * s;
                    for dy in 0..s {
                        for dx in 0..s {
                            self.set_pixel_one(px + dx, py + dy, color);
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
    use crate::catalog::CatalogStar;
    use crate::types::Detection;
    use image::Rgb;

    fn ident(name: &str, x: f64, y: f64, confidence: f64) -> Identification {
        Identification {
            detection: Detection::at(x, y, 100.0),
            star: CatalogStar {
                id: 4301,
                name: name.to_string(),
                ra: 0.0,
                dec: 0.0,
                magnitude: 1.79,
            },
            residual: 0.0,
            confidence,
        }
    }

    #[test]
    fn test_compute_annotations_geometry() {
        let anns = compute_annotations(&[ident("Dubhe", 100.4, 80.0, 0.987)], &AnnotationConfig::default());
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0].label, "Dubhe (0.99)");
        assert_eq!((anns[0].label_x, anns[0].label_y), (70, 55));
        assert_eq!(anns[0].radius, 15.0);
        assert_eq!(anns[0].label_size, (142, 14));
        assert_eq!(anns[0].marker_color, [255, 0, 0]);
        assert!(compute_annotations(&[], &AnnotationConfig::default()).is_empty());
    }

    #[test]
    fn test_annotate_does_not_mutate_input() {
        let image = RgbImage::from_pixel(200, 150, Rgb([5, 5, 5]));
        let ids = [ident("Merak", 100.0, 75.0, 0.95)];
        let out = annotate(&image, &ids, &AnnotationConfig::default());

        assert!(image.pixels().all(|p| *p == Rgb([5, 5, 5])));
        assert_eq!(out.dimensions(), image.dimensions());
        // Marker ring to the right of the star, centre untouched
        assert_eq!(*out.get_pixel(115, 75), Rgb([255, 0, 0]));
        assert_eq!(*out.get_pixel(100, 75), Rgb([5, 5, 5]));
        // Some label pixels above-left of the star
        let yellow = out.pixels().filter(|p| **p == Rgb([255, 255, 0])).count();
        assert!(yellow > 20, "only {} label pixels", yellow);
    }

    #[test]
    fn test_annotation_near_edges_is_clipped() {
        let image = RgbImage::new(40, 30);
        let ids = [ident("Alkaid", 1.0, 2.0, 0.5), ident("Far", -500.0, 900.0, 0.5)];
        let out = annotate(&image, &ids, &AnnotationConfig::default());
        assert!(out.pixels().any(|p| *p == Rgb([255, 0, 0])));
    }

    #[test]
    fn test_create_annotation_layer() {
        let layer = create_annotation_layer(100, 100, &[ident("Phecda", 50.0, 50.0, 0.9)], &AnnotationConfig::default());
        assert_eq!(layer.dimensions(), (100, 100));
        let drawn = layer.pixels().filter(|px| px[3] == 255).count();
        assert!(drawn > 0, "Expected some drawn pixels in layer");
        assert_eq!(layer.get_pixel(50, 50)[3], 0);
    }

    #[test]
    fn test_annotate_dynamic_converts() {
        let image = DynamicImage::new_luma8(64, 64);
        let out = annotate_dynamic(&image, &[ident("Megrez", 32.0, 32.0, 0.8)], &AnnotationConfig::default());
        assert_eq!(out.dimensions(), (64, 64));
        assert_eq!(*out.get_pixel(47, 32), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_bresenham_diagonal() {
        let mut buf = vec![0u8; 10 * 10 * 3];
        let mut canvas = Canvas::new(&mut buf, 10, 10, 3);
        canvas.draw_line(0, 0, 9, 9, [255, 0, 0], 1);
        let red_count = buf.chunks_exact(3).filter(|px| px[0] == 255).count();
        assert_eq!(red_count, 10);
    }
}

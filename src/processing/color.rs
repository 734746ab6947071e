use image::RgbImage;
use rayon::prelude::*;

use crate::types::GrayFrame;

/// Extract luminance from planar RGB data: L = 0.2126R + 0.7152G + 0.0722B
pub fn extract_luminance(data: &[f32], width: usize, height: usize) -> Vec<f32> {
    let plane_size = width * height;
    let r = &data[..plane_size];
    let g = &data[plane_size..2 * plane_size];
    let b = &data[2 * plane_size..3 * plane_size];

    let mut lum = vec![0.0_f32; plane_size];
    const CHUNK: usize = 8192;
    lum.par_chunks_mut(CHUNK)
        .enumerate()
        .for_each(|(ci, chunk)| {
            let off = ci * CHUNK;
            for (i, dst) in chunk.iter_mut().enumerate() {
                let idx = off + i;
                *dst = 0.2126 * r[idx] + 0.7152 * g[idx] + 0.0722 * b[idx];
            }
        });
    lum
}

/// Linear 8-bit gray rendering of a frame, replicated to RGB.
pub fn frame_to_rgb(frame: &GrayFrame) -> RgbImage {
    let scale = 255.0 / frame.white_level();
    let mut rgb = vec![0u8; frame.data().len() * 3];
    rgb.par_chunks_mut(3)
        .zip(frame.data().par_iter())
        .for_each(|(px, &v)| {
            let g = (v * scale).round().clamp(0.0, 255.0) as u8;
            px.fill(g);
        });
    // Length matches width * height * 3 by construction.
    RgbImage::from_raw(frame.width() as u32, frame.height() as u32, rgb)
        .unwrap_or_else(|| RgbImage::new(frame.width() as u32, frame.height() as u32))
}

//! Face preprocessing for classifier input.
//!
//! Each ensemble member declares its own expected input shape, so
//! preprocessing is parameterized per model: area-preserving resize,
//! local contrast enhancement (CLAHE), scale to [0, 1], reshape to the
//! declared tensor rank.

use image::GrayImage;
use ndarray::{ArrayD, IxDyn};

use super::classifier::ModelDescriptor;

/// CLAHE tile grid (8x8, the conventional default).
const CLAHE_TILES: u32 = 8;

/// CLAHE clip limit as a multiple of the uniform histogram bin height.
const CLAHE_CLIP_LIMIT: f32 = 2.0;

/// Resize with area averaging: each target pixel is the mean of the
/// source rectangle it covers. Preserves overall intensity when
/// downscaling, which the classifiers were trained against.
pub fn resize_area(src: &GrayImage, target_width: u32, target_height: u32) -> GrayImage {
    let (sw, sh) = src.dimensions();
    if sw == target_width && sh == target_height {
        return src.clone();
    }

    let mut out = GrayImage::new(target_width, target_height);
    let x_scale = sw as f32 / target_width as f32;
    let y_scale = sh as f32 / target_height as f32;

    for ty in 0..target_height {
        let y0 = (ty as f32 * y_scale).floor() as u32;
        let y1 = (((ty + 1) as f32 * y_scale).ceil() as u32).min(sh).max(y0 + 1);
        for tx in 0..target_width {
            let x0 = (tx as f32 * x_scale).floor() as u32;
            let x1 = (((tx + 1) as f32 * x_scale).ceil() as u32).min(sw).max(x0 + 1);

            let mut sum = 0u64;
            for sy in y0..y1 {
                for sx in x0..x1 {
                    sum += src.get_pixel(sx, sy).0[0] as u64;
                }
            }
            let count = ((y1 - y0) * (x1 - x0)) as u64;
            out.put_pixel(tx, ty, image::Luma([(sum / count) as u8]));
        }
    }
    out
}

/// Contrast-limited adaptive histogram equalization over a tile grid,
/// with bilinear interpolation between neighboring tile mappings to
/// avoid visible tile seams.
pub fn clahe(src: &GrayImage) -> GrayImage {
    let (w, h) = src.dimensions();
    if w < CLAHE_TILES || h < CLAHE_TILES {
        return src.clone();
    }

    let tiles_x = CLAHE_TILES;
    let tiles_y = CLAHE_TILES;
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);

    // Per-tile clipped-CDF lookup tables.
    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);

            let mut hist = [0u32; 256];
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[src.get_pixel(x, y).0[0] as usize] += 1;
                    count += 1;
                }
            }
            if count == 0 {
                continue;
            }

            // Clip the histogram and redistribute the excess uniformly.
            let clip = ((count as f32 / 256.0) * CLAHE_CLIP_LIMIT).max(1.0) as u32;
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let bonus = excess / 256;
            for bin in hist.iter_mut() {
                *bin += bonus;
            }

            let total: u32 = hist.iter().sum();
            let mut cdf = 0u32;
            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            for (value, bin) in hist.iter().enumerate() {
                cdf += bin;
                lut[value] = ((cdf as f32 / total as f32) * 255.0).round() as u8;
            }
        }
    }

    // Map each pixel through bilinearly interpolated neighboring LUTs.
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = fy.floor().max(0.0) as u32;
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let wy = (fy - ty0 as f32).clamp(0.0, 1.0);

        for x in 0..w {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = fx.floor().max(0.0) as u32;
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let wx = (fx - tx0 as f32).clamp(0.0, 1.0);

            let v = src.get_pixel(x, y).0[0] as usize;
            let tl = luts[(ty0 * tiles_x + tx0) as usize][v] as f32;
            let tr = luts[(ty0 * tiles_x + tx1) as usize][v] as f32;
            let bl = luts[(ty1 * tiles_x + tx0) as usize][v] as f32;
            let br = luts[(ty1 * tiles_x + tx1) as usize][v] as f32;

            let top = tl * (1.0 - wx) + tr * wx;
            let bottom = bl * (1.0 - wx) + br * wx;
            let value = top * (1.0 - wy) + bottom * wy;
            out.put_pixel(x, y, image::Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Full preprocessing chain for one model's declared shape.
pub fn preprocess_face(face: &GrayImage, descriptor: &ModelDescriptor) -> ArrayD<f32> {
    let resized = resize_area(face, descriptor.input_width, descriptor.input_height);
    let enhanced = clahe(&resized);

    let h = descriptor.input_height as usize;
    let w = descriptor.input_width as usize;
    let data: Vec<f32> = enhanced.pixels().map(|p| p.0[0] as f32 / 255.0).collect();

    let shape: Vec<usize> = match descriptor.tensor_rank {
        2 => vec![h, w],
        3 => vec![1, h, w],
        _ => vec![1, h, w, 1],
    };
    ArrayD::from_shape_vec(IxDyn(&shape), data)
        .expect("shape product equals pixel count by construction")
}

//! Bilinear resampling with OpenCV `INTER_LINEAR` geometry.
//!
//! Each output pixel blends the 2x2 source pixels around its half-pixel
//! centre; sample positions outside the image snap to the edge pixel.
//! No anti-aliasing is applied when shrinking.

use image::RgbImage;

/// Source indices and weight of the second index for one output coordinate.
fn sample(dst: usize, inv_scale: f32, len: usize) -> (usize, usize, f32) {
    let src = (dst as f32 + 0.5) * inv_scale - 0.5;
    let floor = src.floor();
    if floor < 0.0 {
        return (0, 0, 0.0);
    }
    let i0 = floor as usize;
    if i0 + 1 >= len {
        return (len - 1, len - 1, 0.0);
    }
    (i0, i0 + 1, src - floor)
}

/// Resize a packed RGB buffer of `width` x `height` to `new_w` x `new_h`.
pub fn bilinear_rgb(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let inv_scale_x = width as f32 / new_w as f32;
    let inv_scale_y = height as f32 / new_h as f32;
    let columns: Vec<(usize, usize, f32)> = (0..new_w).map(|x| sample(x, inv_scale_x, width)).collect();
    let mut resized = vec![0u8; new_w * new_h * 3];

    for y in 0..new_h {
        let (y0, y1, fy) = sample(y, inv_scale_y, height);
        for (x, &(x0, x1, fx)) in columns.iter().enumerate() {
            for c in 0..3 {
                let tl = src[(y0 * width + x0) * 3 + c] as f32;
                let tr = src[(y0 * width + x1) * 3 + c] as f32;
                let bl = src[(y1 * width + x0) * 3 + c] as f32;
                let br = src[(y1 * width + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                resized[(y * new_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    resized
}

/// [`bilinear_rgb`] over an [`RgbImage`].
pub fn resize_rgb(image: &RgbImage, new_w: u32, new_h: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let data = bilinear_rgb(image.as_raw(), width as usize, height as usize, new_w as usize, new_h as usize);
    let mut resized = RgbImage::new(new_w, new_h);
    resized.copy_from_slice(&data);
    resized
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gray_row(values: &[u8]) -> RgbImage {
        RgbImage::from_fn(values.len() as u32, 1, |x, _| {
            let v = values[x as usize];
            Rgb([v, v, v])
        })
    }

    fn reds(image: &RgbImage) -> Vec<u8> {
        image.pixels().map(|p| p.0[0]).collect()
    }

    #[test]
    fn test_uniform_stays_uniform() {
        let src: Vec<u8> = [10u8, 128, 240].repeat(100 * 100);
        let resized = bilinear_rgb(&src, 100, 100, 200, 150);
        assert_eq!(resized.len(), 200 * 150 * 3);
        assert!(resized.chunks_exact(3).all(|px| px == [10, 128, 240]));
    }

    #[test]
    fn test_halving_averages_each_2x2_block() {
        // v = 10x + 40y; every output pixel sits exactly between four inputs.
        let src = RgbImage::from_fn(4, 4, |x, y| {
            let v = (10 * x + 40 * y) as u8;
            Rgb([v, v, v])
        });
        let out = resize_rgb(&src, 2, 2);
        assert_eq!(reds(&out), vec![25, 45, 105, 125]);
    }

    #[test]
    fn test_shrinking_only_blends_nearest_pair() {
        // 8 -> 2 samples at x = 1.5 and 5.5; the spikes at 2 and 5 are
        // the only non-zero neighbours, nothing wider is averaged in.
        let out = resize_rgb(&gray_row(&[0, 0, 100, 0, 0, 200, 0, 0]), 2, 1);
        assert_eq!(reds(&out), vec![50, 100]);
    }

    #[test]
    fn test_enlarging_snaps_to_edges() {
        // 2 -> 4 samples at x = -0.25, 0.25, 0.75, 1.25.
        let out = resize_rgb(&gray_row(&[0, 100]), 4, 1);
        assert_eq!(reds(&out), vec![0, 25, 75, 100]);
    }
}

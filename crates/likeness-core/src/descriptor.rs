//! Handcrafted face descriptors: uniform LBP texture histogram and HOG.
//!
//! Both work on `f64` copies of the grayscale pixels and are fully
//! deterministic. Conventions:
//!
//! - LBP samples 8 points on a radius-1 circle. Sample offsets are rounded
//!   to 5 decimals, read with bilinear interpolation, and anything outside
//!   the image reads as 0.
//! - HOG uses central differences (zero on the outermost rows/columns),
//!   9 unsigned orientation bins with hard assignment, 8x8 cells and
//!   2x2-cell blocks normalized with L2-Hys.

use crate::types::{DescriptorPair, FaceCrop, FACE_SIZE};
use image::GrayImage;

pub const LBP_POINTS: usize = 8;
pub const LBP_RADIUS: f64 = 1.0;
/// Uniform codes 0..=P plus one bucket for every non-uniform pattern.
pub const TEXTURE_LEN: usize = LBP_POINTS + 2;

pub const HOG_ORIENTATIONS: usize = 9;
pub const HOG_CELL: usize = 8;
pub const HOG_BLOCK: usize = 2;
const HOG_EPS: f64 = 1e-5;
const L2HYS_CLIP: f64 = 0.2;

/// HOG length for a face crop: 15 x 15 blocks of 2 x 2 cells x 9 bins.
pub const GRADIENT_LEN: usize = gradient_len(FACE_SIZE as usize, FACE_SIZE as usize);

/// Length of the pairwise difference vector fed to the scaler.
pub const FEATURE_LEN: usize = TEXTURE_LEN + GRADIENT_LEN;

/// Number of HOG values produced for a `width` x `height` image.
pub const fn gradient_len(width: usize, height: usize) -> usize {
    let cells_x = width / HOG_CELL;
    let cells_y = height / HOG_CELL;
    if cells_x < HOG_BLOCK || cells_y < HOG_BLOCK {
        return 0;
    }
    let blocks_x = cells_x - HOG_BLOCK + 1;
    let blocks_y = cells_y - HOG_BLOCK + 1;
    blocks_x * blocks_y * HOG_BLOCK * HOG_BLOCK * HOG_ORIENTATIONS
}

/// Compute both descriptors of a face crop.
pub fn extract(face: &FaceCrop) -> DescriptorPair {
    let gray = face.as_gray();
    DescriptorPair {
        texture: texture_histogram(gray),
        gradient: gradient_descriptor(gray),
    }
}

/// Row-major `f64` view of a grayscale image.
struct Plane {
    data: Vec<f64>,
    width: usize,
    height: usize,
}

impl Plane {
    fn from_gray(gray: &GrayImage) -> Self {
        Self {
            data: gray.as_raw().iter().map(|&p| p as f64).collect(),
            width: gray.width() as usize,
            height: gray.height() as usize,
        }
    }

    #[inline]
    fn at(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.width + col]
    }

    /// Pixel value, or 0 outside the image.
    #[inline]
    fn at_or_zero(&self, row: i64, col: i64) -> f64 {
        if row < 0 || col < 0 || row >= self.height as i64 || col >= self.width as i64 {
            0.0
        } else {
            self.at(row as usize, col as usize)
        }
    }

    fn bilinear(&self, r: f64, c: f64) -> f64 {
        let minr = r.floor();
        let minc = c.floor();
        let maxr = r.ceil();
        let maxc = c.ceil();
        let dr = r - minr;
        let dc = c - minc;

        let top = (1.0 - dc) * self.at_or_zero(minr as i64, minc as i64)
            + dc * self.at_or_zero(minr as i64, maxc as i64);
        let bottom = (1.0 - dc) * self.at_or_zero(maxr as i64, minc as i64)
            + dc * self.at_or_zero(maxr as i64, maxc as i64);
        (1.0 - dr) * top + dr * bottom
    }
}

fn round5(v: f64) -> f64 {
    (v * 1e5).round() / 1e5
}

/// (row, col) offsets of the circular LBP neighborhood.
fn lbp_offsets() -> [(f64, f64); LBP_POINTS] {
    std::array::from_fn(|p| {
        let angle = 2.0 * std::f64::consts::PI * p as f64 / LBP_POINTS as f64;
        (round5(-LBP_RADIUS * angle.sin()), round5(LBP_RADIUS * angle.cos()))
    })
}

/// Uniform code of a sign pattern.
///
/// Transitions are counted between consecutive samples only; the pair
/// (last, first) is not compared.
fn uniform_code(bits: &[bool; LBP_POINTS]) -> usize {
    let changes = bits.windows(2).filter(|w| w[0] != w[1]).count();
    if changes <= 2 {
        bits.iter().filter(|&&b| b).count()
    } else {
        LBP_POINTS + 1
    }
}

/// Uniform LBP code of every pixel, row-major.
pub fn lbp_codes(gray: &GrayImage) -> Vec<u8> {
    let plane = Plane::from_gray(gray);
    let offsets = lbp_offsets();
    let mut codes = Vec::with_capacity(plane.data.len());

    for row in 0..plane.height {
        for col in 0..plane.width {
            let center = plane.at(row, col);
            let bits: [bool; LBP_POINTS] = std::array::from_fn(|p| {
                let (dr, dc) = offsets[p];
                plane.bilinear(row as f64 + dr, col as f64 + dc) - center >= 0.0
            });
            codes.push(uniform_code(&bits) as u8);
        }
    }

    codes
}

/// Density-normalized histogram of uniform LBP codes (10 bins, sums to 1).
pub fn texture_histogram(gray: &GrayImage) -> Vec<f64> {
    let codes = lbp_codes(gray);
    let mut counts = [0u64; TEXTURE_LEN];
    for &code in &codes {
        counts[code as usize] += 1;
    }

    let total = codes.len() as f64;
    if total == 0.0 {
        return vec![0.0; TEXTURE_LEN];
    }
    counts.iter().map(|&n| n as f64 / total).collect()
}

/// Orientation bin of an angle in degrees, `[20i, 20(i+1))`.
fn orientation_bin(orientation: f64) -> Option<usize> {
    let width = 180.0 / HOG_ORIENTATIONS as f64;
    (0..HOG_ORIENTATIONS).find(|&i| {
        let end = width * i as f64;
        let start = width * (i + 1) as f64;
        orientation >= end && orientation < start
    })
}

/// Per-cell orientation histograms, indexed `[cell_row][cell_col][bin]`, flattened.
fn cell_histograms(plane: &Plane, cells_y: usize, cells_x: usize) -> Vec<f64> {
    let (w, h) = (plane.width, plane.height);
    let mut magnitude = vec![0.0f64; w * h];
    let mut bins: Vec<Option<usize>> = vec![None; w * h];

    for row in 0..h {
        for col in 0..w {
            let g_row = if row == 0 || row + 1 == h {
                0.0
            } else {
                plane.at(row + 1, col) - plane.at(row - 1, col)
            };
            let g_col = if col == 0 || col + 1 == w {
                0.0
            } else {
                plane.at(row, col + 1) - plane.at(row, col - 1)
            };
            let idx = row * w + col;
            magnitude[idx] = g_col.hypot(g_row);
            bins[idx] = orientation_bin(g_row.atan2(g_col).to_degrees().rem_euclid(180.0));
        }
    }

    let mut hist = vec![0.0f64; cells_y * cells_x * HOG_ORIENTATIONS];
    for cy in 0..cells_y {
        for cx in 0..cells_x {
            // Sums run in single precision, one bin at a time.
            let mut totals = [0.0f32; HOG_ORIENTATIONS];
            for row in cy * HOG_CELL..(cy + 1) * HOG_CELL {
                for col in cx * HOG_CELL..(cx + 1) * HOG_CELL {
                    let idx = row * w + col;
                    if let Some(bin) = bins[idx] {
                        totals[bin] = (totals[bin] as f64 + magnitude[idx]) as f32;
                    }
                }
            }
            let area = (HOG_CELL * HOG_CELL) as f32;
            let base = (cy * cells_x + cx) * HOG_ORIENTATIONS;
            for (bin, total) in totals.iter().enumerate() {
                hist[base + bin] = (total / area) as f64;
            }
        }
    }

    hist
}

fn l2_hys(block: &mut [f64]) {
    let eps2 = HOG_EPS * HOG_EPS;
    let norm = (block.iter().map(|v| v * v).sum::<f64>() + eps2).sqrt();
    for v in block.iter_mut() {
        *v = (*v / norm).min(L2HYS_CLIP);
    }
    let norm = (block.iter().map(|v| v * v).sum::<f64>() + eps2).sqrt();
    for v in block.iter_mut() {
        *v /= norm;
    }
}

/// Block-normalized HOG feature vector.
///
/// Layout: block row, block column, cell row within block, cell column
/// within block, orientation.
pub fn gradient_descriptor(gray: &GrayImage) -> Vec<f64> {
    let plane = Plane::from_gray(gray);
    let cells_x = plane.width / HOG_CELL;
    let cells_y = plane.height / HOG_CELL;
    let len = gradient_len(plane.width, plane.height);
    if len == 0 {
        return Vec::new();
    }

    let hist = cell_histograms(&plane, cells_y, cells_x);
    let blocks_x = cells_x - HOG_BLOCK + 1;
    let blocks_y = cells_y - HOG_BLOCK + 1;
    let block_len = HOG_BLOCK * HOG_BLOCK * HOG_ORIENTATIONS;

    let mut features = Vec::with_capacity(len);
    let mut block = vec![0.0f64; block_len];
    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            for r in 0..HOG_BLOCK {
                for c in 0..HOG_BLOCK {
                    let src = ((by + r) * cells_x + (bx + c)) * HOG_ORIENTATIONS;
                    let dst = (r * HOG_BLOCK + c) * HOG_ORIENTATIONS;
                    block[dst..dst + HOG_ORIENTATIONS].copy_from_slice(&hist[src..src + HOG_ORIENTATIONS]);
                }
            }
            l2_hys(&mut block);
            features.extend_from_slice(&block);
        }
    }

    features
}

use image::GrayImage;

use crate::error::{Error, Result};

/// Dense displacement field between two frames.
///
/// Vector `(dx, dy)` at a pixel means the content found there in the current
/// frame came from `(x - dx, y - dy)` in the previous frame.
#[derive(Clone, Debug)]
pub struct MotionField {
    width: u32,
    height: u32,
    dx: Vec<f32>,
    dy: Vec<f32>,
}

impl MotionField {
    pub fn zeros(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            dx: vec![0.0; len],
            dy: vec![0.0; len],
        }
    }

    /// Field from row-major component planes.
    pub fn from_components(width: u32, height: u32, dx: Vec<f32>, dy: Vec<f32>) -> Result<Self> {
        let len = width as usize * height as usize;
        if dx.len() != len || dy.len() != len {
            return Err(Error::transient(format!(
                "motion field planes of {} and {} values do not match {}x{}",
                dx.len(),
                dy.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            dx,
            dy,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn vector(&self, x: u32, y: u32) -> (f32, f32) {
        let idx = self.index(x, y);
        (self.dx[idx], self.dy[idx])
    }

    /// Displacement length per pixel, row-major.
    pub fn magnitudes(&self) -> Vec<f32> {
        self.dx
            .iter()
            .zip(&self.dy)
            .map(|(dx, dy)| dx.hypot(*dy))
            .collect()
    }

    /// Direction in radians, `[0, 2π)`.
    pub fn angle(&self, x: u32, y: u32) -> f32 {
        let (dx, dy) = self.vector(x, y);
        let a = dy.atan2(dx);
        if a < 0.0 {
            a + std::f32::consts::TAU
        } else {
            a
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    fn fill_block(&mut self, block: &Block, dx: f32, dy: f32) {
        for y in block.y..block.y + block.h {
            let row = y as usize * self.width as usize;
            for x in block.x..block.x + block.w {
                self.dx[row + x as usize] = dx;
                self.dy[row + x as usize] = dy;
            }
        }
    }
}

/// Floor of the per-pixel matching tolerance, in intensity levels.
const MIN_TOLERANCE: f32 = 1.0;
/// Tolerance added per level of estimated frame noise.
const NOISE_TOLERANCE: f32 = 2.0;
/// A displaced match must cost at most this share of the zero-displacement cost.
const MAX_MATCH_RATIO: f32 = 0.65;

/// Block-matching displacement estimator.
///
/// Each `block_size` block of the current frame is compared against the
/// previous frame at every displacement within `search_radius` on both axes,
/// by sum of absolute differences. Every pixel of a block carries the block's
/// vector.
///
/// The camera is fixed, so most blocks are static and the median
/// zero-displacement cost per pixel measures the frame-to-frame noise. A block
/// whose zero-displacement cost stays within the tolerance derived from it is
/// static and is not searched. Otherwise a displacement is kept only when it
/// beats the zero-displacement cost by that tolerance; ties go to the shorter
/// displacement.
#[derive(Clone, Debug)]
pub struct BlockMatcher {
    block_size: u32,
    search_radius: u32,
    offsets: Vec<(i64, i64)>,
}

impl BlockMatcher {
    pub fn new(block_size: u32, search_radius: u32) -> Self {
        Self {
            block_size: block_size.max(1),
            search_radius,
            offsets: search_offsets(search_radius as i64),
        }
    }

    pub fn search_radius(&self) -> u32 {
        self.search_radius
    }

    /// Both images must have the same dimensions.
    pub fn estimate(&self, previous: &GrayImage, current: &GrayImage) -> MotionField {
        let (width, height) = current.dimensions();
        debug_assert_eq!(previous.dimensions(), current.dimensions());
        let mut field = MotionField::zeros(width, height);
        let stride = width as i64;
        let prev = previous.as_raw();
        let cur = current.as_raw();

        let blocks = tile(width as i64, height as i64, self.block_size as i64);
        let zero_costs: Vec<u64> = blocks
            .iter()
            .map(|block| block_sad(prev, cur, stride, block, 0, 0, u64::MAX))
            .collect();
        let noise = noise_level(&blocks, &zero_costs);
        let tolerance = MIN_TOLERANCE + NOISE_TOLERANCE * noise;

        for (block, &zero_cost) in blocks.iter().zip(&zero_costs) {
            let area = block.area() as f32;
            let zero_per_px = zero_cost as f32 / area;
            if zero_per_px <= tolerance {
                continue;
            }
            // A match at the noise level cannot be meaningfully improved on.
            let good_enough = (noise * area) as u64;

            let mut best = (0i64, 0i64);
            let mut best_cost = zero_cost;
            for &(ox, oy) in self.offsets.iter().skip(1) {
                let sx = block.x - ox;
                let sy = block.y - oy;
                if sx < 0 || sy < 0 || sx + block.w > stride || sy + block.h > height as i64 {
                    continue;
                }
                let cost = block_sad(prev, cur, stride, block, ox, oy, best_cost);
                if cost < best_cost {
                    best = (ox, oy);
                    best_cost = cost;
                    if cost <= good_enough {
                        break;
                    }
                }
            }

            let best_per_px = best_cost as f32 / area;
            let accept_below = (zero_per_px - tolerance).min(zero_per_px * MAX_MATCH_RATIO);
            if best != (0, 0) && best_per_px <= accept_below {
                field.fill_block(block, best.0 as f32, best.1 as f32);
            }
        }
        field
    }
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|v| *v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|v| {
            let d = *v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean as f32, var.sqrt() as f32)
}

struct Block {
    x: i64,
    y: i64,
    w: i64,
    h: i64,
}

impl Block {
    fn area(&self) -> i64 {
        self.w * self.h
    }
}

fn tile(width: i64, height: i64, size: i64) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut y = 0;
    while y < height {
        let h = size.min(height - y);
        let mut x = 0;
        while x < width {
            let w = size.min(width - x);
            blocks.push(Block { x, y, w, h });
            x += size;
        }
        y += size;
    }
    blocks
}

/// Median zero-displacement cost per pixel.
fn noise_level(blocks: &[Block], zero_costs: &[u64]) -> f32 {
    let mut per_px: Vec<f32> = blocks
        .iter()
        .zip(zero_costs)
        .map(|(block, cost)| *cost as f32 / block.area() as f32)
        .collect();
    if per_px.is_empty() {
        return 0.0;
    }
    per_px.sort_by(f32::total_cmp);
    per_px[per_px.len() / 2]
}

/// Offsets within the search window, shortest first.
fn search_offsets(radius: i64) -> Vec<(i64, i64)> {
    let mut offsets = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
    for oy in -radius..=radius {
        for ox in -radius..=radius {
            offsets.push((ox, oy));
        }
    }
    offsets.sort_by_key(|&(ox, oy)| (ox * ox + oy * oy, oy, ox));
    offsets
}

/// SAD between the block in `cur` and the block displaced by `-(ox, oy)` in `prev`.
/// Stops early once `limit` is reached.
fn block_sad(prev: &[u8], cur: &[u8], stride: i64, block: &Block, ox: i64, oy: i64, limit: u64) -> u64 {
    let mut cost = 0u64;
    for y in block.y..block.y + block.h {
        let cur_row = (y * stride) as usize;
        let prev_row = ((y - oy) * stride) as usize;
        for x in block.x..block.x + block.w {
            let a = cur[cur_row + x as usize];
            let b = prev[prev_row + (x - ox) as usize];
            cost += a.abs_diff(b) as u64;
        }
        if cost >= limit {
            return cost;
        }
    }
    cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn texture(x: i64, y: i64) -> u8 {
        (40 + ((x * 37 + y * 91 + (x * y) % 13) & 0x7f)) as u8
    }

    /// Flat background with a 24x24 textured patch whose origin is `(px, py)`.
    fn patch_scene(px: i64, py: i64) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            let (lx, ly) = (x as i64 - px, y as i64 - py);
            if (0..24).contains(&lx) && (0..24).contains(&ly) {
                Luma([texture(lx, ly)])
            } else {
                Luma([30])
            }
        })
    }

    fn with_noise(image: &GrayImage, amplitude: i16, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut noisy = image.clone();
        for p in noisy.pixels_mut() {
            let jitter = rng.gen_range(-amplitude..=amplitude);
            p.0[0] = (p.0[0] as i16 + jitter).clamp(0, 255) as u8;
        }
        noisy
    }

    #[test]
    fn identical_frames_have_zero_field() {
        let frame = patch_scene(20, 20);
        let field = BlockMatcher::new(8, 3).estimate(&frame, &frame);
        assert!(field.magnitudes().iter().all(|m| *m == 0.0));
        assert_eq!(mean_std(&field.magnitudes()), (0.0, 0.0));
    }

    #[test]
    fn patch_translation_is_recovered() {
        let prev = patch_scene(12, 12);
        let cur = patch_scene(14, 11);
        let field = BlockMatcher::new(8, 3).estimate(&prev, &cur);
        // Block (16..24, 16..24) lies inside the patch in both frames.
        assert_eq!(field.vector(20, 20), (2.0, -1.0));
        assert!((field.magnitudes()[20 * 64 + 20] - 5f32.sqrt()).abs() < 1e-6);
        // Background far from the patch stays still.
        assert_eq!(field.vector(60, 60), (0.0, 0.0));
    }

    #[test]
    fn angle_is_normalized() {
        let prev = patch_scene(16, 16);
        let cur = patch_scene(16, 14);
        let field = BlockMatcher::new(8, 3).estimate(&prev, &cur);
        let angle = field.angle(24, 24);
        assert!((angle - 3.0 * std::f32::consts::FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn sensor_noise_alone_is_not_motion() {
        let scene = patch_scene(20, 20);
        for amplitude in [2, 4, 8, 16] {
            let prev = with_noise(&scene, amplitude, 1);
            let cur = with_noise(&scene, amplitude, 2);
            let field = BlockMatcher::new(8, 6).estimate(&prev, &cur);
            assert!(
                field.magnitudes().iter().all(|m| *m == 0.0),
                "noise amplitude {} produced vectors",
                amplitude
            );
        }
    }

    #[test]
    fn translation_is_recovered_under_noise() {
        let prev = with_noise(&patch_scene(12, 12), 6, 3);
        let cur = with_noise(&patch_scene(12, 15), 6, 4);
        let field = BlockMatcher::new(8, 4).estimate(&prev, &cur);
        assert_eq!(field.vector(20, 20), (0.0, 3.0));
        assert_eq!(field.vector(60, 60), (0.0, 0.0));
    }

    #[test]
    fn appearing_flat_region_has_no_direction() {
        let prev = GrayImage::from_pixel(32, 32, Luma([30]));
        let mut cur = prev.clone();
        for y in 8..24 {
            for x in 8..24 {
                cur.put_pixel(x, y, Luma([100]));
            }
        }
        let field = BlockMatcher::new(8, 3).estimate(&prev, &cur);
        assert_eq!(field.vector(12, 12), (0.0, 0.0));
    }

    #[test]
    fn component_planes_must_match_size() {
        assert!(MotionField::from_components(2, 2, vec![0.0; 4], vec![0.0; 4]).is_ok());
        assert!(MotionField::from_components(2, 2, vec![0.0; 3], vec![0.0; 4]).is_err());
    }

    #[test]
    fn offsets_start_at_zero() {
        let offsets = search_offsets(2);
        assert_eq!(offsets[0], (0, 0));
        assert_eq!(offsets.len(), 25);
    }
}

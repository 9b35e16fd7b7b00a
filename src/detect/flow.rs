//! Shared dense optical flow for the shake and reposition detectors.
//!
//! A coarse-to-fine (pyramidal) Lucas-Kanade estimator: grayscale frames are
//! downsampled into a pyramid, flow is estimated at the coarsest level and
//! iteratively refined while climbing back to full resolution, warping the
//! current frame by the running estimate at each level before solving the
//! local least-squares system. This mirrors the coarse-to-fine structure
//! spec §4.5 calls for without binding to a specific vendored
//! implementation.

use crate::frame::GrayFrame;

#[derive(Clone, Copy, Debug, Default)]
pub struct FlowParams {
    pub levels: u32,
    pub window: usize,
}

impl FlowParams {
    pub fn spec_default() -> Self {
        // pyr_scale=0.5, levels=3, winsize=15, iterations folded into the
        // per-level LK solve, poly_n/poly_sigma are Farneback-specific and
        // have no counterpart in this estimator.
        Self { levels: 3, window: 15 }
    }
}

/// Per-pixel velocity field, one `(u, v)` per pixel of the finest level.
pub struct FlowField {
    pub width: u32,
    pub height: u32,
    pub u: Vec<f32>,
    pub v: Vec<f32>,
}

impl FlowField {
    pub fn at(&self, x: u32, y: u32) -> (f32, f32) {
        let i = (y * self.width + x) as usize;
        (self.u[i], self.v[i])
    }

    pub fn mean_magnitude(&self) -> f32 {
        if self.u.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .u
            .iter()
            .zip(self.v.iter())
            .map(|(&u, &v)| (u * u + v * v).sqrt())
            .sum();
        sum / self.u.len() as f32
    }
}

struct Level {
    width: u32,
    height: u32,
    pixels: Vec<f32>,
}

fn to_f32(gray: &GrayFrame) -> Level {
    Level {
        width: gray.width,
        height: gray.height,
        pixels: gray.pixels.iter().map(|&p| p as f32).collect(),
    }
}

/// 2x2 box-filter downsample (matches `pyr_scale=0.5`).
fn downsample(level: &Level) -> Level {
    let w = (level.width / 2).max(1);
    let h = (level.height / 2).max(1);
    let mut pixels = vec![0.0f32; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let x0 = (x * 2).min(level.width - 1);
            let y0 = (y * 2).min(level.height - 1);
            let x1 = (x * 2 + 1).min(level.width - 1);
            let y1 = (y * 2 + 1).min(level.height - 1);
            let sum = sample(level, x0, y0) + sample(level, x1, y0) + sample(level, x0, y1) + sample(level, x1, y1);
            pixels[(y * w + x) as usize] = sum / 4.0;
        }
    }
    Level { width: w, height: h, pixels }
}

fn sample(level: &Level, x: u32, y: u32) -> f32 {
    level.pixels[(y * level.width + x) as usize]
}

fn bilinear(level: &Level, x: f32, y: f32) -> f32 {
    let w = level.width as i64;
    let h = level.height as i64;
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let v00 = sample(level, x0 as u32, y0 as u32);
    let v10 = sample(level, x1 as u32, y0 as u32);
    let v01 = sample(level, x0 as u32, y1 as u32);
    let v11 = sample(level, x1 as u32, y1 as u32);
    let top = v00 * (1.0 - fx) + v10 * fx;
    let bottom = v01 * (1.0 - fx) + v11 * fx;
    top * (1.0 - fy) + bottom * fy
}

fn sobel_gradients(level: &Level) -> (Vec<f32>, Vec<f32>) {
    let w = level.width as i64;
    let h = level.height as i64;
    let mut gx = vec![0.0f32; level.pixels.len()];
    let mut gy = vec![0.0f32; level.pixels.len()];
    let at = |x: i64, y: i64| -> f32 {
        let cx = x.clamp(0, w - 1) as u32;
        let cy = y.clamp(0, h - 1) as u32;
        sample(level, cx, cy)
    };
    for y in 0..h {
        for x in 0..w {
            let gx_v = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy_v = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            gx[(y * w + x) as usize] = gx_v / 8.0;
            gy[(y * w + x) as usize] = gy_v / 8.0;
        }
    }
    (gx, gy)
}

/// One Lucas-Kanade refinement pass: warp `current` by the running
/// `(u, v)` estimate, then solve the windowed 2x2 normal-equations system
/// per pixel and accumulate the correction.
fn lk_refine(prev: &Level, current: &Level, u: &mut [f32], v: &mut [f32], window: usize) {
    let w = prev.width as i64;
    let h = prev.height as i64;
    let (ix, iy) = sobel_gradients(prev);
    let half = (window / 2) as i64;

    let mut it = vec![0.0f32; prev.pixels.len()];
    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            let warped = bilinear(current, x as f32 + u[idx], y as f32 + v[idx]);
            it[idx] = warped - sample(prev, x as u32, y as u32);
        }
    }

    let mut new_u = vec![0.0f32; u.len()];
    let mut new_v = vec![0.0f32; v.len()];
    for y in 0..h {
        for x in 0..w {
            let mut sxx = 0.0f32;
            let mut sxy = 0.0f32;
            let mut syy = 0.0f32;
            let mut sxt = 0.0f32;
            let mut syt = 0.0f32;
            for dy in -half..=half {
                let yy = (y + dy).clamp(0, h - 1);
                for dx in -half..=half {
                    let xx = (x + dx).clamp(0, w - 1);
                    let idx = (yy * w + xx) as usize;
                    let gx = ix[idx];
                    let gy = iy[idx];
                    let gt = it[idx];
                    sxx += gx * gx;
                    sxy += gx * gy;
                    syy += gy * gy;
                    sxt += gx * gt;
                    syt += gy * gt;
                }
            }
            let det = sxx * syy - sxy * sxy;
            let idx = (y * w + x) as usize;
            let (du, dv) = if det.abs() > 1e-3 {
                let du = (-syy * sxt + sxy * syt) / det;
                let dv = (sxy * sxt - sxx * syt) / det;
                (du, dv)
            } else {
                (0.0, 0.0)
            };
            new_u[idx] = u[idx] + du;
            new_v[idx] = v[idx] + dv;
        }
    }
    u.copy_from_slice(&new_u);
    v.copy_from_slice(&new_v);
}

/// Computes the dense flow field from `prev` to `current`. Both frames must
/// share dimensions; callers (the pipeline) are responsible for skipping
/// this call on the first frame, when there is no previous frame.
pub fn dense_optical_flow(prev: &GrayFrame, current: &GrayFrame, params: FlowParams) -> anyhow::Result<FlowField> {
    if prev.width != current.width || prev.height != current.height {
        return Err(anyhow::anyhow!("optical flow requires matching frame dimensions"));
    }
    if prev.width == 0 || prev.height == 0 {
        return Err(anyhow::anyhow!("optical flow requires non-zero dimensions"));
    }

    let mut prev_pyramid = vec![to_f32(prev)];
    let mut cur_pyramid = vec![to_f32(current)];
    for _ in 1..params.levels {
        let last_prev = prev_pyramid.last().unwrap();
        let last_cur = cur_pyramid.last().unwrap();
        if last_prev.width <= 2 || last_prev.height <= 2 {
            break;
        }
        prev_pyramid.push(downsample(last_prev));
        cur_pyramid.push(downsample(last_cur));
    }

    let coarsest = prev_pyramid.len() - 1;
    let mut u = vec![0.0f32; (prev_pyramid[coarsest].width * prev_pyramid[coarsest].height) as usize];
    let mut v = vec![0.0f32; u.len()];

    for level in (0..=coarsest).rev() {
        lk_refine(&prev_pyramid[level], &cur_pyramid[level], &mut u, &mut v, params.window.min(prev_pyramid[level].width as usize).max(3));
        lk_refine(&prev_pyramid[level], &cur_pyramid[level], &mut u, &mut v, params.window.min(prev_pyramid[level].width as usize).max(3));

        if level > 0 {
            let target = &prev_pyramid[level - 1];
            let (nu, nv) = upsample_flow(&u, &v, prev_pyramid[level].width, prev_pyramid[level].height, target.width, target.height);
            u = nu;
            v = nv;
        }
    }

    Ok(FlowField { width: prev.width, height: prev.height, u, v })
}

fn upsample_flow(u: &[f32], v: &[f32], sw: u32, sh: u32, dw: u32, dh: u32) -> (Vec<f32>, Vec<f32>) {
    let mut nu = vec![0.0f32; (dw * dh) as usize];
    let mut nv = vec![0.0f32; (dw * dh) as usize];
    for y in 0..dh {
        for x in 0..dw {
            let sx = ((x as f32 + 0.5) * sw as f32 / dw as f32 - 0.5).clamp(0.0, (sw - 1) as f32);
            let sy = ((y as f32 + 0.5) * sh as f32 / dh as f32 - 0.5).clamp(0.0, (sh - 1) as f32);
            let x0 = sx.floor() as u32;
            let y0 = sy.floor() as u32;
            let idx = (y0 * sw + x0) as usize;
            // Flow magnitudes scale with resolution (2x finer = 2x displacement).
            nu[(y * dw + x) as usize] = u[idx] * 2.0;
            nv[(y * dw + x) as usize] = v[idx] * 2.0;
        }
    }
    (nu, nv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shifted_gradient_frame(w: u32, h: u32, shift_x: i32) -> GrayFrame {
        let mut pixels = vec![0u8; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                let sx = x as i32 - shift_x;
                let v = if sx >= 0 { ((sx * 4) % 256) as u8 } else { 0 };
                pixels[(y * w + x) as usize] = v;
            }
        }
        GrayFrame { width: w, height: h, pixels }
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let a = GrayFrame { width: 4, height: 4, pixels: vec![0; 16] };
        let b = GrayFrame { width: 5, height: 4, pixels: vec![0; 20] };
        assert!(dense_optical_flow(&a, &b, FlowParams::spec_default()).is_err());
    }

    #[test]
    fn detects_uniform_rightward_shift() {
        let prev = shifted_gradient_frame(32, 32, 0);
        let current = shifted_gradient_frame(32, 32, 3);
        let flow = dense_optical_flow(&prev, &current, FlowParams { levels: 2, window: 9 }).unwrap();
        // Interior pixels (away from the clamped wrap border) should show
        // positive horizontal flow of roughly the injected shift.
        let mut interior_u = Vec::new();
        for y in 8..24 {
            for x in 8..24 {
                interior_u.push(flow.at(x, y).0);
            }
        }
        let mean_u: f32 = interior_u.iter().sum::<f32>() / interior_u.len() as f32;
        assert!(mean_u > 0.5, "expected positive horizontal flow, got {}", mean_u);
    }

    #[test]
    fn zero_motion_yields_near_zero_flow() {
        let frame = shifted_gradient_frame(16, 16, 0);
        let flow = dense_optical_flow(&frame, &frame, FlowParams::spec_default()).unwrap();
        assert!(flow.mean_magnitude() < 0.5);
    }
}

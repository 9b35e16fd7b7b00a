//! Blur detector: Laplacian variance over the grayscale frame, plus the
//! optional unsharp-mask correction applied to the outgoing color frame.

use imageproc::filter::gaussian_blur_f32;

use crate::config::Thresholds;
use crate::frame::GrayFrame;

use super::{AuxValue, DetectionSignal, DetectorKind};

const LAPLACIAN_KERNEL: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];

/// No temporal state of its own — the aggregator owns the sustain window.
pub struct BlurDetector;

impl BlurDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn step(&mut self, gray: &GrayFrame, thresholds: &Thresholds) -> DetectionSignal {
        let variance = laplacian_variance(gray);
        let tripped = variance < thresholds.blur_threshold;
        let mut aux = super::Auxiliary::new();
        aux.insert("variance", AuxValue::Float(variance));
        DetectionSignal {
            detector: DetectorKind::Blur,
            raw_metric: variance,
            tripped,
            auxiliary: aux,
        }
    }
}

impl Default for BlurDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// `var = mean((L - mean(L))^2)` where `L` is the response of the discrete
/// 3x3 Laplacian kernel, computed with replicated borders so edge pixels are
/// not silently zero.
pub fn laplacian_variance(gray: &GrayFrame) -> f32 {
    let w = gray.width as i64;
    let h = gray.height as i64;
    if w == 0 || h == 0 {
        return 0.0;
    }

    let at = |x: i64, y: i64| -> f32 {
        let cx = x.clamp(0, w - 1) as u32;
        let cy = y.clamp(0, h - 1) as u32;
        gray.get(cx, cy) as f32
    };

    let mut responses = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            let mut k = 0usize;
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    acc += LAPLACIAN_KERNEL[k] * at(x + dx, y + dy);
                    k += 1;
                }
            }
            responses.push(acc);
        }
    }

    let mean = responses.iter().sum::<f32>() / responses.len() as f32;
    responses.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / responses.len() as f32
}

/// `out = src + strength * (src - Gaussian(src, 5x5, sigma=1.0))`, clipped to
/// `[0, 255]`, applied per channel on the color buffer.
pub fn unsharp_mask_color(color: &[u8], width: u32, height: u32, strength: f32) -> Vec<u8> {
    let mut planes = [
        Vec::with_capacity((width * height) as usize),
        Vec::with_capacity((width * height) as usize),
        Vec::with_capacity((width * height) as usize),
    ];
    for chunk in color.chunks_exact(3) {
        planes[0].push(chunk[0]);
        planes[1].push(chunk[1]);
        planes[2].push(chunk[2]);
    }

    let mut sharpened = vec![0u8; color.len()];
    for (c, plane) in planes.iter().enumerate() {
        let img = image::GrayImage::from_raw(width, height, plane.clone())
            .expect("plane dimensions match by construction");
        let blurred = gaussian_blur_f32(&img, 1.0);
        for i in 0..plane.len() {
            let src = plane[i] as f32;
            let low = blurred.as_raw()[i] as f32;
            let out = src + strength * (src - low);
            sharpened[i * 3 + c] = out.round().clamp(0.0, 255.0) as u8;
        }
    }
    sharpened
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelOrder;

    fn gray_checkerboard(w: u32, h: u32) -> GrayFrame {
        let mut pixels = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                pixels.push(if (x + y) % 2 == 0 { 0 } else { 255 });
            }
        }
        GrayFrame { width: w, height: h, pixels }
    }

    fn gray_flat(w: u32, h: u32, value: u8) -> GrayFrame {
        GrayFrame {
            width: w,
            height: h,
            pixels: vec![value; (w * h) as usize],
        }
    }

    #[test]
    fn flat_frame_has_zero_variance_and_trips() {
        let gray = gray_flat(16, 16, 128);
        let variance = laplacian_variance(&gray);
        assert_eq!(variance, 0.0);
        let mut det = BlurDetector::new();
        let signal = det.step(&gray, &Thresholds::default());
        assert!(signal.tripped);
    }

    #[test]
    fn checkerboard_has_high_variance_and_does_not_trip() {
        let gray = gray_checkerboard(16, 16);
        let variance = laplacian_variance(&gray);
        assert!(variance > 70.0);
        let mut det = BlurDetector::new();
        let signal = det.step(&gray, &Thresholds::default());
        assert!(!signal.tripped);
    }

    #[test]
    fn boundary_variance_exactly_threshold_is_not_blurry() {
        // Strict `<` per spec §8 boundary test.
        let thresholds = Thresholds {
            blur_threshold: 0.0,
            ..Thresholds::default()
        };
        let gray = gray_flat(8, 8, 50);
        let mut det = BlurDetector::new();
        let signal = det.step(&gray, &thresholds);
        assert!(!signal.tripped);
    }

    #[test]
    fn unsharp_mask_preserves_dimensions_and_clips() {
        let color = vec![10u8; 4 * 4 * 3];
        let out = unsharp_mask_color(&color, 4, 4, 1.5);
        assert_eq!(out.len(), color.len());
        assert!(out.iter().all(|&p| (0..=255).contains(&p)));
        let _ = ChannelOrder::Rgb;
    }
}

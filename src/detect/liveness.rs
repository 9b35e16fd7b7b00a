//! Liveness, blackout, and major-tamper detector: a frozen reference frame
//! refreshed every `liveness_check_interval` seconds, compared against each
//! incoming grayscale frame.

use crate::config::Thresholds;
use crate::frame::{FramePool, GrayFrame};

use super::{AuxValue, DetectionSignal, DetectorKind};

pub struct LivenessDetector {
    reference: Option<GrayFrame>,
    reference_set_at: f64,
    startup_ts: Option<f64>,
}

pub struct LivenessSignals {
    pub frozen: DetectionSignal,
    pub blackout: DetectionSignal,
    pub major_tamper: DetectionSignal,
}

impl LivenessDetector {
    pub fn new() -> Self {
        Self {
            reference: None,
            reference_set_at: 0.0,
            startup_ts: None,
        }
    }

    pub fn reset(&mut self) {
        self.reference = None;
        self.startup_ts = None;
    }

    /// `blur_tripped`/`reposition_tripped` feed the major-tamper heuristic
    /// (spec §4.4: reported only when neither blur nor reposition explain
    /// the change).
    pub fn step(
        &mut self,
        gray: &GrayFrame,
        timestamp: f64,
        blur_tripped: bool,
        reposition_tripped: bool,
        thresholds: &Thresholds,
        pool: &mut FramePool,
    ) -> LivenessSignals {
        let startup = *self.startup_ts.get_or_insert(timestamp);
        let within_activation = timestamp - startup < thresholds.liveness_activation_time;

        if self.reference.is_none() || timestamp - self.reference_set_at >= thresholds.liveness_check_interval {
            self.refresh_reference(gray, timestamp, pool);
        }

        let reference = self
            .reference
            .as_ref()
            .expect("reference set immediately above when absent");

        let diff = mean_abs_diff(reference, gray);
        let brightness = gray.mean();

        if within_activation {
            return LivenessSignals {
                frozen: DetectionSignal::untripped(DetectorKind::Liveness),
                blackout: DetectionSignal::untripped(DetectorKind::Blackout),
                major_tamper: DetectionSignal::untripped(DetectorKind::MajorTamper),
            };
        }

        let frozen_tripped = diff < thresholds.liveness_threshold;
        let mut frozen_aux = super::Auxiliary::new();
        frozen_aux.insert("diff", AuxValue::Float(diff));
        let frozen = DetectionSignal {
            detector: DetectorKind::Liveness,
            raw_metric: diff,
            tripped: frozen_tripped,
            auxiliary: frozen_aux,
        };

        let blackout_tripped = brightness < thresholds.blackout_brightness_threshold;
        let mut blackout_aux = super::Auxiliary::new();
        blackout_aux.insert("brightness", AuxValue::Float(brightness));
        let blackout = DetectionSignal {
            detector: DetectorKind::Blackout,
            raw_metric: brightness,
            tripped: blackout_tripped,
            auxiliary: blackout_aux,
        };

        let major_tamper_tripped =
            diff > thresholds.major_tamper_diff_threshold && !blur_tripped && !reposition_tripped;
        let mut tamper_aux = super::Auxiliary::new();
        tamper_aux.insert("diff", AuxValue::Float(diff));
        let major_tamper = DetectionSignal {
            detector: DetectorKind::MajorTamper,
            raw_metric: diff,
            tripped: major_tamper_tripped,
            auxiliary: tamper_aux,
        };

        LivenessSignals { frozen, blackout, major_tamper }
    }

    fn refresh_reference(&mut self, gray: &GrayFrame, timestamp: f64, pool: &mut FramePool) {
        let mut buf = pool.take(gray.pixels.len());
        buf.copy_from_slice(&gray.pixels);
        self.reference = Some(GrayFrame {
            width: gray.width,
            height: gray.height,
            pixels: buf,
        });
        self.reference_set_at = timestamp;
    }
}

impl Default for LivenessDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn mean_abs_diff(a: &GrayFrame, b: &GrayFrame) -> f32 {
    if a.pixels.len() != b.pixels.len() || a.pixels.is_empty() {
        return 0.0;
    }
    let sum: i64 = a
        .pixels
        .iter()
        .zip(b.pixels.iter())
        .map(|(&x, &y)| (x as i64 - y as i64).abs())
        .sum();
    sum as f32 / a.pixels.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(w: u32, h: u32, v: u8) -> GrayFrame {
        GrayFrame { width: w, height: h, pixels: vec![v; (w * h) as usize] }
    }

    #[test]
    fn activation_window_suppresses_all_signals() {
        let mut det = LivenessDetector::new();
        let mut pool = FramePool::new();
        let thresholds = Thresholds::default();
        let gray = flat(8, 8, 5); // very dark, would otherwise trip blackout
        let signals = det.step(&gray, 0.0, false, false, &thresholds, &mut pool);
        assert!(!signals.frozen.tripped);
        assert!(!signals.blackout.tripped);
        assert!(!signals.major_tamper.tripped);
    }

    #[test]
    fn frozen_trips_after_activation_when_unchanged() {
        let mut det = LivenessDetector::new();
        let mut pool = FramePool::new();
        let thresholds = Thresholds::default();
        let gray = flat(8, 8, 128);
        det.step(&gray, 0.0, false, false, &thresholds, &mut pool);
        let signals = det.step(&gray, 11.0, false, false, &thresholds, &mut pool);
        assert!(signals.frozen.tripped);
    }

    #[test]
    fn blackout_trips_on_dark_frame_after_activation() {
        let mut det = LivenessDetector::new();
        let mut pool = FramePool::new();
        let thresholds = Thresholds::default();
        det.step(&flat(8, 8, 128), 0.0, false, false, &thresholds, &mut pool);
        let signals = det.step(&flat(8, 8, 5), 11.0, false, false, &thresholds, &mut pool);
        assert!(signals.blackout.tripped);
    }

    #[test]
    fn major_tamper_suppressed_when_reposition_explains_change() {
        let mut det = LivenessDetector::new();
        let mut pool = FramePool::new();
        let thresholds = Thresholds::default();
        det.step(&flat(8, 8, 0), 0.0, false, false, &thresholds, &mut pool);
        let signals = det.step(&flat(8, 8, 255), 11.0, false, true, &thresholds, &mut pool);
        assert!(!signals.major_tamper.tripped);
    }

    #[test]
    fn major_tamper_trips_on_unexplained_large_change() {
        let mut det = LivenessDetector::new();
        let mut pool = FramePool::new();
        let thresholds = Thresholds::default();
        det.step(&flat(8, 8, 0), 0.0, false, false, &thresholds, &mut pool);
        let signals = det.step(&flat(8, 8, 255), 11.0, false, false, &thresholds, &mut pool);
        assert!(signals.major_tamper.tripped);
    }
}

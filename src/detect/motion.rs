//! Shake and reposition detectors: both consume the same dense optical
//! flow field computed once per frame (spec §4.5).

use std::collections::VecDeque;

use crate::config::Thresholds;

use super::{flow::FlowField, AuxValue, DetectionSignal, DetectorKind};

pub struct ShakeDetector;

impl ShakeDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn step(&mut self, flow: &FlowField, thresholds: &Thresholds) -> DetectionSignal {
        let mean_mag = flow.mean_magnitude();
        let tripped = mean_mag > thresholds.shake_threshold;
        let mut aux = super::Auxiliary::new();
        aux.insert("mean_magnitude", AuxValue::Float(mean_mag));
        DetectionSignal {
            detector: DetectorKind::Shake,
            raw_metric: mean_mag,
            tripped,
            auxiliary: aux,
        }
    }
}

impl Default for ShakeDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepositionSubtype {
    Fast,
    Slow,
}

#[derive(Clone, Copy, Debug)]
pub struct RepositionEntry {
    pub magnitude: f32,
    pub direction: (f32, f32),
}

const RING_CAPACITY: usize = 10;
const SLOW_PATH_MIN_HISTORY: usize = 5;
const SLOW_PATH_WINDOW: usize = 5;
const SLOW_PATH_MIN_TRIPPED: usize = 4;
const DIRECTION_MIN_MAGNITUDE: f32 = 5.0;
const MAGNITUDE_EPSILON: f32 = 1e-6;

pub struct RepositionDetector {
    ring: VecDeque<RepositionEntry>,
    last_above_threshold_at: Option<f64>,
}

impl RepositionDetector {
    pub fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(RING_CAPACITY),
            last_above_threshold_at: None,
        }
    }

    /// Clears the ring buffer and returns the detector to idle. Called on
    /// `dismiss_reposition_alert` and the 10s no-magnitude idle reset.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.last_above_threshold_at = None;
    }

    pub fn history(&self) -> &VecDeque<RepositionEntry> {
        &self.ring
    }

    pub fn step(
        &mut self,
        flow: &FlowField,
        timestamp: f64,
        thresholds: &Thresholds,
    ) -> (DetectionSignal, Option<RepositionSubtype>) {
        if timestamp - self.last_above_threshold_at.unwrap_or(timestamp) > thresholds.reposition_idle_reset_secs {
            self.reset();
        }

        let (shift_x, shift_y) = center_region_mean(flow);
        let shift_magnitude = (shift_x * shift_x + shift_y * shift_y).sqrt();
        let unit_direction = if shift_magnitude > MAGNITUDE_EPSILON {
            (shift_x / shift_magnitude, shift_y / shift_magnitude)
        } else {
            (0.0, 0.0)
        };

        if self.ring.len() == RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(RepositionEntry { magnitude: shift_magnitude, direction: unit_direction });

        if shift_magnitude > thresholds.reposition_threshold {
            self.last_above_threshold_at = Some(timestamp);
        }

        let mut aux = super::Auxiliary::new();
        aux.insert("shift_magnitude", AuxValue::Float(shift_magnitude));
        aux.insert("shift_x", AuxValue::Float(shift_x));
        aux.insert("shift_y", AuxValue::Float(shift_y));
        aux.insert("direction", AuxValue::Text(cardinal_direction(shift_x, shift_y)));

        // Fast path: immediate trip on a single large shift.
        if shift_magnitude > thresholds.fast_reposition_threshold {
            return (
                DetectionSignal {
                    detector: DetectorKind::Reposition,
                    raw_metric: shift_magnitude,
                    tripped: true,
                    auxiliary: aux,
                },
                Some(RepositionSubtype::Fast),
            );
        }

        // Slow path: sustained directional evidence over the last 5 entries.
        if self.ring.len() >= SLOW_PATH_MIN_HISTORY {
            let recent: Vec<&RepositionEntry> = self
                .ring
                .iter()
                .rev()
                .take(SLOW_PATH_WINDOW)
                .collect();
            let above_count = recent.iter().filter(|e| e.magnitude > thresholds.reposition_threshold).count();
            if above_count >= SLOW_PATH_MIN_TRIPPED {
                let directional: Vec<&RepositionEntry> =
                    recent.iter().copied().filter(|e| e.magnitude > DIRECTION_MIN_MAGNITUDE).collect();
                if !directional.is_empty() {
                    let mean_dx = directional.iter().map(|e| e.direction.0).sum::<f32>() / directional.len() as f32;
                    let mean_dy = directional.iter().map(|e| e.direction.1).sum::<f32>() / directional.len() as f32;
                    let consistency = (mean_dx * mean_dx + mean_dy * mean_dy).sqrt();
                    if consistency > thresholds.direction_consistency {
                        return (
                            DetectionSignal {
                                detector: DetectorKind::Reposition,
                                raw_metric: shift_magnitude,
                                tripped: true,
                                auxiliary: aux,
                            },
                            Some(RepositionSubtype::Slow),
                        );
                    }
                }
            }
        }

        (
            DetectionSignal {
                detector: DetectorKind::Reposition,
                raw_metric: shift_magnitude,
                tripped: false,
                auxiliary: aux,
            },
            None,
        )
    }
}

impl Default for RepositionDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Centered region of interest: excludes a ~10% border on each side to
/// suppress flow artifacts and scene-edge objects.
fn center_region_mean(flow: &FlowField) -> (f32, f32) {
    let w = flow.width;
    let h = flow.height;
    let border_x = w / 10;
    let border_y = h / 10;
    if w <= 2 * border_x || h <= 2 * border_y {
        return (0.0, 0.0);
    }
    let mut sum_u = 0.0f32;
    let mut sum_v = 0.0f32;
    let mut count = 0u32;
    for y in border_y..(h - border_y) {
        for x in border_x..(w - border_x) {
            let (u, v) = flow.at(x, y);
            sum_u += u;
            sum_v += v;
            count += 1;
        }
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    (sum_u / count as f32, sum_v / count as f32)
}

fn cardinal_direction(shift_x: f32, shift_y: f32) -> String {
    if shift_x.abs() < MAGNITUDE_EPSILON && shift_y.abs() < MAGNITUDE_EPSILON {
        return "none".to_string();
    }
    let horizontal = if shift_x >= 0.0 { "right" } else { "left" };
    let vertical = if shift_y >= 0.0 { "down" } else { "up" };
    if shift_x.abs() > shift_y.abs() * 2.0 {
        horizontal.to_string()
    } else if shift_y.abs() > shift_x.abs() * 2.0 {
        vertical.to_string()
    } else {
        format!("{}-{}", vertical, horizontal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_flow(w: u32, h: u32, u: f32, v: f32) -> FlowField {
        FlowField {
            width: w,
            height: h,
            u: vec![u; (w * h) as usize],
            v: vec![v; (w * h) as usize],
        }
    }

    #[test]
    fn shake_trips_above_threshold() {
        let flow = uniform_flow(16, 16, 8.0, 0.0);
        let mut det = ShakeDetector::new();
        let signal = det.step(&flow, &Thresholds::default());
        assert!(signal.tripped);
    }

    #[test]
    fn reposition_fast_path_trips_immediately() {
        let flow = uniform_flow(16, 16, 25.0, 0.0);
        let mut det = RepositionDetector::new();
        let thresholds = Thresholds::default();
        let (signal, subtype) = det.step(&flow, 0.0, &thresholds);
        assert!(signal.tripped);
        assert_eq!(subtype, Some(RepositionSubtype::Fast));
    }

    #[test]
    fn fast_threshold_exactly_equal_does_not_trip() {
        // Strict `>` per spec §8 boundary test.
        let flow = uniform_flow(16, 16, 20.0, 0.0);
        let mut det = RepositionDetector::new();
        let thresholds = Thresholds::default();
        let (signal, _subtype) = det.step(&flow, 0.0, &thresholds);
        assert!(!signal.tripped);
    }

    #[test]
    fn slow_path_requires_five_history_entries() {
        let flow = uniform_flow(16, 16, 11.0, 0.0);
        let mut det = RepositionDetector::new();
        let thresholds = Thresholds::default();
        for i in 0..4 {
            let (signal, subtype) = det.step(&flow, i as f64, &thresholds);
            assert!(!signal.tripped);
            assert_eq!(subtype, None);
        }
        let (signal, subtype) = det.step(&flow, 4.0, &thresholds);
        assert!(signal.tripped);
        assert_eq!(subtype, Some(RepositionSubtype::Slow));
    }

    #[test]
    fn ring_buffer_never_exceeds_ten_entries() {
        let flow = uniform_flow(16, 16, 1.0, 0.0);
        let mut det = RepositionDetector::new();
        let thresholds = Thresholds::default();
        for i in 0..30 {
            det.step(&flow, i as f64, &thresholds);
        }
        assert!(det.history().len() <= 10);
    }

    #[test]
    fn oscillating_direction_does_not_trip_slow_path() {
        let mut det = RepositionDetector::new();
        let thresholds = Thresholds::default();
        let right = uniform_flow(16, 16, 12.0, 0.0);
        let left = uniform_flow(16, 16, -12.0, 0.0);
        for i in 0..5 {
            let flow = if i % 2 == 0 { &right } else { &left };
            let (_signal, subtype) = det.step(flow, i as f64, &thresholds);
            assert_eq!(subtype, None);
        }
    }
}

//! Scenario-level integration tests: detectors, aggregator, and the
//! watermark protocol driven together the way the pipeline would drive
//! them, without depending on the optical flow estimator's exact numeric
//! output (flow fields are constructed directly so each scenario is
//! deterministic).

use tamper_witness_core::aggregator::{Aggregator, IncidentKind, IncidentTransition};
use tamper_witness_core::config::{Thresholds, WatermarkSecret};
use tamper_witness_core::detect::{
    BlurDetector, DetectorKind, FlowField, GlareDetector, RepositionDetector, RepositionSubtype, ShakeDetector,
};
use tamper_witness_core::frame::{ChannelOrder, Frame, GrayFrame};
use tamper_witness_core::watermark::{OfflineValidator, WatermarkEmbedder};
use tamper_witness_core::Verdict;

fn uniform_flow(w: u32, h: u32, u: f32, v: f32) -> FlowField {
    FlowField { width: w, height: h, u: vec![u; (w * h) as usize], v: vec![v; (w * h) as usize] }
}

fn flat_gray(w: u32, h: u32, value: u8) -> GrayFrame {
    GrayFrame { width: w, height: h, pixels: vec![value; (w * h) as usize] }
}

/// S1: a single large, sustained shift (a fast rotation/whip-pan) should
/// open a reposition incident almost immediately via the fast path.
#[test]
fn fast_rotation_opens_reposition_incident_quickly() {
    let thresholds = Thresholds::default();
    let mut detector = RepositionDetector::new();
    let mut aggregator = Aggregator::new();
    let flow = uniform_flow(32, 32, 30.0, 0.0);

    let dt = 1.0 / 30.0;
    let mut ts = 0.0;
    let mut opened_at = None;
    for _ in 0..60 {
        ts += dt;
        let (signal, subtype) = detector.step(&flow, ts, &thresholds);
        assert_eq!(subtype, Some(RepositionSubtype::Fast));
        if let Some(IncidentTransition::Opened(incident)) =
            aggregator.observe(DetectorKind::Reposition, signal.tripped, subtype, ts, dt, &thresholds)
        {
            opened_at = Some((ts, incident));
            break;
        }
    }
    let (ts, incident) = opened_at.expect("fast reposition incident should open");
    assert_eq!(incident.kind, IncidentKind::Reposition);
    assert_eq!(incident.subtype.as_deref(), Some("fast"));
    assert!(ts <= thresholds.fast_reposition_sustain_secs + 2.0 * dt);
}

/// S2: a moderate, direction-consistent drift (a slow pan) should open a
/// reposition incident via the slow path once enough history accumulates,
/// never through the fast path.
#[test]
fn slow_pan_opens_reposition_incident_via_slow_path() {
    let thresholds = Thresholds::default();
    let mut detector = RepositionDetector::new();
    let mut aggregator = Aggregator::new();
    let flow = uniform_flow(32, 32, 12.0, 0.0);

    let dt = 1.0 / 30.0;
    let mut ts = 0.0;
    let mut opened = None;
    for _ in 0..180 {
        ts += dt;
        let (signal, subtype) = detector.step(&flow, ts, &thresholds);
        assert_ne!(subtype, Some(RepositionSubtype::Fast));
        if let Some(IncidentTransition::Opened(incident)) =
            aggregator.observe(DetectorKind::Reposition, signal.tripped, subtype, ts, dt, &thresholds)
        {
            opened = Some(incident);
            break;
        }
    }
    let incident = opened.expect("slow reposition incident should eventually open");
    assert_eq!(incident.subtype.as_deref(), Some("slow"));
}

/// S3: jitter (oscillating direction, shake-magnitude shifts) should open
/// a shake incident but must never be misread as a reposition.
#[test]
fn shake_does_not_open_a_reposition_incident() {
    let thresholds = Thresholds::default();
    let mut shake_detector = ShakeDetector::new();
    let mut reposition_detector = RepositionDetector::new();
    let mut aggregator = Aggregator::new();

    let right = uniform_flow(32, 32, 8.0, 0.0);
    let left = uniform_flow(32, 32, -8.0, 0.0);

    let dt = 1.0 / 30.0;
    let mut ts = 0.0;
    let mut shake_opened = false;
    for i in 0..90 {
        ts += dt;
        let flow = if i % 2 == 0 { &right } else { &left };
        let shake_signal = shake_detector.step(flow, &thresholds);
        let (reposition_signal, subtype) = reposition_detector.step(flow, ts, &thresholds);
        assert_eq!(subtype, None, "oscillating direction must not read as reposition");

        if let Some(IncidentTransition::Opened(incident)) = aggregator.observe(
            DetectorKind::Shake,
            shake_signal.tripped,
            None,
            ts,
            dt,
            &thresholds,
        ) {
            assert_eq!(incident.kind, IncidentKind::Shake);
            shake_opened = true;
        }
        let reposition_transition = aggregator.observe(
            DetectorKind::Reposition,
            reposition_signal.tripped,
            subtype,
            ts,
            dt,
            &thresholds,
        );
        assert!(reposition_transition.is_none());
    }
    assert!(shake_opened, "sustained jitter should eventually open a shake incident");
}

/// S4: a persistently blurred lens (flat, low-variance frames) should open
/// a blur incident once the sustain window elapses.
#[test]
fn blurry_lens_opens_sustained_blur_incident() {
    let thresholds = Thresholds::default();
    let mut detector = BlurDetector::new();
    let mut aggregator = Aggregator::new();
    let gray = flat_gray(64, 64, 120);

    let dt = 1.0 / 30.0;
    let mut ts = 0.0;
    let mut opened = None;
    for _ in 0..90 {
        ts += dt;
        let signal = detector.step(&gray, &thresholds);
        assert!(signal.tripped, "a perfectly flat frame has zero Laplacian variance");
        if let Some(IncidentTransition::Opened(incident)) =
            aggregator.observe(DetectorKind::Blur, signal.tripped, None, ts, dt, &thresholds)
        {
            opened = Some((ts, incident));
            break;
        }
    }
    let (ts, incident) = opened.expect("blur incident should open once sustained");
    assert_eq!(incident.kind, IncidentKind::Blur);
    assert!(ts >= thresholds.blur_sustain_secs);
}

/// S5: a clip recorded at one time but validated against a much later
/// clock (a replay attack) must be rejected; the same clip validated
/// against its own recording time must pass.
#[test]
fn replayed_clip_fails_validation_against_the_wrong_clock() {
    let secret = WatermarkSecret::new("0123456789abcdef0123456789abcdef").unwrap();
    let mut embedder = WatermarkEmbedder::new(secret.clone());

    let mut frames = Vec::new();
    for i in 0..5u32 {
        let mut frame =
            Frame::new(1_000.0 + i as f64, 64, 64, ChannelOrder::Rgb, vec![0u8; 64 * 64 * 3]).unwrap();
        embedder.embed(&mut frame);
        frames.push(frame.color().to_vec());
    }

    let validator = OfflineValidator::new(WatermarkSecret::new("0123456789abcdef0123456789abcdef").unwrap());
    let as_slices: Vec<(&[u8], u32, u32, ChannelOrder)> =
        frames.iter().map(|f| (f.as_slice(), 64, 64, ChannelOrder::Rgb)).collect();

    let thresholds = Thresholds::default();
    let live_report = validator.verify(&as_slices, |i| 1000 + i as i64, thresholds.live_threshold, thresholds.color_match_distance);
    assert_eq!(live_report.verdict, Verdict::Live);

    let replay_report = validator.verify(
        &as_slices,
        |i| 1000 + i as i64 + 7200,
        thresholds.live_threshold,
        thresholds.color_match_distance,
    );
    assert_eq!(replay_report.verdict, Verdict::NotLive);
    assert_eq!(replay_report.match_rate, 0.0);
}

/// S6: the glare rescue path must trip, preserve the frame's shape, and
/// never leave a channel out of range, so it can safely replace the
/// outgoing frame while the incident is recorded.
#[test]
fn glare_rescue_preserves_frame_shape_while_incident_opens() {
    let thresholds = Thresholds::default();
    let mut detector = GlareDetector::new();
    let mut aggregator = Aggregator::new();

    let w = 32;
    let h = 32;
    let n = (w * h) as usize;
    let dark_n = n * 45 / 100;
    let bright_n = n * 5 / 100;
    let mid_n = n - dark_n - bright_n;
    let mut gray_pixels = Vec::with_capacity(n);
    gray_pixels.extend(std::iter::repeat(10u8).take(dark_n));
    gray_pixels.extend(std::iter::repeat(150u8).take(mid_n));
    gray_pixels.extend(std::iter::repeat(254u8).take(bright_n));
    let gray = GrayFrame { width: w, height: h, pixels: gray_pixels };

    let mut color = vec![120u8; n * 3];
    for (i, chunk) in color.chunks_exact_mut(3).enumerate() {
        if i < bright_n {
            chunk.copy_from_slice(&[253, 253, 253]);
        } else if i < bright_n + dark_n {
            chunk.copy_from_slice(&[10, 10, 10]);
        }
    }

    let dt = 1.0 / 30.0;
    let mut ts = 0.0;
    let mut opened = None;
    for _ in 0..90 {
        ts += dt;
        let signal = detector.step(&gray, &thresholds);
        if let Some(IncidentTransition::Opened(incident)) =
            aggregator.observe(DetectorKind::Glare, signal.tripped, None, ts, dt, &thresholds)
        {
            opened = Some(incident);
            break;
        }
    }
    let incident = opened.expect("glare incident should open once sustained");
    assert_eq!(incident.kind, IncidentKind::Glare);

    let rescued = tamper_witness_core::detect::glare::rescue(&color, w, h, &thresholds);
    assert_eq!(rescued.len(), color.len());
    assert!(rescued.iter().all(|&p| (0..=255).contains(&p)));
}

/// Universal invariant: at most one active incident is retained per
/// detector kind, even under rapid repeated re-tripping.
#[test]
fn at_most_one_active_incident_per_detector_kind() {
    let thresholds = Thresholds::default();
    let mut aggregator = Aggregator::new();
    let gray_kind = DetectorKind::Blur;

    let dt = 1.0 / 30.0;
    let mut ts = 0.0;
    for _ in 0..300 {
        ts += dt;
        aggregator.observe(gray_kind, true, None, ts, dt, &thresholds);
    }

    let blur_incidents = aggregator.retained_incidents().filter(|i| i.kind == IncidentKind::Blur).count();
    assert!(blur_incidents <= 1);
}

/// Universal invariant: the reposition ring buffer never grows past its
/// fixed capacity regardless of how long the detector runs.
#[test]
fn reposition_ring_buffer_stays_bounded_over_a_long_run() {
    let thresholds = Thresholds::default();
    let mut detector = RepositionDetector::new();
    let flow = uniform_flow(16, 16, 3.0, 0.0);
    for i in 0..500 {
        detector.step(&flow, i as f64 * (1.0 / 30.0), &thresholds);
    }
    assert!(detector.history().len() <= 10);
}

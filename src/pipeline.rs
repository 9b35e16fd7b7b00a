//! Wires ingestion, the detector bank, the temporal aggregator, the
//! watermark embedder, and persistence into one producer loop (spec §4,
//! §7).

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use image::ImageFormat;

use crate::aggregator::{Aggregator, IncidentKind, IncidentTransition};
use crate::config::{ConfigHandle, PipelineConfig};
use crate::detect::{
    blur, dense_optical_flow, glare, liveness, BlurDetector, DetectorKind, FlowField, FlowParams,
    GlareDetector, LivenessDetector, RepositionDetector, RepositionSubtype, ShakeDetector,
};
use crate::frame::Preprocessor;
use crate::ingest::{CaptureOutcome, CaptureSource};
use crate::sink::{EventSink, SinkEvent};
use crate::storage::{IncidentStore, SqliteIncidentStore};
use crate::watermark::WatermarkEmbedder;

const CAPTURE_MAX_RETRIES: u32 = 3;
const CAPTURE_RETRY_GRACE_SECS: u64 = 5;

/// Cooperative stop flag, set by the `ctrlc` handler in the binary or by
/// tests driving the loop for a bounded number of frames.
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Pipeline {
    config: Arc<ConfigHandle>,
    preprocessor: Preprocessor,
    blur: BlurDetector,
    glare: GlareDetector,
    liveness: LivenessDetector,
    shake: ShakeDetector,
    reposition: RepositionDetector,
    aggregator: Aggregator,
    embedder: WatermarkEmbedder,
    sink: Arc<EventSink>,
    store: SqliteIncidentStore,
    last_timestamp: Option<f64>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, sink: Arc<EventSink>) -> Result<Self> {
        let store = SqliteIncidentStore::open(&config.db_path)?;
        let embedder = WatermarkEmbedder::new(config.secret.clone());
        Ok(Self {
            config: Arc::new(ConfigHandle::new(config)),
            preprocessor: Preprocessor::new(),
            blur: BlurDetector::new(),
            glare: GlareDetector::new(),
            liveness: LivenessDetector::new(),
            shake: ShakeDetector::new(),
            reposition: RepositionDetector::new(),
            aggregator: Aggregator::new(),
            embedder,
            sink,
            store,
            last_timestamp: None,
        })
    }

    pub fn config_handle(&self) -> Arc<ConfigHandle> {
        self.config.clone()
    }

    /// Clears reposition's ring buffer and any open reposition incident
    /// (spec §6 `dismiss_reposition_alert`).
    pub fn dismiss_reposition_alert(&mut self) {
        self.reposition.reset();
        self.aggregator.dismiss(DetectorKind::Reposition);
    }

    /// Drains frames from `source` until it reports end-of-stream or
    /// `stop` is signaled. On persistent capture failure (more than
    /// `CAPTURE_MAX_RETRIES` consecutive errors, or `CAPTURE_RETRY_GRACE_SECS`
    /// elapsed without a healthy source), emits a `capture_lost` incident
    /// and returns an error so the caller can exit non-zero (spec §7).
    pub fn run(&mut self, source: &mut dyn CaptureSource, stop: &StopFlag) -> Result<()> {
        let result = self.run_inner(source, stop);
        self.preprocessor.release_pool();
        result
    }

    fn run_inner(&mut self, source: &mut dyn CaptureSource, stop: &StopFlag) -> Result<()> {
        let mut consecutive_failures = 0u32;
        let grace_started_at = std::time::Instant::now();

        loop {
            if stop.is_set() {
                return Ok(());
            }

            match source.next_frame() {
                Ok(CaptureOutcome::EndOfStream) => return Ok(()),
                Ok(CaptureOutcome::Frame(frame)) => {
                    consecutive_failures = 0;
                    self.process_frame(frame)?;
                }
                Err(err) => {
                    consecutive_failures += 1;
                    log::warn!("capture error ({}/{}): {}", consecutive_failures, CAPTURE_MAX_RETRIES, err);
                    let grace_elapsed = grace_started_at.elapsed().as_secs() >= CAPTURE_RETRY_GRACE_SECS;
                    if consecutive_failures > CAPTURE_MAX_RETRIES || (!source.is_healthy() && grace_elapsed) {
                        self.emit_capture_lost();
                        return Err(anyhow::anyhow!("capture source lost: {}", err));
                    }
                }
            }
        }
    }

    fn emit_capture_lost(&self) {
        self.sink.push(SinkEvent::Incident(IncidentTransition::Opened(crate::aggregator::Incident {
            id: "capture_lost".to_string(),
            kind: IncidentKind::Blackout,
            subtype: Some("capture_lost".to_string()),
            first_seen_ts: 0.0,
            last_seen_ts: 0.0,
            count: 1,
            description: "capture source lost after repeated errors".to_string(),
        })));
    }

    fn process_frame(&mut self, mut frame: crate::frame::Frame) -> Result<()> {
        let config = self.config.snapshot();
        let thresholds = &config.thresholds;
        let enable = &config.enable;
        let timestamp = frame.timestamp;
        let dt = match self.last_timestamp {
            Some(prev) => (timestamp - prev).max(0.0),
            None => 0.0,
        };
        self.last_timestamp = Some(timestamp);

        let gray = frame.grayscale().clone();

        let blur_signal = if enable.blur {
            self.blur.step(&gray, thresholds)
        } else {
            crate::detect::DetectionSignal::untripped(DetectorKind::Blur)
        };

        let glare_signal = if enable.glare {
            self.glare.step(&gray, thresholds)
        } else {
            crate::detect::DetectionSignal::untripped(DetectorKind::Glare)
        };

        let flow: Option<FlowField> = if !self.preprocessor.is_first_frame() {
            Some(dense_optical_flow(self.preprocessor.previous().unwrap(), &gray, FlowParams::spec_default())?)
        } else {
            None
        };

        let shake_signal = match (&flow, enable.shake) {
            (Some(f), true) => self.shake.step(f, thresholds),
            _ => crate::detect::DetectionSignal::untripped(DetectorKind::Shake),
        };

        let (reposition_signal, reposition_subtype) = match (&flow, enable.reposition) {
            (Some(f), true) => self.reposition.step(f, timestamp, thresholds),
            _ => (crate::detect::DetectionSignal::untripped(DetectorKind::Reposition), None),
        };

        let liveness_signals = if enable.liveness {
            let pool = self.preprocessor.pool_mut();
            self.liveness.step(
                &gray,
                timestamp,
                blur_signal.tripped,
                reposition_signal.tripped,
                thresholds,
                pool,
            )
        } else {
            liveness::LivenessSignals {
                frozen: crate::detect::DetectionSignal::untripped(DetectorKind::Liveness),
                blackout: crate::detect::DetectionSignal::untripped(DetectorKind::Blackout),
                major_tamper: crate::detect::DetectionSignal::untripped(DetectorKind::MajorTamper),
            }
        };

        self.observe(DetectorKind::Blur, blur_signal.tripped, None, timestamp, dt, thresholds);
        self.observe(DetectorKind::Glare, glare_signal.tripped, None, timestamp, dt, thresholds);
        self.observe(DetectorKind::Shake, shake_signal.tripped, None, timestamp, dt, thresholds);
        self.observe(DetectorKind::Reposition, reposition_signal.tripped, reposition_subtype, timestamp, dt, thresholds);
        self.observe(DetectorKind::Liveness, liveness_signals.frozen.tripped, None, timestamp, dt, thresholds);
        self.observe(DetectorKind::Blackout, liveness_signals.blackout.tripped, None, timestamp, dt, thresholds);
        self.observe(DetectorKind::MajorTamper, liveness_signals.major_tamper.tripped, None, timestamp, dt, thresholds);

        if glare_signal.tripped && enable.glare_rescue {
            let rescued = glare::rescue(frame.color(), frame.width, frame.height, thresholds);
            frame.replace_color(rescued)?;
            if let Ok(png) = encode_png_rgb(frame.color(), frame.width, frame.height) {
                if let Some(incident) = self.aggregator.retained_incidents().find(|i| i.kind == IncidentKind::Glare) {
                    if let Err(err) = self.store.record_glare_image(&incident.id, timestamp, &png) {
                        log::warn!("failed to persist glare rescue image: {}", err);
                    }
                }
            }
        }
        if blur_signal.tripped && enable.blur_fix {
            let sharpened = blur::unsharp_mask_color(frame.color(), frame.width, frame.height, thresholds.blur_fix_strength);
            frame.replace_color(sharpened)?;
        }

        let token = self.embedder.embed(&mut frame);
        self.sink.push(SinkEvent::WatermarkEmbedded { timestamp, rgb: token.rgb });

        self.preprocessor.advance(gray);
        Ok(())
    }

    fn observe(
        &mut self,
        detector: DetectorKind,
        tripped: bool,
        subtype: Option<RepositionSubtype>,
        timestamp: f64,
        dt: f64,
        thresholds: &crate::config::Thresholds,
    ) {
        if let Some(transition) = self.aggregator.observe(detector, tripped, subtype, timestamp, dt, thresholds) {
            let incident = match &transition {
                IncidentTransition::Opened(i) | IncidentTransition::Updated(i) | IncidentTransition::Closed(i) => i.clone(),
            };
            if let Err(err) = self.store.upsert_incident(&incident) {
                log::warn!("failed to persist incident {}: {}", incident.id, err);
            }
            self.sink.push(SinkEvent::Incident(transition));
        }
    }
}

fn encode_png_rgb(color: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let img = image::RgbImage::from_raw(width, height, color.to_vec())
        .ok_or_else(|| anyhow::anyhow!("glare rescue buffer size mismatch"))?;
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::ingest::SyntheticSource;

    #[test]
    fn processes_a_short_synthetic_stream_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let mut config = PipelineConfig::default_config();
        config.db_path = db_path.to_string_lossy().to_string();

        let sink = Arc::new(EventSink::new(64));
        let mut pipeline = Pipeline::new(config, sink.clone()).unwrap();
        let mut source = SyntheticSource::new(32, 32, 15.0).with_max_frames(10);
        let stop = StopFlag::new();

        pipeline.run(&mut source, &stop).unwrap();
        assert!(!sink.is_empty() || sink.dropped_count() == 0);
    }

    #[test]
    fn stop_flag_halts_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let mut config = PipelineConfig::default_config();
        config.db_path = db_path.to_string_lossy().to_string();

        let sink = Arc::new(EventSink::new(64));
        let mut pipeline = Pipeline::new(config, sink).unwrap();
        let mut source = SyntheticSource::new(16, 16, 15.0);
        let stop = StopFlag::new();
        stop.signal();

        pipeline.run(&mut source, &stop).unwrap();
    }
}

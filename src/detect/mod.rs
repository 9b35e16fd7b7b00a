//! Detector bank: six interference detectors modeled as a closed variant
//! rather than a dynamic-dispatch trait hierarchy (per spec §9 design
//! notes). Each detector exposes `step` (produce a `DetectionSignal` for one
//! frame) and `reset` (clear temporal state, used by `dismiss_reposition_alert`
//! and pipeline restart).

pub mod blur;
pub mod flow;
pub mod glare;
pub mod liveness;
pub mod motion;

pub use blur::BlurDetector;
pub use flow::{dense_optical_flow, FlowField, FlowParams};
pub use glare::GlareDetector;
pub use liveness::LivenessDetector;
pub use motion::{RepositionDetector, RepositionEntry, RepositionSubtype, ShakeDetector};

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Blur,
    Glare,
    Liveness,
    Blackout,
    MajorTamper,
    Shake,
    Reposition,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Blur => "blur",
            DetectorKind::Glare => "glare",
            DetectorKind::Liveness => "frozen",
            DetectorKind::Blackout => "blackout",
            DetectorKind::MajorTamper => "major_tamper",
            DetectorKind::Shake => "shake",
            DetectorKind::Reposition => "reposition",
        }
    }
}

/// A scalar or small structured auxiliary value carried alongside a raw
/// metric. Shape varies per detector (spec §3).
#[derive(Clone, Debug, PartialEq)]
pub enum AuxValue {
    Float(f32),
    UInt(u32),
    Text(String),
    Histogram256(Box<[u32; 256]>),
}

pub type Auxiliary = HashMap<&'static str, AuxValue>;

/// Per-detector, per-frame output. Transient: never persisted directly,
/// only consumed by the temporal aggregator.
#[derive(Clone, Debug)]
pub struct DetectionSignal {
    pub detector: DetectorKind,
    pub raw_metric: f32,
    pub tripped: bool,
    pub auxiliary: Auxiliary,
}

impl DetectionSignal {
    pub fn untripped(detector: DetectorKind) -> Self {
        Self {
            detector,
            raw_metric: 0.0,
            tripped: false,
            auxiliary: Auxiliary::new(),
        }
    }
}

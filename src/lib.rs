//! Tamper-resistant video surveillance core.
//!
//! Detects interference with a camera feed — blur, glare, shake,
//! reposition, blackout, freeze, and unexplained major scene change — and
//! records each as a persisted incident. A time-keyed watermark is
//! embedded into every live frame so a recording can later be checked
//! offline for whether it was actually produced live or replayed.
//!
//! # Module structure
//!
//! - `frame`: color/grayscale frame representation and buffer reuse
//! - `config`: threshold/enable-flag configuration, loaded from TOML
//! - `detect`: the six interference detectors plus shared optical flow
//! - `aggregator`: per-detector debouncing state machine and incident log
//! - `watermark`: HMAC-keyed embedder and the offline liveness validator
//! - `sink`: bounded event queue between the pipeline and its consumers
//! - `storage`: SQLite persistence for incidents and validation runs
//! - `ingest`: capture source trait plus local/synthetic sources
//! - `pipeline`: wires the above into the per-frame processing loop
//! - `api`: the operator-facing control surface

pub mod aggregator;
pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod sink;
pub mod storage;
pub mod watermark;

pub use aggregator::{Aggregator, Incident, IncidentKind, IncidentTransition};
pub use config::{ConfigHandle, EnableFlags, PipelineConfig, PipelineConfigFile, Thresholds};
pub use pipeline::{Pipeline, StopFlag};
pub use sink::{EventSink, SinkEvent};
pub use watermark::{OfflineValidator, Verdict, WatermarkEmbedder};

//! Frame ingestion sources.
//!
//! Camera/transport drivers (RTSP, V4L2, ESP32-S3, ffmpeg-backed file
//! decode) are out of scope here; this crate's boundary starts at an
//! already-decoded `Frame`. `CaptureSource` is the seam a real deployment
//! plugs a driver into.

pub mod file;
pub mod synthetic;

pub use file::ImageSequenceSource;
pub use synthetic::SyntheticSource;

use crate::frame::Frame;

/// Result of asking a source for its next frame.
pub enum CaptureOutcome {
    Frame(Frame),
    EndOfStream,
}

/// A source of timestamped color frames. Implementors own whatever state a
/// real driver would need (socket, file handle, decoder); this crate only
/// ever sees `Frame`s.
pub trait CaptureSource {
    fn next_frame(&mut self) -> anyhow::Result<CaptureOutcome>;

    /// True once the source has observed persistent failure and should be
    /// reported as lost rather than retried (spec §7 `capture_lost`).
    fn is_healthy(&self) -> bool {
        true
    }
}

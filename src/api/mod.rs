//! Control surface: the small set of operations an operator or a calling
//! application performs against a running pipeline (spec §6). There is no
//! network transport here — every function takes the in-process handle it
//! needs directly, the way a library crate exposes its surface.

use anyhow::Result;

use crate::config::{ConfigHandle, EnableFlags, WatermarkSecret};
use crate::frame::ChannelOrder;
use crate::pipeline::Pipeline;
use crate::watermark::{OfflineValidator, ValidationReport};

/// Publishes a new set of detector enable flags / rescue mode. Thresholds
/// and the watermark secret are immutable after load and have no setter
/// here (spec §3).
pub fn configure_sensors(config: &ConfigHandle, enable: EnableFlags) {
    config.update_enable_flags(enable);
}

/// Clears a standing reposition alert: resets the detector's ring buffer
/// and drops any open reposition incident.
pub fn dismiss_reposition_alert(pipeline: &mut Pipeline) {
    pipeline.dismiss_reposition_alert();
}

/// Runs the offline watermark validator against recorded frames. `clock`
/// maps a frame index to the Unix second used to compute its expected
/// token; callers reading a file's own timestamps pass those in directly,
/// callers probing "is this live right now" pass in wall-clock seconds.
pub fn validate_watermark(
    secret: WatermarkSecret,
    frames: &[(&[u8], u32, u32, ChannelOrder)],
    clock: impl Fn(usize) -> i64,
    live_threshold: f64,
    color_match_distance: f64,
) -> Result<ValidationReport> {
    let validator = OfflineValidator::new(secret);
    Ok(validator.verify(frames, clock, live_threshold, color_match_distance))
}
